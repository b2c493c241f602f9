use clap::Parser;
use log::warn;
use snafu::ErrorCompat;

mod args;
mod urna;

fn main() {
    let args = args::Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let res = match args.vote.clone() {
        Some(booth) => urna::run_vote(&args, booth.as_str()),
        None if args.tally => urna::run_tally(&args),
        None => {
            eprintln!("Nothing to do: pass --vote <jurisdiction> or --tally.");
            std::process::exit(2);
        }
    };

    if let Err(e) = res {
        warn!("Error occured {:?}", e);
        eprintln!("An error occured {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
