use clap::Parser;

/// This is a simplified electronic ballot box.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The candidate roll: one record per line with the fields
    /// number,name,party,office,jurisdiction.
    #[clap(short, long, value_parser)]
    pub candidates: String,

    /// (file path) The voter roll: one record per line with the fields
    /// name,document,voter_id,municipality,jurisdiction.
    #[clap(long, value_parser)]
    pub voters: String,

    /// (directory, default '.') Where the durable state of the ballot box
    /// lives: the ballot log, the voted-voter file and the booth lock.
    #[clap(short, long, value_parser)]
    pub data_dir: Option<String>,

    /// (jurisdiction code, e.g. MG) Starts an interactive voting session for
    /// a booth in the given jurisdiction.
    #[clap(long, value_parser)]
    pub vote: Option<String>,

    /// Tabulates every recorded ballot and writes the ballot box report.
    #[clap(long, takes_value = false)]
    pub tally: bool,

    /// (file path, 'stdout' or empty) If specified, the tally summary will be
    /// written in JSON format to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference file containing a tally summary in JSON format.
    /// If provided, urna will check that the tabulated output matches the
    /// reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
