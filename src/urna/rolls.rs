// Primitives for reading the roll files.
//
// Both rolls are comma-separated, five fields per record. Malformed records
// are skipped and counted, never fatal: a bad line in a roll should not
// keep the booth from opening.

use crate::urna::*;

pub fn read_candidate_roll(path: &str) -> UrnaResult<Vec<Candidate>> {
    let mut reader = roll_reader(path)?;
    let mut loaded: Vec<Candidate> = Vec::new();
    let mut skipped = 0usize;
    for (idx, record) in reader.records().enumerate() {
        let record = record.context(RollRecordSnafu { path })?;
        match parse_candidate(&record) {
            Some(c) => loaded.push(c),
            None => {
                warn!(
                    "candidate roll {}: skipping malformed record at line {}",
                    path,
                    idx + 1
                );
                skipped += 1;
            }
        }
    }
    info!(
        "{} candidates loaded from {} ({} records skipped)",
        loaded.len(),
        path,
        skipped
    );
    Ok(loaded)
}

pub fn read_voter_roll(path: &str) -> UrnaResult<Vec<Voter>> {
    let mut reader = roll_reader(path)?;
    let mut loaded: Vec<Voter> = Vec::new();
    let mut skipped = 0usize;
    for (idx, record) in reader.records().enumerate() {
        let record = record.context(RollRecordSnafu { path })?;
        match parse_voter(&record) {
            Some(v) => loaded.push(v),
            None => {
                warn!(
                    "voter roll {}: skipping malformed record at line {}",
                    path,
                    idx + 1
                );
                skipped += 1;
            }
        }
    }
    info!(
        "{} voters loaded from {} ({} records skipped)",
        loaded.len(),
        path,
        skipped
    );
    Ok(loaded)
}

fn roll_reader(path: &str) -> UrnaResult<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .context(OpeningRollSnafu { path })
}

// Record shape: number,name,party,office,jurisdiction
fn parse_candidate(record: &csv::StringRecord) -> Option<Candidate> {
    if record.len() != 5 {
        return None;
    }
    let number = record.get(0)?.to_string();
    let name = record.get(1)?.to_string();
    let party = record.get(2)?.to_string();
    let office = Office::from_code(record.get(3)?)?;
    let jurisdiction = record.get(4)?.to_string();
    if number.is_empty() || name.is_empty() {
        return None;
    }
    Some(Candidate {
        number,
        name,
        party,
        office,
        jurisdiction,
    })
}

// Record shape: name,document,voter_id,municipality,jurisdiction
fn parse_voter(record: &csv::StringRecord) -> Option<Voter> {
    if record.len() != 5 {
        return None;
    }
    let name = record.get(0)?.to_string();
    let document_id = record.get(1)?.to_string();
    let voter_id = record.get(2)?.to_string();
    let municipality = record.get(3)?.to_string();
    let home_jurisdiction = record.get(4)?.to_string();
    if voter_id.is_empty() {
        return None;
    }
    Some(Voter {
        voter_id,
        name,
        document_id,
        municipality,
        home_jurisdiction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.display().to_string()
    }

    #[test]
    fn candidate_roll_skips_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "candidates.txt",
            "1234,Bob,PXB,F,MG\n\
             13,Alice,PYC,P,BR\n\
             too,short,line\n\
             99,Carl,PZD,X,MG\n",
        );
        let loaded = read_candidate_roll(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].number, "1234");
        assert_eq!(loaded[0].office, Office::FederalDeputy);
        assert_eq!(loaded[1].jurisdiction, NATIONWIDE);
    }

    #[test]
    fn voter_roll_reads_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "voters.txt",
            "Vera,MG-111,V1,Belo Horizonte,MG\nVictor,SP-222,V2,Campinas,SP\n",
        );
        let loaded = read_voter_roll(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].voter_id, "V1");
        assert_eq!(loaded[1].municipality, "Campinas");
        assert_eq!(loaded[1].home_jurisdiction, "SP");
    }

    #[test]
    fn fields_are_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "candidates.txt", " 22 , Carol , PWA , G , MG \n");
        let loaded = read_candidate_roll(&path).unwrap();
        assert_eq!(loaded[0].number, "22");
        assert_eq!(loaded[0].office, Office::Governor);
    }
}
