// Rendering of tabulation results: the human-readable ballot box report
// (boletim) and the machine-readable summary JSON used for reference
// comparisons.

use crate::urna::*;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(rename = "totalBallots")]
    pub total_ballots: u64,
    pub candidates: usize,
    pub voters: usize,
}

/// Assembles the summary JSON for one tabulation run.
///
/// Counts are rendered as strings and percentages with two decimals, so
/// that a summary written to disk compares byte-for-byte against a
/// reference file.
pub fn build_summary(registry: &Registry, results: &Results) -> JSValue {
    let config = SummaryConfig {
        total_ballots: results.total_ballots,
        candidates: registry.num_candidates(),
        voters: registry.num_voters(),
    };

    let mut offices: Vec<JSValue> = Vec::new();
    for (office, tally) in results.offices.iter() {
        let mut nominal: JSMap<String, JSValue> = JSMap::new();
        let mut percentages: JSMap<String, JSValue> = JSMap::new();
        for (name, count) in tally.nominal.iter() {
            nominal.insert(name.clone(), json!(count.to_string()));
            percentages.insert(
                name.clone(),
                json!(format!("{:.2}", results.percentage(*count))),
            );
        }
        offices.push(json!({
            "office": office.code(),
            "title": office.title(),
            "blank": tally.blank.to_string(),
            "null": tally.null.to_string(),
            "nominal": nominal,
            "percentages": percentages,
        }));
    }

    json!({ "config": config, "results": offices })
}

pub fn read_summary(path: String) -> UrnaResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu {})?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

/// Writes the boletim: the plain-text report posted at the ballot box.
pub fn write_boletim(results: &Results, path: &Path) -> UrnaResult<()> {
    let mut text = String::new();
    text.push_str("=== BALLOT BOX REPORT ===\n\n");
    text.push_str(&format!("Total ballots cast: {}\n", results.total_ballots));
    text.push_str(&format!("{}\n", "-".repeat(30)));

    for (office, tally) in results.offices.iter() {
        text.push_str(&format!("\nOffice: {}\n", office.title()));
        text.push_str(&format!("Blank: {}\n", tally.blank));
        text.push_str(&format!("Null: {}\n", tally.null));
        for (name, count) in tally.nominal.iter() {
            text.push_str(&format!(
                "{}: {} votes ({:.2}%)\n",
                name,
                count,
                results.percentage(*count)
            ));
        }
        text.push_str(&format!("{}\n", "-".repeat(30)));
    }

    fs::write(path, text).context(IoSnafu {
        path: path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_results() -> Results {
        let mut offices: BTreeMap<Office, OfficeTally> = Office::VOTING_ORDER
            .iter()
            .map(|&o| (o, OfficeTally::default()))
            .collect();
        let president = offices.get_mut(&Office::President).unwrap();
        president.blank = 1;
        president.null = 1;
        president.nominal.insert("Alice".to_string(), 1);
        Results {
            total_ballots: 3,
            offices,
        }
    }

    fn test_registry() -> Registry {
        Registry::from_rolls(
            vec![Candidate {
                number: "13".to_string(),
                name: "Alice".to_string(),
                party: "PYC".to_string(),
                office: Office::President,
                jurisdiction: NATIONWIDE.to_string(),
            }],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn summary_has_stringly_counts_and_percentages() {
        let summary = build_summary(&test_registry(), &test_results());
        assert_eq!(summary["config"]["totalBallots"], json!(3));
        let president = summary["results"]
            .as_array()
            .unwrap()
            .iter()
            .find(|o| o["office"] == json!("P"))
            .unwrap();
        assert_eq!(president["blank"], json!("1"));
        assert_eq!(president["null"], json!("1"));
        assert_eq!(president["nominal"]["Alice"], json!("1"));
        assert_eq!(president["percentages"]["Alice"], json!("33.33"));
    }

    #[test]
    fn summary_covers_every_office() {
        let summary = build_summary(&test_registry(), &test_results());
        let offices: Vec<String> = summary["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["office"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(offices, vec!["F", "E", "S", "G", "P"]);
    }

    #[test]
    fn boletim_lists_counts_per_office() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boletim.txt");
        write_boletim(&test_results(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Total ballots cast: 3"));
        assert!(text.contains("Office: President"));
        assert!(text.contains("Alice: 1 votes (33.33%)"));
    }

    #[test]
    fn summary_round_trips_through_a_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = build_summary(&test_registry(), &test_results());
        std::fs::write(&path, serde_json::to_string_pretty(&summary).unwrap()).unwrap();
        let reference = read_summary(path.display().to_string()).unwrap();
        assert_eq!(summary, reference);
    }
}
