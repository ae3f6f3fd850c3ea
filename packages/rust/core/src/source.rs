//! JSON Lines reader for the ingestion dataset.

use std::io::BufRead;
use std::path::Path;

use medgraph_shared::{MedGraphError, MedicalRecord, Result};
use serde::Serialize;

/// A parsed record and the 1-based line it came from.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub line: usize,
    pub record: MedicalRecord,
}

/// A record left out of ingestion, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reason: String,
}

/// Everything read from one dataset.
#[derive(Debug, Default)]
pub struct RecordSet {
    pub records: Vec<SourceRecord>,
    pub skipped: Vec<SkippedRecord>,
}

/// Read a JSON Lines dataset from disk.
pub fn read_records(path: &Path) -> Result<RecordSet> {
    let file = std::fs::File::open(path).map_err(|e| MedGraphError::io(path, e))?;
    parse_records(std::io::BufReader::new(file)).map_err(|e| match e {
        MedGraphError::Io { source, .. } => MedGraphError::io(path, source),
        other => other,
    })
}

/// Parse JSON Lines. Blank lines are ignored; malformed lines are skipped.
pub fn parse_records(reader: impl BufRead) -> Result<RecordSet> {
    let mut set = RecordSet::default();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| MedGraphError::io("<dataset>", e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<MedicalRecord>(trimmed) {
            Ok(record) => set.records.push(SourceRecord {
                line: line_no,
                record,
            }),
            Err(e) => set.skipped.push(SkippedRecord {
                line: line_no,
                name: None,
                reason: format!("invalid JSON: {e}"),
            }),
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_reports_bad_lines() {
        let input = "{\"name\":\"flu\",\"symptom\":[\"fever\"]}\n\n{not json}\n{\"name\":\"cold\"}\n";
        let set = parse_records(input.as_bytes()).unwrap();
        assert_eq!(set.records.len(), 2);
        assert_eq!(set.records[0].line, 1);
        assert_eq!(set.records[1].line, 4);
        assert_eq!(set.records[1].record.name.as_deref(), Some("cold"));
        assert_eq!(set.skipped.len(), 1);
        assert_eq!(set.skipped[0].line, 3);
        assert!(set.skipped[0].reason.starts_with("invalid JSON"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("medgraph_no_such_dataset.jsonl");
        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, MedGraphError::Io { .. }));
    }
}
