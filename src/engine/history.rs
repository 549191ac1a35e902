//! Resume-from-history artifacts
//!
//! A history artifact is a CSV file with an `agent,note` header. Each row
//! becomes a note in the named agent's memory before the first cycle runs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryEntry {
    pub agent: String,
    pub note: String,
}

/// Load a history artifact from disk
pub fn load_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open history file {}", path.display()))?;
    parse_history(file).with_context(|| format!("Invalid history file {}", path.display()))
}

pub fn parse_history(reader: impl Read) -> Result<Vec<HistoryEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = Vec::new();
    for (index, record) in reader.deserialize::<HistoryEntry>().enumerate() {
        let entry = record.with_context(|| format!("Malformed history row {}", index + 1))?;
        if entry.agent.is_empty() || entry.note.is_empty() {
            anyhow::bail!("History row {} has an empty agent or note", index + 1);
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_rows() {
        let data = "agent,note\nIsabella Rodriguez,\"planning a Valentine's party, at 5pm\"\nKlaus Mueller, reading about gentrification \n";
        let entries = parse_history(data.as_bytes()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].agent, "Isabella Rodriguez");
        assert_eq!(entries[0].note, "planning a Valentine's party, at 5pm");
        assert_eq!(entries[1].note, "reading about gentrification");
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(parse_history("agent,note\n".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_note_is_rejected() {
        let err = parse_history("agent,note\nKlaus,\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_missing_column_is_rejected() {
        assert!(parse_history("agent\nKlaus\n".as_bytes()).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "agent,note").unwrap();
        writeln!(file, "Maria,studying physics").unwrap();

        let entries = load_history(file.path()).unwrap();
        assert_eq!(entries[0].agent, "Maria");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_history(Path::new("/nonexistent/history.csv")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open history file"));
    }
}
