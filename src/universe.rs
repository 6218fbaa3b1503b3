// =============================================================================
// Symbol-universe loader
// =============================================================================
//
// Reads the first column of a CSV file of listed codes. A code must be six
// ASCII digits; anything else is skipped with a warning (a lone header row is
// skipped silently). Duplicates are dropped, first occurrence wins.
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Load and validate the symbol universe from `path`.
pub fn load_universe(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open universe file {}", path.display()))?;

    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("bad record at line {}", i + 1))?;
        let Some(raw) = record.get(0) else {
            continue;
        };
        let code = raw.trim();
        if code.is_empty() {
            continue;
        }

        if !is_valid_code(code) {
            // The first row is commonly a header; anything later is noise.
            if i > 0 {
                warn!(line = i + 1, code, "skipping invalid symbol code");
            }
            continue;
        }

        if seen.insert(code.to_string()) {
            symbols.push(code.to_string());
        }
    }

    info!(path = %path.display(), symbols = symbols.len(), "symbol universe loaded");
    Ok(symbols)
}

fn is_valid_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tandem_{}_{name}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_first_column_and_validates() {
        let path = write_tmp(
            "universe.csv",
            "code,name\n005930,Samsung Electronics\n000660,SK hynix\nbadrow,x\n035420,NAVER\n",
        );
        let symbols = load_universe(&path).unwrap();
        assert_eq!(symbols, vec!["005930", "000660", "035420"]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn dedups_preserving_order() {
        let path = write_tmp("universe_dup.csv", "005930\n000660\n005930\n");
        let symbols = load_universe(&path).unwrap();
        assert_eq!(symbols, vec!["005930", "000660"]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_universe("/nonexistent/universe.csv").is_err());
    }

    #[test]
    fn code_validation() {
        assert!(is_valid_code("005930"));
        assert!(!is_valid_code("5930"));
        assert!(!is_valid_code("00593A"));
        assert!(!is_valid_code("0059300"));
    }
}
