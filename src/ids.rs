//! Builds the CMIT ID → variant ID map the crawl runs over.
//!
//! The master file is a CSV with `cmit_id` and `variant_id` columns; the
//! target file lists the IDs to scrape, one per line.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::errors::{CrawlError, Result};

pub type IdentifierMap = IndexMap<String, u64>;

fn parse_variant(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    // Spreadsheet exports often write integers as "123.0".
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.fract() == 0.0 && *f >= 0.0)
        .map(|f| f as u64)
}

pub fn load_master(path: &Path) -> Result<IdentifierMap> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| CrawlError::IdentifierMap(format!("{}: {e}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|e| CrawlError::IdentifierMap(format!("{}: {e}", path.display())))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                CrawlError::IdentifierMap(format!("{} has no `{name}` column", path.display()))
            })
    };
    let id_col = column("cmit_id")?;
    let variant_col = column("variant_id")?;

    let mut map = IdentifierMap::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| CrawlError::IdentifierMap(format!("{}: {e}", path.display())))?;
        let id = row.get(id_col).unwrap_or("").trim();
        if id.is_empty() {
            continue;
        }
        let variant = row
            .get(variant_col)
            .and_then(parse_variant)
            .ok_or_else(|| {
                CrawlError::IdentifierMap(format!(
                    "{} row {}: invalid variant_id for {id}",
                    path.display(),
                    line + 2
                ))
            })?;
        map.insert(id.to_string(), variant);
    }
    Ok(map)
}

/// Reads target IDs from a text file; only the first column of each line counts.
pub fn load_targets(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| CrawlError::IdentifierMap(format!("{}: {e}", path.display())))?;
    Ok(parse_targets(&raw))
}

pub fn parse_targets(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| line.split(',').next().unwrap_or("").trim())
        .filter(|id| !id.is_empty() && !id.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Master rows whose ID is targeted, in master order.
pub fn build_identifier_map(master: &IdentifierMap, targets: &[String]) -> IdentifierMap {
    let wanted: HashSet<&str> = targets.iter().map(String::as_str).collect();
    for id in &wanted {
        if !master.contains_key(*id) {
            warn!("Target {} is not in the master mapping; skipping", id);
        }
    }
    let map: IdentifierMap = master
        .iter()
        .filter(|(id, _)| wanted.contains(id.as_str()))
        .map(|(id, v)| (id.clone(), *v))
        .collect();
    info!("Selected {} of {} mapped measures", map.len(), master.len());
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn master_headers_are_case_insensitive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.csv");
        fs::write(&path, " CMIT_ID ,Variant_ID\n00123-01,1001\n00456-02,1002.0\n").unwrap();

        let master = load_master(&path).unwrap();
        assert_eq!(master["00123-01"], 1001);
        assert_eq!(master["00456-02"], 1002);
    }

    #[test]
    fn bad_variant_names_the_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.csv");
        fs::write(&path, "cmit_id,variant_id\nA,1\nB,abc\n").unwrap();
        let err = load_master(&path).unwrap_err().to_string();
        assert!(err.contains("row 3"));
    }

    #[test]
    fn targets_skip_blanks_and_comments() {
        let ids = parse_targets("00123-01\n\n# skip me\n00456-02, extra\n");
        assert_eq!(ids, vec!["00123-01", "00456-02"]);
    }

    #[test]
    fn filter_keeps_master_order() {
        let mut master = IdentifierMap::new();
        master.insert("C".to_string(), 3);
        master.insert("A".to_string(), 1);
        master.insert("B".to_string(), 2);

        let map = build_identifier_map(
            &master,
            &["B".to_string(), "C".to_string(), "Z".to_string()],
        );
        assert_eq!(map.into_iter().collect::<Vec<_>>(), vec![
            ("C".to_string(), 3),
            ("B".to_string(), 2)
        ]);
    }
}
