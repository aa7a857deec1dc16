//! Field extractors over a rendered page.
//!
//! Everything here works on a parsed `scraper::Html` snapshot, so the same
//! code runs against live pages and fixture HTML.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::errors::{CrawlError, Result};
use crate::record::{Fields, ID_FIELD, NOT_AVAILABLE};

/// Label and value columns of one row in a section table.
pub const LABEL_SELECTOR: &str = "div.col-md-3";
pub const VALUE_SELECTOR: &str = "div.col-md-7";

/// Joins metadata row texts before label scanning.
pub const METADATA_DELIMITER: &str = " | ";

pub const METADATA_LABELS: [&str; 6] = [
    "CMIT Measure ID",
    "CMIT ID",
    "Measure Type",
    "Date of Information",
    "Revision",
    "Program",
];

static HEADER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CMIT ID:\s*([\w-]*)\s*\|").expect("header id pattern"));

static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("link selector"));

pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| CrawlError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

/// Text content with runs of whitespace collapsed to single spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extract_text(page: &Html, selector: &str) -> Result<String> {
    let sel = parse_selector(selector)?;
    page.select(&sel)
        .next()
        .map(element_text)
        .ok_or_else(|| CrawlError::ElementNotFound {
            selector: selector.to_string(),
        })
}

/// Label/value pairs from a section table plus the number of rows skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableExtraction {
    pub fields: Fields,
    pub failed_rows: usize,
}

pub fn extract_labeled_table(
    page: &Html,
    row_selector: &str,
    base_url: Option<&Url>,
) -> Result<TableExtraction> {
    let rows = parse_selector(row_selector)?;
    let label_sel = parse_selector(LABEL_SELECTOR)?;
    let value_sel = parse_selector(VALUE_SELECTOR)?;

    let mut table = TableExtraction::default();
    for (index, row) in page.select(&rows).enumerate() {
        match read_row(row, &label_sel, &value_sel, base_url) {
            Ok((label, value)) => {
                table.fields.insert(label, value);
            }
            Err(e) => {
                warn!("Failed to process row {} of `{}`: {}", index, row_selector, e);
                table.failed_rows += 1;
            }
        }
    }
    debug!(
        "Extracted {} fields from `{}` ({} rows skipped)",
        table.fields.len(),
        row_selector,
        table.failed_rows
    );
    Ok(table)
}

fn read_row(
    row: ElementRef<'_>,
    label_sel: &Selector,
    value_sel: &Selector,
    base_url: Option<&Url>,
) -> Result<(String, String)> {
    let label = row
        .select(label_sel)
        .next()
        .ok_or_else(|| CrawlError::ElementNotFound {
            selector: LABEL_SELECTOR.to_string(),
        })?;
    let value = row
        .select(value_sel)
        .next()
        .ok_or_else(|| CrawlError::ElementNotFound {
            selector: VALUE_SELECTOR.to_string(),
        })?;

    let mut text = element_text(value);
    if let Some(link) = value.select(&LINK).next() {
        text = link
            .value()
            .attr("href")
            .map(|href| resolve_href(href.trim(), base_url))
            .unwrap_or_default();
    }

    let text = if text.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        text
    };
    Ok((element_text(label), text))
}

fn resolve_href(href: &str, base_url: Option<&Url>) -> String {
    match base_url.and_then(|base| base.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

/// Scans `"<label>: "` occurrences in delimiter-joined row text.
pub fn parse_labeled_metadata(text: &str, labels: &[&str]) -> Fields {
    let stop = METADATA_DELIMITER.trim_end();
    labels
        .iter()
        .map(|label| {
            let needle = format!("{label}: ");
            let value = text
                .find(&needle)
                .map(|start| {
                    let rest = &text[start + needle.len()..];
                    let end = rest.find(stop).unwrap_or(rest.len());
                    rest[..end].trim()
                })
                .filter(|v| !v.is_empty())
                .unwrap_or(NOT_AVAILABLE);
            (label.to_string(), value.to_string())
        })
        .collect()
}

pub fn extract_metadata_by_label(page: &Html, row_selector: &str, labels: &[&str]) -> Result<Fields> {
    let rows = parse_selector(row_selector)?;
    let joined = page
        .select(&rows)
        .map(element_text)
        .collect::<Vec<_>>()
        .join(METADATA_DELIMITER);
    Ok(parse_labeled_metadata(&joined, labels))
}

/// Outcome of scanning a header row for the CMIT ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderId {
    Found(String),
    /// The label is present with nothing after it.
    Blank,
    /// The expected `CMIT ID: ... |` shape is not there; the layout has likely changed.
    Mismatch,
}

pub fn parse_header_id(text: &str) -> HeaderId {
    match HEADER_ID.captures(text) {
        Some(caps) => {
            let value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if value.is_empty() {
                HeaderId::Blank
            } else {
                HeaderId::Found(value.to_string())
            }
        }
        None => HeaderId::Mismatch,
    }
}

/// `None` signals a structural mismatch, not an empty field.
pub fn extract_id_from_header(page: &Html, row_selector: &str) -> Option<Fields> {
    let rows = match parse_selector(row_selector) {
        Ok(sel) => sel,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };
    let Some(first) = page.select(&rows).next() else {
        warn!("No header row matches `{}`; page structure might have changed", row_selector);
        return None;
    };

    let value = match parse_header_id(&element_text(first)) {
        HeaderId::Found(id) => id,
        HeaderId::Blank => NOT_AVAILABLE.to_string(),
        HeaderId::Mismatch => {
            warn!("Failed to match CMIT ID pattern; page structure might have changed");
            return None;
        }
    };
    let mut fields = Fields::new();
    fields.insert(ID_FIELD.to_string(), value);
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{body}</body></html>"))
    }

    #[test]
    fn text_is_trimmed_and_collapsed() {
        let doc = page(
            r#"<div class="row margin-top-10 padding-bottom-15"><h1><span>
                Hospital   Readmission Rate
            </span></h1></div>"#,
        );
        assert_eq!(
            extract_text(&doc, "div.row.margin-top-10.padding-bottom-15 h1 span").unwrap(),
            "Hospital Readmission Rate"
        );
    }

    #[test]
    fn missing_text_element_is_element_not_found() {
        let doc = page("<p>nothing here</p>");
        assert!(matches!(
            extract_text(&doc, "h1 span"),
            Err(CrawlError::ElementNotFound { .. })
        ));
    }

    #[test]
    fn table_prefers_link_target_over_display_text() {
        let doc = page(
            r#"<div id="props">
                <div class="row"><div class="col-md-3">Steward</div>
                    <div class="col-md-7"><a href="https://steward.example/org">Steward Org</a></div></div>
                <div class="row"><div class="col-md-3">Specs</div>
                    <div class="col-md-7"><a href="/docs/spec.pdf">Download</a></div></div>
            </div>"#,
        );
        let base = Url::parse("https://cmit.example/cmit/").unwrap();
        let table = extract_labeled_table(&doc, "#props div.row", Some(&base)).unwrap();

        assert_eq!(table.fields["Steward"], "https://steward.example/org");
        assert_eq!(table.fields["Specs"], "https://cmit.example/docs/spec.pdf");
        assert!(!table.fields.values().any(|v| v == "Steward Org" || v == "Download"));
    }

    #[test]
    fn table_marks_empty_values_not_available() {
        let doc = page(
            r#"<div id="props">
                <div class="row"><div class="col-md-3">Description</div><div class="col-md-7">   </div></div>
                <div class="row"><div class="col-md-3">Type</div><div class="col-md-7">Outcome</div></div>
            </div>"#,
        );
        let table = extract_labeled_table(&doc, "#props div.row", None).unwrap();
        assert_eq!(table.fields["Description"], NOT_AVAILABLE);
        assert_eq!(table.fields["Type"], "Outcome");
        assert!(table.fields.values().all(|v| !v.is_empty()));
    }

    #[test]
    fn table_skips_broken_rows_and_keeps_the_rest() {
        let doc = page(
            r#"<div id="props">
                <div class="row"><div class="col-md-3">First</div><div class="col-md-7">1</div></div>
                <div class="row"><div class="col-md-3">Orphan label</div></div>
                <div class="row"><div class="col-md-3">Third</div><div class="col-md-7">3</div></div>
            </div>"#,
        );
        let table = extract_labeled_table(&doc, "#props div.row", None).unwrap();
        assert_eq!(table.failed_rows, 1);
        assert_eq!(
            table.fields.keys().collect::<Vec<_>>(),
            vec!["First", "Third"]
        );
    }

    #[test]
    fn table_with_no_rows_is_empty_not_an_error() {
        let table = extract_labeled_table(&page("<p></p>"), "#props div.row", None).unwrap();
        assert!(table.fields.is_empty());
        assert_eq!(table.failed_rows, 0);
    }

    #[test]
    fn metadata_scan_fills_missing_labels() {
        let fields = parse_labeled_metadata(
            "CMIT ID: X1 | Measure Type: Y1 | Program: Z1",
            &["CMIT ID", "Measure Type", "Program", "Revision"],
        );
        let expected: Vec<(&str, &str)> = vec![
            ("CMIT ID", "X1"),
            ("Measure Type", "Y1"),
            ("Program", "Z1"),
            ("Revision", NOT_AVAILABLE),
        ];
        let actual: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn metadata_scan_does_not_confuse_similar_labels() {
        let fields = parse_labeled_metadata(
            "CMIT Measure ID: 00123 | CMIT ID: 00123-01 | Revision:  | Date of Information: 2025-04-01",
            &METADATA_LABELS,
        );
        assert_eq!(fields["CMIT Measure ID"], "00123");
        assert_eq!(fields["CMIT ID"], "00123-01");
        assert_eq!(fields["Revision"], NOT_AVAILABLE);
        assert_eq!(fields["Date of Information"], "2025-04-01");
        assert_eq!(fields["Program"], NOT_AVAILABLE);
    }

    #[test]
    fn metadata_rows_are_joined_from_the_page() {
        let doc = page(
            r#"<span>
                <div class="row margin-top-10">CMIT ID: 0042-03 | Measure Type: Process</div>
                <div class="row">Program: Hospital IQR</div>
            </span>"#,
        );
        let fields = extract_metadata_by_label(&doc, "span div.row", &METADATA_LABELS).unwrap();
        assert_eq!(fields["CMIT ID"], "0042-03");
        assert_eq!(fields["Measure Type"], "Process");
        assert_eq!(fields["Program"], "Hospital IQR");
        assert_eq!(fields.len(), METADATA_LABELS.len());
    }

    #[test]
    fn header_id_found_blank_and_mismatch() {
        assert_eq!(
            parse_header_id("CMIT ID: ABC123 | other"),
            HeaderId::Found("ABC123".to_string())
        );
        assert_eq!(parse_header_id("CMIT ID:  | other"), HeaderId::Blank);
        assert_eq!(parse_header_id("Measure Type: Outcome | other"), HeaderId::Mismatch);
    }

    #[test]
    fn header_extraction_distinguishes_blank_from_mismatch() {
        let found = page(r#"<span><div class="row margin-top-10">CMIT ID: ABC123 | other</div></span>"#);
        let blank = page(r#"<span><div class="row margin-top-10">CMIT ID:  | other</div></span>"#);
        let changed = page(r#"<span><div class="row margin-top-10">Identifier ABC123</div></span>"#);
        let sel = "span div.row.margin-top-10";

        assert_eq!(extract_id_from_header(&found, sel).unwrap()["CMIT ID"], "ABC123");
        assert_eq!(extract_id_from_header(&blank, sel).unwrap()["CMIT ID"], NOT_AVAILABLE);
        assert!(extract_id_from_header(&changed, sel).is_none());
        assert!(extract_id_from_header(&page("<p></p>"), sel).is_none());
    }
}
