//! Page table loaded from `cmit_pages.json`.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use scraper::Selector;
use serde::Deserialize;
use tracing::warn;

use crate::errors::{CrawlError, Result};

pub const VARIANT_PLACEHOLDER: &str = "{variantId}";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PageEntry {
    pub url: String,
    pub css_selector: String,
}

impl PageEntry {
    pub fn url_for(&self, variant_id: u64) -> String {
        self.url.replace(VARIANT_PLACEHOLDER, &variant_id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PageSpecFile {
    page: IndexMap<String, PageEntry>,
}

/// Pages visited for every record, in declared order.
#[derive(Debug, Clone, Default)]
pub struct PageSpec {
    pages: IndexMap<String, PageEntry>,
}

impl PageSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| CrawlError::PageSpec {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            CrawlError::PageSpec { reason, .. } => CrawlError::PageSpec {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: PageSpecFile = serde_json::from_str(raw).map_err(|e| CrawlError::PageSpec {
            path: Default::default(),
            reason: e.to_string(),
        })?;
        Self::from_pages(file.page)
    }

    pub fn from_pages(pages: IndexMap<String, PageEntry>) -> Result<Self> {
        for (name, entry) in &pages {
            Selector::parse(&entry.css_selector).map_err(|e| CrawlError::InvalidSelector {
                selector: entry.css_selector.clone(),
                reason: format!("{e:?}"),
            })?;
            if !entry.url.contains(VARIANT_PLACEHOLDER) {
                warn!("Page '{}' URL has no {} placeholder", name, VARIANT_PLACEHOLDER);
            }
        }
        Ok(Self { pages })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PageEntry)> {
        self.pages.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&PageEntry> {
        self.pages.get(name)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"{
        "page": {
            "Properties": {
                "url": "https://cmit.example/#/MeasureView?variantId={variantId}&sectionNumber=1",
                "css_selector": "div.measure-properties div.row"
            },
            "Characteristics": {
                "url": "https://cmit.example/#/MeasureView?variantId={variantId}&sectionNumber=2",
                "css_selector": "div.measure-characteristics div.row"
            },
            "Groups": {
                "url": "https://cmit.example/#/MeasureView?variantId={variantId}&sectionNumber=4",
                "css_selector": "div.measure-groups div.row"
            }
        }
    }"#;

    #[test]
    fn keeps_declared_order() {
        let spec = PageSpec::from_json(SPEC).unwrap();
        let names: Vec<_> = spec.names().collect();
        assert_eq!(names, vec!["Properties", "Characteristics", "Groups"]);
    }

    #[test]
    fn substitutes_variant_id() {
        let spec = PageSpec::from_json(SPEC).unwrap();
        assert_eq!(
            spec.get("Groups").unwrap().url_for(1234),
            "https://cmit.example/#/MeasureView?variantId=1234&sectionNumber=4"
        );
    }

    #[test]
    fn rejects_bad_selectors_up_front() {
        let raw = r#"{"page": {"Broken": {"url": "x?{variantId}", "css_selector": "div[["}}}"#;
        assert!(matches!(
            PageSpec::from_json(raw),
            Err(CrawlError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn missing_page_key_is_a_spec_error() {
        assert!(matches!(
            PageSpec::from_json(r#"{"pages": {}}"#),
            Err(CrawlError::PageSpec { .. })
        ));
    }
}
