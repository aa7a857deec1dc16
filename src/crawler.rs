//! Crawl orchestrator.
//!
//! Drives one browser session through every record and, for each record,
//! every configured page. A failure on any page ends that record early, but
//! the partial record is still returned and the batch moves on.

use std::time::Instant;

use reqwest::Url;
use scraper::Html;
use tokio::task::yield_now;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::CrawlOptions;
use crate::errors::{CrawlError, Result};
use crate::extract::{
    extract_id_from_header, extract_labeled_table, extract_metadata_by_label, extract_text,
    METADATA_LABELS,
};
use crate::ids::IdentifierMap;
use crate::pages::{PageEntry, PageSpec};
use crate::progress::{self, ProgressSender};
use crate::record::{Record, ID_FIELD, MEASURE_NAME_FIELD, METADATA_FIELD};
use crate::session::PageSession;

/// Measure title shown above every section.
pub const MEASURE_NAME_SELECTOR: &str = "div.row.margin-top-10.padding-bottom-15 h1 span";
/// Rows of the free-text metadata block at the top of the primary page.
pub const METADATA_ROW_SELECTOR: &str = "span div.row";
/// First row of the metadata block; carries `CMIT ID: ... |`.
pub const HEADER_ROW_SELECTOR: &str = "span div.row.margin-top-10";

/// Totals for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub records: usize,
    pub failed: usize,
}

pub struct Crawler<S> {
    session: S,
    pages: PageSpec,
    options: CrawlOptions,
    progress: Option<ProgressSender>,
}

impl<S: PageSession> Crawler<S> {
    pub fn new(session: S, pages: PageSpec, options: CrawlOptions) -> Self {
        Self {
            session,
            pages,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Gives the session back, e.g. to restart it between batches.
    pub fn into_session(self) -> S {
        self.session
    }

    /// Scrapes every mapped measure. Returns one record per ID, in map order.
    pub async fn crawl(&mut self, ids: &IdentifierMap) -> (Vec<Record>, CrawlSummary) {
        let total = ids.len();
        let mut results = Vec::with_capacity(total);
        let mut summary = CrawlSummary::default();

        for (i, (cmit_id, &variant_id)) in ids.iter().enumerate() {
            let index = i + 1;
            info!("Scraping {} ({}/{})", cmit_id, index, total);
            progress::emit(&self.progress, index, total, cmit_id);
            // Session calls block the thread; let subscribers take the event first.
            yield_now().await;

            let mut record = Record::new(cmit_id, variant_id);
            if let Err(e) = self.scrape_record(&mut record, variant_id).await {
                error!("Failed on {}: {}", cmit_id, e);
                summary.failed += 1;
            }
            results.push(record);
        }

        summary.records = results.len();
        info!(
            "Crawl finished: {} records, {} with errors",
            summary.records, summary.failed
        );
        (results, summary)
    }

    async fn scrape_record(&mut self, record: &mut Record, variant_id: u64) -> Result<()> {
        let pages: Vec<(String, PageEntry)> = self
            .pages
            .iter()
            .map(|(name, entry)| (name.to_string(), entry.clone()))
            .collect();

        for (name, entry) in pages {
            let url = entry.url_for(variant_id);
            self.session.navigate(&url)?;
            if self.options.reload_after_navigate {
                self.session.reload()?;
            }
            self.await_ready(&url).await?;

            let html = self.session.content()?;
            let base = Url::parse(&self.session.current_url())
                .or_else(|_| Url::parse(&url))
                .ok();
            self.extract_page(record, &name, &entry, &html, base.as_ref())?;
        }
        Ok(())
    }

    fn extract_page(
        &self,
        record: &mut Record,
        name: &str,
        entry: &PageEntry,
        html: &str,
        base: Option<&Url>,
    ) -> Result<()> {
        let document = Html::parse_document(html);

        if name == self.options.primary_page {
            let measure_name = extract_text(&document, MEASURE_NAME_SELECTOR)?;
            record.insert_text(MEASURE_NAME_FIELD, measure_name);

            let metadata =
                extract_metadata_by_label(&document, METADATA_ROW_SELECTOR, &METADATA_LABELS)?;
            record.insert_nested(METADATA_FIELD, metadata);

            if let Some(header) = extract_id_from_header(&document, HEADER_ROW_SELECTOR) {
                if let Some(shown) = header.get(ID_FIELD) {
                    if shown != record.id() {
                        warn!("{} page shows CMIT ID {} for {}", name, shown, record.id());
                    }
                }
            }
        }

        let table = extract_labeled_table(&document, &entry.css_selector, base)?;
        if table.failed_rows > 0 {
            warn!(
                "{}: skipped {} unreadable rows on {}",
                record.id(),
                table.failed_rows,
                name
            );
        }
        record.insert_nested(name, table.fields);
        Ok(())
    }

    /// Polls until the loading indicator is gone or the timeout elapses.
    async fn await_ready(&mut self, url: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.session.is_ready(&self.options.loading_indicator)? {
                debug!("{} ready after {:?}", url, started.elapsed());
                return Ok(());
            }
            if started.elapsed() >= self.options.ready_timeout {
                return Err(CrawlError::ReadinessTimeout {
                    url: url.to_string(),
                    waited: started.elapsed(),
                });
            }
            sleep(self.options.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, NOT_AVAILABLE, VARIANT_FIELD};
    use indexmap::IndexMap;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn spec() -> PageSpec {
        PageSpec::from_json(
            r#"{"page": {
                "Properties": {"url": "https://cmit.test/v/{variantId}/1", "css_selector": "div.props div.row"},
                "Groups": {"url": "https://cmit.test/v/{variantId}/4", "css_selector": "div.groups div.row"}
            }}"#,
        )
        .unwrap()
    }

    fn properties_html(id: &str, name: &str) -> String {
        format!(
            r#"<html><body>
            <div class="row margin-top-10 padding-bottom-15"><h1><span>{name}</span></h1></div>
            <span>
                <div class="row margin-top-10">CMIT ID: {id} | Measure Type: Outcome</div>
                <div class="row">Program: Hospital IQR | Revision: </div>
            </span>
            <div class="props">
                <div class="row"><div class="col-md-3">Description</div><div class="col-md-7">About {name}</div></div>
                <div class="row"><div class="col-md-3">Steward</div><div class="col-md-7"><a href="/steward/{id}">Steward</a></div></div>
            </div>
            </body></html>"#
        )
    }

    fn groups_html(group: &str) -> String {
        format!(
            r#"<html><body><div class="groups">
                <div class="row"><div class="col-md-3">Group</div><div class="col-md-7">{group}</div></div>
            </div></body></html>"#
        )
    }

    /// Serves canned pages; navigation to variants in `fail_variants` errors.
    #[derive(Default)]
    struct ScriptedSession {
        pages: IndexMap<String, String>,
        fail_variants: HashSet<u64>,
        never_ready: bool,
        current: String,
        navigations: Vec<String>,
        /// Events a subscriber had received, sampled at each navigation.
        delivered: Option<Arc<AtomicUsize>>,
        delivered_at_navigate: Vec<usize>,
    }

    impl PageSession for ScriptedSession {
        fn navigate(&mut self, url: &str) -> Result<()> {
            self.navigations.push(url.to_string());
            if let Some(delivered) = &self.delivered {
                self.delivered_at_navigate
                    .push(delivered.load(Ordering::SeqCst));
            }
            if self
                .fail_variants
                .iter()
                .any(|v| url.contains(&format!("/v/{v}/")))
            {
                return Err(CrawlError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_RESET".to_string(),
                });
            }
            self.current = url.to_string();
            Ok(())
        }
        fn reload(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_ready(&mut self, _indicator: &str) -> Result<bool> {
            Ok(!self.never_ready)
        }
        fn content(&mut self) -> Result<String> {
            Ok(self.pages.get(&self.current).cloned().unwrap_or_default())
        }
        fn current_url(&mut self) -> String {
            self.current.clone()
        }
    }

    fn session_for(ids: &IdentifierMap) -> ScriptedSession {
        let mut session = ScriptedSession::default();
        for (id, variant) in ids {
            session.pages.insert(
                format!("https://cmit.test/v/{variant}/1"),
                properties_html(id, &format!("Measure {variant}")),
            );
            session
                .pages
                .insert(format!("https://cmit.test/v/{variant}/4"), groups_html("Safety"));
        }
        session
    }

    fn five_ids() -> IdentifierMap {
        (1..=5u64).map(|v| (format!("ID-{v}"), v)).collect()
    }

    fn fast_options() -> CrawlOptions {
        CrawlOptions {
            ready_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(5),
            ..CrawlOptions::default()
        }
    }

    #[tokio::test]
    async fn merges_every_page_into_the_record() {
        let ids: IdentifierMap = [("ID-7".to_string(), 7u64)].into_iter().collect();
        let mut crawler = Crawler::new(session_for(&ids), spec(), fast_options());
        let (records, summary) = crawler.crawl(&ids).await;

        assert_eq!(summary, CrawlSummary { records: 1, failed: 0 });
        let record = &records[0];
        assert_eq!(
            record.get(MEASURE_NAME_FIELD),
            Some(&FieldValue::Text("Measure 7".to_string()))
        );
        let Some(FieldValue::Nested(meta)) = record.get(METADATA_FIELD) else {
            panic!("metadata missing");
        };
        assert_eq!(meta["CMIT ID"], "ID-7");
        assert_eq!(meta["Program"], "Hospital IQR");
        assert_eq!(meta["Revision"], NOT_AVAILABLE);

        let Some(FieldValue::Nested(props)) = record.get("Properties") else {
            panic!("properties missing");
        };
        assert_eq!(props["Steward"], "https://cmit.test/steward/ID-7");
        let Some(FieldValue::Nested(groups)) = record.get("Groups") else {
            panic!("groups missing");
        };
        assert_eq!(groups["Group"], "Safety");
    }

    #[tokio::test]
    async fn failure_on_one_record_keeps_the_batch() {
        let ids = five_ids();
        let mut session = session_for(&ids);
        session.fail_variants.insert(3);

        let mut crawler = Crawler::new(session, spec(), fast_options());
        let (records, summary) = crawler.crawl(&ids).await;

        assert_eq!(records.len(), 5);
        assert_eq!(summary.failed, 1);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.id(), format!("ID-{}", i + 1));
            if i == 2 {
                assert!(record.is_identity_only());
                assert_eq!(
                    record.get(VARIANT_FIELD),
                    Some(&FieldValue::Text("3".to_string()))
                );
            } else {
                assert!(record.get("Groups").is_some());
                assert!(record.get(METADATA_FIELD).is_some());
            }
        }
    }

    #[tokio::test]
    async fn readiness_timeout_ends_the_record_only() {
        let ids = five_ids();
        let mut session = session_for(&ids);
        session.never_ready = true;

        let mut crawler = Crawler::new(session, spec(), fast_options());
        let (records, summary) = crawler.crawl(&ids).await;

        assert_eq!(records.len(), 5);
        assert_eq!(summary.failed, 5);
        assert!(records.iter().all(Record::is_identity_only));
        // Only the first page of each record was attempted.
        assert_eq!(crawler.into_session().navigations.len(), 5);
    }

    #[tokio::test]
    async fn missing_measure_title_keeps_earlier_fields_only() {
        let ids: IdentifierMap = [("ID-9".to_string(), 9u64)].into_iter().collect();
        let mut session = session_for(&ids);
        session.pages.insert(
            "https://cmit.test/v/9/1".to_string(),
            "<html><body><p>layout changed</p></body></html>".to_string(),
        );

        let mut crawler = Crawler::new(session, spec(), fast_options());
        let (records, summary) = crawler.crawl(&ids).await;

        assert_eq!(summary.failed, 1);
        assert!(records[0].is_identity_only());
    }

    #[tokio::test]
    async fn progress_is_emitted_once_per_record() {
        let ids = five_ids();
        let (tx, mut rx) = progress::channel();
        let mut crawler =
            Crawler::new(session_for(&ids), spec(), fast_options()).with_progress(tx);
        crawler.crawl(&ids).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push((event.index, event.total));
        }
        assert_eq!(seen, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn subscriber_keeps_up_when_pages_are_ready_at_once() {
        let ids: IdentifierMap = (1..=300u64).map(|v| (format!("ID-{v}"), v)).collect();
        let delivered = Arc::new(AtomicUsize::new(0));
        let lagged = Arc::new(AtomicUsize::new(0));

        let (tx, mut rx) = progress::channel();
        let consumer = {
            let delivered = delivered.clone();
            let lagged = lagged.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(_) => {
                            delivered.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(RecvError::Lagged(n)) => {
                            lagged.fetch_add(n as usize, Ordering::SeqCst);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let mut session = session_for(&ids);
        session.delivered = Some(delivered.clone());
        let mut crawler = Crawler::new(session, spec(), fast_options()).with_progress(tx);
        crawler.crawl(&ids).await;
        let session = crawler.into_session();
        consumer.await.unwrap();

        // Two pages per record; the first navigation of record n sees n events.
        let at_first_page: Vec<usize> = session
            .delivered_at_navigate
            .iter()
            .step_by(2)
            .copied()
            .collect();
        assert_eq!(at_first_page, (1..=300).collect::<Vec<_>>());
        assert_eq!(delivered.load(Ordering::SeqCst), 300);
        assert_eq!(lagged.load(Ordering::SeqCst), 0);
    }
}
