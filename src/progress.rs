//! Crawl progress events.
//!
//! The orchestrator emits one `CrawlProgress` at the start of every record on
//! a `tokio::sync::broadcast` channel. When nobody is subscribed the event is
//! dropped.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlProgress {
    /// 1-based position of the record being started.
    pub index: usize,
    pub total: usize,
    pub record_id: String,
}

pub type ProgressSender = tokio::sync::broadcast::Sender<CrawlProgress>;
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<CrawlProgress>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

pub fn emit(tx: &Option<ProgressSender>, index: usize, total: usize, record_id: &str) {
    if let Some(sender) = tx {
        let _ = sender.send(CrawlProgress {
            index,
            total,
            record_id: record_id.to_string(),
        });
    }
}
