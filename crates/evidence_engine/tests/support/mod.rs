#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use evidence_engine::{
    DownloadDescriptor, EvidenceItem, EvidenceSource, EvidenceUrl, Page, ProgressSink,
    RetryPolicy, SourceError,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(export_logging::initialize_for_tests);
}

/// Retry policy with the default shape but millisecond delays.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
    }
}

pub fn descriptor(url: impl Into<String>, file_name: &str, group_key: &str) -> DownloadDescriptor {
    DownloadDescriptor {
        url: url.into(),
        suggested_file_name: file_name.to_string(),
        group_key: group_key.to_string(),
    }
}

pub struct RecordingSink<E> {
    events: Mutex<Vec<E>>,
}

impl<E: Clone> RecordingSink<E> {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().unwrap().clone()
    }
}

impl<E: Send> ProgressSink<E> for RecordingSink<E> {
    fn emit(&self, event: E) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory evidence listing. Evidence pages are chained with `page-N` cursors.
#[derive(Default)]
pub struct FakeSource {
    pub evidence_pages: Vec<Vec<EvidenceItem>>,
    pub urls: HashMap<String, Result<Vec<EvidenceUrl>, SourceError>>,
    pub discovery_error: Option<SourceError>,
    /// Keep handing out a next cursor forever.
    pub endless: bool,
    pub evidence_calls: AtomicUsize,
}

impl FakeSource {
    /// `sizes.len()` pages of evidence, each item with one URL under `base_url`.
    pub fn with_pages(sizes: &[usize], base_url: &str) -> Self {
        let mut source = FakeSource::default();
        let mut n = 0;
        for size in sizes {
            let mut page = Vec::new();
            for _ in 0..*size {
                let id = format!("ev-{n:04}");
                source.urls.insert(
                    id.clone(),
                    Ok(vec![EvidenceUrl {
                        url: format!("{base_url}/files/{id}.pdf"),
                        filename: Some(format!("{id}.pdf")),
                        ..EvidenceUrl::default()
                    }]),
                );
                page.push(EvidenceItem {
                    id,
                    name: format!("Evidence {n}"),
                });
                n += 1;
            }
            source.evidence_pages.push(page);
        }
        source
    }
}

#[async_trait::async_trait]
impl EvidenceSource for FakeSource {
    async fn list_evidence(
        &self,
        _audit_id: &str,
        _page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<EvidenceItem>, SourceError> {
        self.evidence_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.discovery_error {
            return Err(err.clone());
        }
        let page_no = cursor
            .and_then(|c| c.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        let items = self.evidence_pages.get(page_no).cloned().unwrap_or_default();
        let next_cursor = if self.endless || page_no + 1 < self.evidence_pages.len() {
            Some(format!("page-{}", page_no + 1))
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    async fn list_evidence_urls(
        &self,
        _audit_id: &str,
        evidence_id: &str,
        _page_size: usize,
        _cursor: Option<&str>,
    ) -> Result<Page<EvidenceUrl>, SourceError> {
        match self.urls.get(evidence_id) {
            Some(Ok(urls)) => Ok(Page::last(urls.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(Page::last(Vec::new())),
        }
    }
}
