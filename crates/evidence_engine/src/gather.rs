use std::future::Future;

use export_logging::{export_debug, export_info, export_warn};
use thiserror::Error;

use crate::filename::descriptor_file_name;
use crate::progress::ProgressSink;
use crate::source::{EvidenceSource, SourceError};
use crate::{DownloadDescriptor, GatherPhase, GatherProgress, GatherResult, Page};

#[derive(Debug, Clone)]
pub struct GatherSettings {
    pub page_size: usize,
    /// Hard cap on pages read from any one listing; guards against a server
    /// that never stops handing out cursors.
    pub max_pages: usize,
}

impl Default for GatherSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatherError {
    #[error("evidence discovery failed: {0}")]
    Discovery(#[source] SourceError),
}

/// Walk an audit's evidence and flatten every downloadable URL into an
/// ordered descriptor list: page order first, then item order, then URL order.
///
/// Only a failing evidence listing is fatal. An item whose URLs cannot be
/// listed is logged and contributes no descriptors.
pub async fn gather_descriptors(
    source: &dyn EvidenceSource,
    audit_id: &str,
    settings: &GatherSettings,
    sink: &dyn ProgressSink<GatherProgress>,
) -> Result<GatherResult, GatherError> {
    sink.emit(progress(
        GatherPhase::Discovering,
        0,
        0,
        "Discovering evidence items...".to_string(),
    ));

    let (evidence, mut truncated) = collect_pages(
        settings.max_pages,
        |cursor| async move {
            source
                .list_evidence(audit_id, settings.page_size, cursor.as_deref())
                .await
        },
        |found| {
            export_debug!("Discovered {} evidence items so far", found);
            sink.emit(progress(
                GatherPhase::Discovering,
                found,
                found,
                format!("Found {found} evidence items..."),
            ));
        },
    )
    .await
    .map_err(GatherError::Discovery)?;

    if truncated {
        export_warn!(
            "Evidence listing for audit {} stopped at the {}-page cap; later items were not discovered",
            audit_id,
            settings.max_pages
        );
    }

    let total = evidence.len();
    let mut descriptors = Vec::new();
    for (position, item) in evidence.iter().enumerate() {
        let label = if item.name.trim().is_empty() {
            "evidence"
        } else {
            item.name.as_str()
        };
        sink.emit(progress(
            GatherPhase::Processing,
            position + 1,
            total,
            format!("Processing {label}..."),
        ));

        let listing = collect_pages(
            settings.max_pages,
            |cursor| async move {
                source
                    .list_evidence_urls(audit_id, &item.id, settings.page_size, cursor.as_deref())
                    .await
            },
            |_| {},
        )
        .await;

        let (urls, urls_truncated) = match listing {
            Ok(listing) => listing,
            Err(err) => {
                export_warn!(
                    "Skipping evidence {} ({}): URLs unavailable: {}",
                    item.id,
                    label,
                    err
                );
                continue;
            }
        };
        if urls_truncated {
            export_warn!("URL listing for evidence {} hit the page cap", item.id);
            truncated = true;
        }

        descriptors.extend(
            urls.iter()
                .filter(|entry| !entry.url.trim().is_empty() && entry.is_downloadable != Some(false))
                .map(|entry| DownloadDescriptor {
                    url: entry.url.clone(),
                    suggested_file_name: descriptor_file_name(entry, item),
                    group_key: item.id.clone(),
                }),
        );
    }

    export_info!(
        "Gathered {} downloads from {} evidence items (truncated: {})",
        descriptors.len(),
        total,
        truncated
    );
    sink.emit(progress(
        GatherPhase::Complete,
        descriptors.len(),
        descriptors.len(),
        "Evidence discovery complete".to_string(),
    ));

    Ok(GatherResult {
        descriptors,
        evidence_count: total,
        truncated,
    })
}

/// Follow cursors until the listing ends or `max_pages` pages were read.
/// The flag is true when the cap was hit with a cursor still outstanding.
async fn collect_pages<T, F, Fut>(
    max_pages: usize,
    mut fetch: F,
    mut on_page: impl FnMut(usize),
) -> Result<(Vec<T>, bool), SourceError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, SourceError>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..max_pages {
        let page = fetch(cursor.take()).await?;
        items.extend(page.items);
        on_page(items.len());
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok((items, false)),
        }
    }
    Ok((items, cursor.is_some()))
}

fn progress(phase: GatherPhase, current: usize, total: usize, message: String) -> GatherProgress {
    GatherProgress {
        phase,
        current,
        total,
        message,
    }
}
