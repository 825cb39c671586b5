use thiserror::Error;

use crate::{EvidenceItem, EvidenceUrl, Page};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Paged access to an audit's evidence metadata.
#[async_trait::async_trait]
pub trait EvidenceSource: Send + Sync {
    async fn list_evidence(
        &self,
        audit_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<EvidenceItem>, SourceError>;

    async fn list_evidence_urls(
        &self,
        audit_id: &str,
        evidence_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<EvidenceUrl>, SourceError>;
}
