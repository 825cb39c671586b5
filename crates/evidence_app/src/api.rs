use std::time::Duration;

use evidence_engine::{
    retry_with_backoff, EvidenceItem, EvidenceSource, EvidenceUrl, Page, RetryPolicy, SourceError,
};
use export_logging::{export_debug, export_warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::{AuthError, TokenProvider};
use crate::cli::Region;
use crate::config::ApiSettings;

const AUDIT_PAGE_SIZE: usize = 100;
const MAX_AUDIT_PAGES: usize = 100;

/// `{ results: { data: [...], pageInfo: { hasNextPage, endCursor } } }`
#[derive(Deserialize)]
struct Envelope<T> {
    results: Results<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Results<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

impl<T> Results<T> {
    fn into_page<U>(self, convert: impl FnMut(T) -> Option<U>) -> Page<U> {
        let next_cursor = self
            .page_info
            .filter(|info| info.has_next_page)
            .and_then(|info| info.end_cursor)
            .filter(|cursor| !cursor.is_empty());
        Page {
            items: self.data.into_iter().filter_map(convert).collect(),
            next_cursor,
        }
    }
}

#[derive(Deserialize)]
struct WireEvidence {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUrl {
    url: Option<String>,
    id: Option<String>,
    filename: Option<String>,
    is_downloadable: Option<bool>,
}

/// One row of the audit listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuditSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Audit API client backing the evidence gatherer.
pub struct VantaClient {
    http: reqwest::Client,
    origin: String,
    region: Region,
    tokens: TokenProvider,
    retry: RetryPolicy,
}

impl VantaClient {
    pub fn new(http: reqwest::Client, api: &ApiSettings, tokens: TokenProvider) -> Self {
        Self {
            http,
            origin: api.origin.clone(),
            region: api.region,
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the HTTP client shared by the API and the token exchange.
    pub fn http_client() -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("evidence-export/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    /// Cheap authenticated call that surfaces credential and region problems
    /// before any export work starts.
    pub async fn validate(&self) -> Result<(), SourceError> {
        let _: Page<AuditSummary> = self
            .get_page("/v1/audits", &[("pageSize", "1".to_string())], Some)
            .await?;
        Ok(())
    }

    pub async fn list_audits(&self) -> Result<Vec<AuditSummary>, SourceError> {
        let mut audits = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_AUDIT_PAGES {
            let page = self
                .get_page("/v1/audits", &page_query(AUDIT_PAGE_SIZE, cursor.as_deref()), Some)
                .await?;
            audits.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(audits),
            }
        }
        export_warn!("Audit listing stopped after {} pages", MAX_AUDIT_PAGES);
        Ok(audits)
    }

    async fn get_page<T, U>(
        &self,
        path: &str,
        query: &[(&str, String)],
        convert: impl Fn(T) -> Option<U> + Copy,
    ) -> Result<Page<U>, SourceError>
    where
        T: DeserializeOwned,
    {
        retry_with_backoff(&self.retry, |_| async move {
            let envelope: Envelope<T> = self.get_json(path, query).await?;
            Ok(envelope.results.into_page(convert))
        })
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let mut url = url::Url::parse(&format!("{}{}", self.origin, path))
            .map_err(|err| SourceError::Decode(format!("bad request url: {err}")))?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        export_debug!("GET {}", url);

        let token = self.tokens.bearer().await.map_err(auth_error)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| SourceError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate();
            }
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))
    }

    fn status_error(&self, status: StatusCode, body: &str) -> SourceError {
        match status {
            StatusCode::UNAUTHORIZED => SourceError::Auth(
                "Invalid token or credentials. Please check your API settings.".to_string(),
            ),
            StatusCode::FORBIDDEN => SourceError::Auth(
                "Your credentials don't have permission to access the Auditor API. Please check your scope settings."
                    .to_string(),
            ),
            StatusCode::NOT_FOUND => SourceError::Http {
                status: 404,
                message: format!(
                    "Not found. Check the audit id and your region (current: {:?}, {}) or server URL.",
                    self.region, self.origin
                ),
            },
            _ => {
                let snippet: String = body.trim().chars().take(200).collect();
                let reason = status.canonical_reason().unwrap_or("");
                SourceError::Http {
                    status: status.as_u16(),
                    message: if snippet.is_empty() {
                        reason.to_string()
                    } else {
                        format!("{reason}: {snippet}")
                    },
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl EvidenceSource for VantaClient {
    async fn list_evidence(
        &self,
        audit_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<EvidenceItem>, SourceError> {
        let path = format!("/v1/audits/{}/evidence", encode_segment(audit_id));
        self.get_page(&path, &page_query(page_size, cursor), |wire: WireEvidence| {
            let id = wire.id.filter(|id| !id.is_empty())?;
            Some(EvidenceItem {
                id,
                name: wire.name.unwrap_or_default(),
            })
        })
        .await
    }

    async fn list_evidence_urls(
        &self,
        audit_id: &str,
        evidence_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<EvidenceUrl>, SourceError> {
        let path = format!(
            "/v1/audits/{}/evidence/{}/urls",
            encode_segment(audit_id),
            encode_segment(evidence_id)
        );
        self.get_page(&path, &page_query(page_size, cursor), |wire: WireUrl| {
            Some(EvidenceUrl {
                url: wire.url.unwrap_or_default(),
                id: wire.id,
                filename: wire.filename,
                is_downloadable: wire.is_downloadable,
            })
        })
        .await
    }
}

fn page_query(page_size: usize, cursor: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("pageSize", page_size.to_string())];
    if let Some(cursor) = cursor {
        query.push(("pageCursor", cursor.to_string()));
    }
    query
}

/// Percent-encode one path segment.
fn encode_segment(segment: &str) -> String {
    let Ok(mut url) = url::Url::parse("http://segment.invalid/") else {
        return segment.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(segment);
    }
    url.path().trim_start_matches('/').to_string()
}

fn auth_error(err: AuthError) -> SourceError {
    match err {
        AuthError::Network(message) => SourceError::Network(message),
        other => SourceError::Auth(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(encode_segment("abc-123"), "abc-123");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn last_page_has_no_cursor() {
        let results: Results<u32> = serde_json::from_str(
            r#"{"data":[1,2],"pageInfo":{"hasNextPage":false,"endCursor":"zz"}}"#,
        )
        .unwrap();
        let page = results.into_page(Some);
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.next_cursor, None);

        let results: Results<u32> =
            serde_json::from_str(r#"{"data":[],"pageInfo":{"hasNextPage":true,"endCursor":""}}"#)
                .unwrap();
        assert_eq!(results.into_page(Some).next_cursor, None);
    }
}
