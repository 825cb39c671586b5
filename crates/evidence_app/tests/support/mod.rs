#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use evidence_app::api::VantaClient;
use evidence_app::auth::{Credentials, TokenProvider};
use evidence_app::cli::Region;
use evidence_app::config::ApiSettings;
use evidence_engine::{RetryPolicy, TtlCache};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(export_logging::initialize_for_tests);
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
    }
}

pub fn bearer(token: &str) -> Credentials {
    Credentials::Bearer(token.to_string())
}

pub fn client_credentials(id: &str, secret: &str) -> Credentials {
    Credentials::ClientCredentials {
        client_id: id.to_string(),
        client_secret: secret.to_string(),
    }
}

/// Client pointed at a mock server, with fast retries.
pub fn client(origin: &str, credentials: Credentials) -> VantaClient {
    let http = VantaClient::http_client().unwrap();
    let api = ApiSettings {
        origin: origin.to_string(),
        region: Region::Us,
        scope: "auditor-api.audit:read".to_string(),
    };
    let tokens = TokenProvider::new(
        http.clone(),
        origin,
        api.scope.clone(),
        credentials,
        Arc::new(TtlCache::new()),
    )
    .with_retry(fast_retry(2));
    VantaClient::new(http, &api, tokens).with_retry(fast_retry(2))
}

/// `{ results: { data, pageInfo } }` as served by the audit API.
pub fn page(data: serde_json::Value, end_cursor: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "results": {
            "data": data,
            "pageInfo": {
                "hasNextPage": end_cursor.is_some(),
                "endCursor": end_cursor,
            }
        }
    })
}
