use std::borrow::Cow;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use export_logging::export_debug;
use flate2::write::{GzDecoder, ZlibDecoder};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_ENCODING, LOCATION};
use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::persist::{commit_part, discard_part, part_path, PersistError};
use crate::{FailureKind, TransferError};

/// Callback fed `(received_wire_bytes, declared_content_length)` as a body streams in.
pub type ByteProgress<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Longest pause allowed between two reads of a response body.
    pub read_timeout: Duration,
    pub redirect_limit: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            redirect_limit: 5,
            user_agent: concat!("evidence-export/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` into `target`, returning the size of the file on disk.
    ///
    /// The body goes to a `.part` sibling first and is renamed onto `target`
    /// only once complete; on failure no file is left at either path.
    async fn fetch_to_file(
        &self,
        url: &str,
        target: &Path,
        progress: &ByteProgress<'_>,
    ) -> Result<u64, TransferError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, TransferError> {
        // Redirects are followed by hand so every hop is counted and resolved here.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| TransferError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    async fn stream_body(
        &self,
        response: reqwest::Response,
        target: &Path,
        progress: &ByteProgress<'_>,
    ) -> Result<u64, TransferError> {
        let declared = response.content_length();
        let mut decoder = BodyDecoder::for_encoding(
            response
                .headers()
                .get(CONTENT_ENCODING)
                .and_then(|value| value.to_str().ok()),
        );

        let part = part_path(target);
        let result = async {
            let mut file = tokio::fs::File::create(&part).await.map_err(io_error)?;
            let mut received: u64 = 0;
            progress(received, declared);

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(map_body_error)?;
                received += chunk.len() as u64;
                let decoded = decoder.feed(&chunk).map_err(decode_error)?;
                if !decoded.is_empty() {
                    file.write_all(&decoded).await.map_err(io_error)?;
                }
                progress(received, declared);
            }

            let tail = decoder.finish().map_err(decode_error)?;
            file.write_all(&tail).await.map_err(io_error)?;
            file.flush().await.map_err(io_error)?;
            file.sync_all().await.map_err(io_error)?;
            drop(file);

            commit_part(&part, target).await.map_err(persist_error)
        }
        .await;

        if result.is_err() {
            discard_part(&part).await;
        }
        result
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch_to_file(
        &self,
        url: &str,
        target: &Path,
        progress: &ByteProgress<'_>,
    ) -> Result<u64, TransferError> {
        let mut current = validate_url(url)?;
        let mut hops = 0usize;

        loop {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(map_request_error)?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    if hops >= self.settings.redirect_limit {
                        return Err(TransferError::new(
                            FailureKind::TooManyRedirects,
                            format!("more than {} redirects", self.settings.redirect_limit),
                        ));
                    }
                    let location = location.to_str().map_err(|_| {
                        TransferError::new(FailureKind::InvalidUrl, "redirect location is not valid text")
                    })?;
                    let next = current.join(location).map_err(|err| {
                        TransferError::new(FailureKind::InvalidUrl, format!("bad redirect location: {err}"))
                    })?;
                    let next = validate_url(next.as_str())?;
                    hops += 1;
                    export_debug!(
                        "Redirect {} for {:?}: {} -> {}",
                        hops,
                        target,
                        current.host_str().unwrap_or("?"),
                        next.host_str().unwrap_or("?")
                    );
                    current = next;
                    continue;
                }
            }

            if !status.is_success() {
                return Err(TransferError::new(
                    FailureKind::HttpStatus(status.as_u16()),
                    format!(
                        "HTTP {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("")
                    )
                    .trim_end()
                    .to_string(),
                ));
            }

            return self.stream_body(response, target, progress).await;
        }
    }
}

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_url(url: &str) -> Result<Url, TransferError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(TransferError::new(
            FailureKind::InvalidUrl,
            "Invalid or missing download URL",
        ));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|err| TransferError::new(FailureKind::InvalidUrl, err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        scheme => Err(TransferError::new(
            FailureKind::InvalidUrl,
            format!("unsupported url scheme {scheme:?}"),
        )),
    }
}

/// Undoes `Content-Encoding` while the body streams to disk.
enum BodyDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl BodyDecoder {
    fn for_encoding(encoding: Option<&str>) -> Self {
        match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => BodyDecoder::Gzip(GzDecoder::new(Vec::new())),
            Some("deflate") => BodyDecoder::Deflate(ZlibDecoder::new(Vec::new())),
            Some("identity") | None => BodyDecoder::Identity,
            Some(other) => {
                export_debug!("Unsupported content-encoding {:?}; writing body as received", other);
                BodyDecoder::Identity
            }
        }
    }

    fn feed<'a>(&mut self, chunk: &'a [u8]) -> io::Result<Cow<'a, [u8]>> {
        match self {
            BodyDecoder::Identity => Ok(Cow::Borrowed(chunk)),
            BodyDecoder::Gzip(decoder) => {
                decoder.write_all(chunk)?;
                Ok(Cow::Owned(std::mem::take(decoder.get_mut())))
            }
            BodyDecoder::Deflate(decoder) => {
                decoder.write_all(chunk)?;
                Ok(Cow::Owned(std::mem::take(decoder.get_mut())))
            }
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            BodyDecoder::Identity => Ok(Vec::new()),
            BodyDecoder::Gzip(decoder) => decoder.finish(),
            BodyDecoder::Deflate(decoder) => decoder.finish(),
        }
    }
}

fn map_request_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() {
        return TransferError::new(FailureKind::Timeout, err.to_string());
    }
    TransferError::new(FailureKind::Network, err.to_string())
}

fn map_body_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() {
        return TransferError::new(FailureKind::Timeout, err.to_string());
    }
    TransferError::new(FailureKind::Stream, err.to_string())
}

fn decode_error(err: io::Error) -> TransferError {
    TransferError::new(FailureKind::Stream, format!("decompression failed: {err}"))
}

fn io_error(err: io::Error) -> TransferError {
    TransferError::new(FailureKind::Io, err.to_string())
}

fn persist_error(err: PersistError) -> TransferError {
    TransferError::new(FailureKind::Io, err.to_string())
}
