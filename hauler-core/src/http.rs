use std::io;

use futures_util::TryStreamExt;
use percent_encoding::percent_decode_str;
use reqwest::{
    header::{self, HeaderMap},
    Client, RequestBuilder, Response,
};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::errors::{HaulerError, Result};

/// What a metadata-only request says about the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMeta {
    /// `None` when the header is missing, empty or unparsable.
    pub content_length: Option<u64>,
    pub supports_ranges: bool,
    pub content_type: Option<String>,
    /// Name suggested by `Content-Disposition`, if any.
    pub file_name: Option<String>,
}

impl DownloadMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let supports_ranges = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        let file_name = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(file_name_from_disposition);

        DownloadMeta {
            content_length,
            supports_ranges,
            content_type,
            file_name,
        }
    }
}

/// Pulls the file name out of a `Content-Disposition` value. A plain
/// `filename=` wins over the extended `filename*=` form, which is
/// percent-decoded as UTF-8.
pub fn file_name_from_disposition(value: &str) -> Option<String> {
    let mut extended = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => {
                let name = raw.trim_matches('"').trim();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
            "filename*" => {
                let name = raw.rsplit_once("''").map(|(_, n)| n).unwrap_or(raw);
                let name = percent_decode_str(name.trim_matches('"').trim()).decode_utf8_lossy();
                if !name.is_empty() {
                    extended = Some(name.into_owned());
                }
            }
            _ => {}
        }
    }
    extended
}

/// Issues a `HEAD` request for `url`.
pub async fn probe(client: &Client, url: &str) -> Result<DownloadMeta> {
    let response = send(client.head(url), url).await?;
    let meta = DownloadMeta::from_headers(response.headers());
    debug!(url, length = ?meta.content_length, ranges = meta.supports_ranges, "probed");
    Ok(meta)
}

/// Sends the request and turns any non-success status into
/// [`HaulerError::Transport`], keeping the body for diagnostics.
pub(crate) async fn send(request: RequestBuilder, url: &str) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| HaulerError::network(url, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HaulerError::Transport {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Exposes the response body as a reader.
pub(crate) fn body_reader(response: Response) -> impl AsyncRead + Unpin + Send {
    let stream = response
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    StreamReader::new(Box::pin(stream))
}
