//! HTTP and filesystem primitives for document and stylesheet loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};

use crate::errors::LoadError;

pub(crate) const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub(crate) const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub(crate) const CSS_ACCEPT: &str = "text/css,*/*;q=0.1";

/// Upper bound on fetched document and stylesheet bodies.
const FETCH_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

pub(crate) struct FetchConfig<'a> {
    pub user_agent: &'a str,
    pub authorization: Option<&'a str>,
    pub timeout: Duration,
}

/// Fetch a text resource with a streaming size cap.
pub(crate) async fn fetch_text(
    client: &Client,
    url: &str,
    accept: &str,
    config: &FetchConfig<'_>,
) -> Result<String, LoadError> {
    let mut request = client
        .get(url)
        .timeout(config.timeout)
        .header(USER_AGENT, config.user_agent)
        .header(ACCEPT, accept);
    if let Some(authorization) = config.authorization {
        request = request.header(AUTHORIZATION, authorization);
    }

    let response = request.send().await.map_err(|e| LoadError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoadError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    if let Some(length) = response.content_length() {
        if length > FETCH_LIMIT_BYTES {
            return Err(LoadError::Fetch {
                url: url.to_string(),
                message: format!("response of {length} bytes exceeds the {FETCH_LIMIT_BYTES} byte limit"),
            });
        }
    }

    let capacity = response
        .content_length()
        .unwrap_or(16 * 1024)
        .min(FETCH_LIMIT_BYTES) as usize;
    let mut buffer = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| LoadError::Fetch {
            url: url.to_string(),
            message: format!("failed to read response body: {e}"),
        })?;
        if buffer.len() + chunk.len() > FETCH_LIMIT_BYTES as usize {
            return Err(LoadError::Fetch {
                url: url.to_string(),
                message: format!("response exceeds the {FETCH_LIMIT_BYTES} byte limit"),
            });
        }
        buffer.extend_from_slice(&chunk);
    }

    String::from_utf8(buffer).map_err(|e| LoadError::Fetch {
        url: url.to_string(),
        message: format!("response is not valid UTF-8: {e}"),
    })
}

pub(crate) async fn read_file(path: &Path) -> Result<String, LoadError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })
}

/// Anchor a relative path to the current working directory.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
