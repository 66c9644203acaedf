//! Base64 inlining of small image assets referenced from critical CSS
//!
//! References are gathered across the whole stylesheet first so each asset
//! is fetched once, then rewritten in place. A missing, oversized or
//! unfetchable asset keeps its original reference; image inlining never
//! fails the pipeline.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};

use super::stylesheet::Stylesheet;
use super::transform::{TransformContext, for_each_value_mut};
use super::urls;
use crate::document::loader::CHROME_USER_AGENT;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

pub(crate) async fn inline_images(
    sheet: &mut Stylesheet,
    max_file_size: u64,
    cx: &TransformContext<'_>,
) {
    let mut references: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    for_each_value_mut(&mut sheet.rules, &mut |value| {
        urls::visit_urls(value, |reference| {
            if seen.insert(reference.to_string()) {
                references.push(reference.to_string());
            }
        });
    });

    if references.is_empty() {
        return;
    }

    let lookups = references.into_iter().map(|reference| async move {
        let data_uri = resolve_reference(&reference, max_file_size, cx).await;
        (reference, data_uri)
    });

    let resolved: HashMap<String, String> = join_all(lookups)
        .await
        .into_iter()
        .filter_map(|(reference, data_uri)| data_uri.map(|uri| (reference, uri)))
        .collect();

    if resolved.is_empty() {
        return;
    }

    for_each_value_mut(&mut sheet.rules, &mut |value| {
        if urls::contains_url(value) {
            *value = urls::rewrite_urls(value, |reference| resolved.get(reference).cloned());
        }
    });
}

async fn resolve_reference(
    reference: &str,
    max_file_size: u64,
    cx: &TransformContext<'_>,
) -> Option<String> {
    if urls::is_data_uri(reference) {
        return None;
    }

    // Only references with a recognized image extension are inlined; fonts
    // and other assets keep their URLs.
    let fallback_mime = mime_for_extension(reference)?;

    if urls::is_remote_url(reference) {
        let url = if let Some(rest) = reference.trim().strip_prefix("//") {
            format!("https://{rest}")
        } else {
            reference.trim().to_string()
        };
        return fetch_remote_image(cx.client, &url, fallback_mime, max_file_size, cx.fetch_timeout)
            .await;
    }

    if let Some(base) = cx.base_url {
        let url = urls::join_url(base, reference)?;
        return fetch_remote_image(cx.client, &url, fallback_mime, max_file_size, cx.fetch_timeout)
            .await;
    }

    read_local_image(reference, fallback_mime, max_file_size, cx.asset_paths).await
}

async fn fetch_remote_image(
    client: &Client,
    url: &str,
    fallback_mime: &'static str,
    max_file_size: u64,
    timeout: Duration,
) -> Option<String> {
    let response = match client
        .get(url)
        .timeout(timeout)
        .header(USER_AGENT, CHROME_USER_AGENT)
        .header(ACCEPT, IMAGE_ACCEPT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            log::warn!("failed to fetch image {url}: {e}");
            return None;
        }
    };

    if !response.status().is_success() {
        log::warn!("image request for {url} returned {}", response.status());
        return None;
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .filter(|value| value.starts_with("image/"))
        .unwrap_or_else(|| fallback_mime.to_string());

    if let Some(length) = response.content_length() {
        if length > max_file_size {
            log::debug!("image {url} is {length} bytes, keeping original reference");
            return None;
        }
    }

    let capacity = response
        .content_length()
        .unwrap_or(8 * 1024)
        .min(max_file_size) as usize;
    let mut buffer = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                if buffer.len() + chunk.len() > max_file_size as usize {
                    log::debug!("image {url} exceeds inline limit, keeping original reference");
                    return None;
                }
                buffer.extend_from_slice(&chunk);
            }
            Err(e) => {
                log::warn!("failed to read image body from {url}: {e}");
                return None;
            }
        }
    }

    Some(encode_data_uri(&content_type, &buffer))
}

async fn read_local_image(
    reference: &str,
    mime: &'static str,
    max_file_size: u64,
    asset_paths: &[PathBuf],
) -> Option<String> {
    let relative = strip_query(reference).trim_start_matches('/');
    if relative.is_empty() {
        return None;
    }

    for dir in asset_paths {
        let candidate = dir.join(relative);
        let metadata = match tokio::fs::metadata(&candidate).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };

        if metadata.len() > max_file_size {
            log::debug!(
                "image {} is {} bytes, keeping original reference",
                candidate.display(),
                metadata.len()
            );
            return None;
        }

        match tokio::fs::read(&candidate).await {
            Ok(bytes) => return Some(encode_data_uri(mime, &bytes)),
            Err(e) => {
                log::warn!("failed to read image {}: {e}", candidate.display());
                return None;
            }
        }
    }

    log::debug!("image {reference} not found under any asset path");
    None
}

fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    let capacity = "data:".len()
        + mime.len()
        + ";base64,".len()
        + base64::encoded_len(bytes.len(), true).unwrap_or(0);
    let mut encoded = String::with_capacity(capacity);
    encoded.push_str("data:");
    encoded.push_str(mime);
    encoded.push_str(";base64,");
    STANDARD.encode_string(bytes, &mut encoded);
    encoded
}

fn strip_query(reference: &str) -> &str {
    let end = reference
        .find(['?', '#'])
        .unwrap_or(reference.len());
    &reference[..end]
}

fn mime_for_extension(reference: &str) -> Option<&'static str> {
    let clean = strip_query(reference);
    let extension = Path::new(clean).extension()?.to_str()?;
    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "avif" => Some("image/avif"),
        "apng" => Some("image/apng"),
        "ico" => Some("image/x-icon"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_image_extensions() {
        assert_eq!(mime_for_extension("img/a.png"), Some("image/png"));
        assert_eq!(mime_for_extension("a.JPG?v=2"), Some("image/jpeg"));
        assert_eq!(mime_for_extension("fonts/a.woff2"), None);
        assert_eq!(mime_for_extension("no-extension"), None);
    }

    #[test]
    fn encodes_data_uri() {
        assert_eq!(
            encode_data_uri("image/png", b"abc"),
            "data:image/png;base64,YWJj"
        );
    }
}
