//! Source document loading and stylesheet discovery
//!
//! A [`Document`] bundles everything the later stages need: the markup, the
//! assembled stylesheet text, a navigable URL for the browser and the
//! directories to search for referenced assets. Literal markup is staged to
//! a temp file inside the base directory so relative references keep
//! resolving; the staged file lives as long as the `Document`.

pub(crate) mod loader;

use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use tempfile::NamedTempFile;
use url::Url;

use crate::css::urls;
use crate::errors::LoadError;
use crate::options::{CssEntry, DocumentSource, Options};
use loader::{CHROME_USER_AGENT, CSS_ACCEPT, FetchConfig, HTML_ACCEPT};

static STYLESHEET_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel~='stylesheet'], style").expect("static selector"));

/// A loaded source document, ready for evaluation and inlining.
#[derive(Debug)]
pub struct Document {
    /// Original markup.
    pub html: String,
    /// Stylesheet text in document order (or the configured override).
    pub css: String,
    /// URL the evaluator navigates to (`file://` for local sources).
    pub navigation_url: String,
    /// Set for remote documents; relative asset references resolve here.
    pub base_url: Option<Url>,
    /// Existing directories to search for referenced assets.
    pub asset_dirs: Vec<PathBuf>,
    /// Keeps the staged temp file alive for literal markup sources.
    _staged: Option<NamedTempFile>,
}

/// Where linked stylesheets resolve from.
enum DocumentLocation<'a> {
    Local { dir: &'a Path },
    Remote { base: &'a Url },
}

/// One discovered stylesheet reference, extracted before any await point so
/// the parsed DOM never crosses one.
enum SheetRef {
    Inline(String),
    Linked { href: String, media: Option<String> },
}

impl Document {
    pub async fn load(options: &Options, client: &Client) -> Result<Self, LoadError> {
        let authorization = options.basic_authorization();
        let fetch = FetchConfig {
            user_agent: options.user_agent.as_deref().unwrap_or(CHROME_USER_AGENT),
            authorization: authorization.as_deref(),
            timeout: options.request_timeout,
        };

        match &options.source {
            DocumentSource::Html(html) => load_html_string(html, options, client, &fetch).await,
            DocumentSource::Local(path) => load_local(path, options, client, &fetch).await,
            DocumentSource::Remote(src) => {
                let url =
                    Url::parse(src).map_err(|_| LoadError::InvalidUrl(src.to_string()))?;
                if url.scheme() == "file" {
                    let path = url
                        .to_file_path()
                        .map_err(|()| LoadError::InvalidUrl(src.to_string()))?;
                    load_local(&path, options, client, &fetch).await
                } else {
                    load_remote(url, options, client, &fetch).await
                }
            }
        }
    }

    #[must_use]
    pub fn has_css(&self) -> bool {
        !self.css.trim().is_empty()
    }
}

async fn load_remote(
    url: Url,
    options: &Options,
    client: &Client,
    fetch: &FetchConfig<'_>,
) -> Result<Document, LoadError> {
    let html = loader::fetch_text(client, url.as_str(), HTML_ACCEPT, fetch).await?;
    let location = DocumentLocation::Remote { base: &url };
    let css = assemble_css(options, &html, &location, client, fetch).await?;
    let asset_dirs = asset_dirs(options, None);

    Ok(Document {
        html,
        css,
        navigation_url: url.to_string(),
        base_url: Some(url),
        asset_dirs,
        _staged: None,
    })
}

async fn load_local(
    path: &Path,
    options: &Options,
    client: &Client,
    fetch: &FetchConfig<'_>,
) -> Result<Document, LoadError> {
    let path = match &options.base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };
    let html = loader::read_file(&path).await?;
    let absolute = loader::absolute(&path);
    let dir = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let location = DocumentLocation::Local { dir: &dir };
    let css = assemble_css(options, &html, &location, client, fetch).await?;
    let navigation_url = file_url(&absolute)?;
    let asset_dirs = asset_dirs(options, Some(&dir));

    Ok(Document {
        html,
        css,
        navigation_url,
        base_url: None,
        asset_dirs,
        _staged: None,
    })
}

async fn load_html_string(
    html: &str,
    options: &Options,
    client: &Client,
    fetch: &FetchConfig<'_>,
) -> Result<Document, LoadError> {
    let dir = options
        .base
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let staged = stage_html(html, &dir)?;
    let navigation_url = file_url(&loader::absolute(staged.path()))?;

    let location = DocumentLocation::Local { dir: &dir };
    let css = assemble_css(options, html, &location, client, fetch).await?;
    let asset_dirs = asset_dirs(options, Some(&dir));

    Ok(Document {
        html: html.to_string(),
        css,
        navigation_url,
        base_url: None,
        asset_dirs,
        _staged: Some(staged),
    })
}

/// Load the configured stylesheet override, or discover stylesheets from the
/// document markup.
async fn assemble_css(
    options: &Options,
    html: &str,
    location: &DocumentLocation<'_>,
    client: &Client,
    fetch: &FetchConfig<'_>,
) -> Result<String, LoadError> {
    if let Some(entries) = &options.css {
        let mut sheets = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                CssEntry::Inline(text) => sheets.push(text.clone()),
                CssEntry::Path(path) => {
                    let path = match &options.base {
                        Some(base) if path.is_relative() => base.join(path),
                        _ => path.clone(),
                    };
                    sheets.push(loader::read_file(&path).await?);
                }
            }
        }
        return Ok(sheets.join("\n"));
    }

    let mut sheets = Vec::new();
    for reference in discover_refs(html) {
        match reference {
            SheetRef::Inline(text) => sheets.push(text),
            SheetRef::Linked { href, media } => {
                if let Some(css) = load_linked(&href, location, client, fetch).await? {
                    sheets.push(wrap_media(css, media.as_deref()));
                }
            }
        }
    }
    Ok(sheets.join("\n"))
}

fn discover_refs(html: &str) -> Vec<SheetRef> {
    let parsed = Html::parse_document(html);
    let mut refs = Vec::new();

    for element in parsed.select(&STYLESHEET_SELECTOR) {
        match element.value().name() {
            "style" => {
                let text: String = element.text().collect();
                if !text.trim().is_empty() {
                    refs.push(SheetRef::Inline(text));
                }
            }
            "link" => {
                if let Some(href) = element.value().attr("href") {
                    let href = href.trim();
                    if !href.is_empty() && !urls::is_data_uri(href) {
                        refs.push(SheetRef::Linked {
                            href: href.to_string(),
                            media: element.value().attr("media").map(str::to_string),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    refs
}

/// Load one linked stylesheet. Local misses downgrade to a warning so a
/// stale link does not sink the whole run; remote fetch failures stay fatal
/// since the document explicitly depends on them.
async fn load_linked(
    href: &str,
    location: &DocumentLocation<'_>,
    client: &Client,
    fetch: &FetchConfig<'_>,
) -> Result<Option<String>, LoadError> {
    if urls::is_remote_url(href) {
        let url = if let Some(rest) = href.strip_prefix("//") {
            format!("https://{rest}")
        } else {
            href.to_string()
        };
        return loader::fetch_text(client, &url, CSS_ACCEPT, fetch)
            .await
            .map(Some);
    }

    match location {
        DocumentLocation::Remote { base } => {
            let Some(url) = urls::join_url(base, href) else {
                log::warn!("skipping unresolvable stylesheet reference {href}");
                return Ok(None);
            };
            loader::fetch_text(client, &url, CSS_ACCEPT, fetch)
                .await
                .map(Some)
        }
        DocumentLocation::Local { dir } => {
            let clean = href
                .split(['?', '#'])
                .next()
                .unwrap_or(href)
                .trim_start_matches('/');
            let path = dir.join(clean);
            match loader::read_file(&path).await {
                Ok(css) => Ok(Some(css)),
                Err(e) => {
                    log::warn!("skipping stylesheet {href}: {e}");
                    Ok(None)
                }
            }
        }
    }
}

/// Honor the link's media attribute by wrapping the stylesheet, so a print
/// stylesheet is not treated as screen CSS.
fn wrap_media(css: String, media: Option<&str>) -> String {
    match media.map(str::trim) {
        Some(condition) if !condition.is_empty() && !condition.eq_ignore_ascii_case("all") => {
            format!("@media {condition} {{\n{css}\n}}")
        }
        _ => css,
    }
}

fn stage_html(html: &str, dir: &Path) -> Result<NamedTempFile, LoadError> {
    let mut file = tempfile::Builder::new()
        .prefix(".critical-")
        .suffix(".html")
        .tempfile_in(dir)
        .map_err(LoadError::Stage)?;
    file.write_all(html.as_bytes()).map_err(LoadError::Stage)?;
    file.flush().map_err(LoadError::Stage)?;
    Ok(file)
}

fn file_url(path: &Path) -> Result<String, LoadError> {
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .map_err(|()| LoadError::InvalidUrl(path.display().to_string()))
}

/// Union of directories searched for assets: the document directory, the
/// configured base and the extra asset paths, keeping only those that exist.
fn asset_dirs(options: &Options, document_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut push = |candidate: PathBuf| {
        if candidate.is_dir() && !dirs.contains(&candidate) {
            dirs.push(candidate);
        }
    };

    if let Some(dir) = document_dir {
        push(dir.to_path_buf());
    }
    if let Some(base) = &options.base {
        push(base.clone());
    }
    for path in &options.asset_paths {
        let resolved = match &options.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.clone(),
        };
        push(resolved);
    }

    dirs
}
