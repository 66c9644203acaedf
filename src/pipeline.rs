//! End-to-end critical CSS generation
//!
//! [`create_with`] is the sequence everything else wraps: load the document,
//! fan evaluation out across the configured viewports, merge the fragments,
//! run the post-processing chain and optionally inline the result back into
//! the markup. [`create`] runs it on a freshly launched browser; [`generate`]
//! additionally persists the configured targets.

use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use reqwest::Client;

use crate::css::{self, TransformContext, combine, transform};
use crate::document::Document;
use crate::errors::{CriticalError, CriticalResult};
use crate::evaluator::{ChromiumEvaluator, EvaluateRequest, Evaluator};
use crate::inline;
use crate::options::{Options, RawOptions};

/// Result of one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Combined, post-processed critical CSS.
    pub css: String,
    /// Document markup, rewritten when inlining is enabled and untouched
    /// otherwise.
    pub html: String,
}

/// Generate critical CSS with a freshly launched headless browser.
///
/// The browser is shut down before returning, whether or not generation
/// succeeded.
pub async fn create(options: &Options) -> CriticalResult<Output> {
    let evaluator = ChromiumEvaluator::launch().await?;
    let result = create_with(&evaluator, options).await;
    evaluator.shutdown().await;
    result
}

/// Generate critical CSS against a caller-supplied evaluator.
///
/// A document without any stylesheet short-circuits: strict mode turns it
/// into [`CriticalError::NoCss`], otherwise the document is returned
/// unchanged alongside empty CSS and the evaluator is never invoked.
pub async fn create_with<E: Evaluator>(evaluator: &E, options: &Options) -> CriticalResult<Output> {
    let client = Client::new();
    let document = Document::load(options, &client).await?;

    if !document.has_css() {
        if options.strict {
            return Err(CriticalError::NoCss);
        }
        log::warn!("document has no stylesheets, returning it unchanged");
        return Ok(Output {
            css: String::new(),
            html: document.html,
        });
    }

    let fragments = evaluate_viewports(evaluator, options, &document).await?;
    let css = finish_css(fragments, options, &document, &client).await?;

    let html = match &options.inline {
        Some(config) => inline::inline(&document.html, &css, config)?,
        None => document.html,
    };

    Ok(Output { css, html })
}

/// Resolve raw options, generate, and persist any configured targets.
pub async fn generate(raw: RawOptions) -> CriticalResult<Output> {
    let options = raw.resolve()?;
    let output = create(&options).await?;
    persist_targets(&options, &output).await?;
    Ok(output)
}

/// Stream-style adapter: treat `path` as the source document and overwrite
/// it in place, with the rewritten markup when inlining is enabled and with
/// the critical CSS otherwise.
pub async fn process_file(path: impl AsRef<Path>, mut raw: RawOptions) -> CriticalResult<Output> {
    let path = path.as_ref();
    raw.html = None;
    raw.src = Some(path.display().to_string());

    let options = raw.resolve()?;
    let output = create(&options).await?;

    let contents = if options.inline.is_some() {
        output.html.as_bytes()
    } else {
        output.css.as_bytes()
    };
    tokio::fs::write(path, contents).await?;

    persist_targets(&options, &output).await?;
    Ok(output)
}

/// Fan one evaluation out per configured viewport. Calls run concurrently,
/// but the returned fragments keep the configured dimension order since
/// merging is order-sensitive; the first failure fails the whole set.
async fn evaluate_viewports<E: Evaluator>(
    evaluator: &E,
    options: &Options,
    document: &Document,
) -> CriticalResult<Vec<String>> {
    let mut headers = options.page_headers.clone();
    if let Some(value) = options.basic_authorization() {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        headers.push(("Authorization".to_string(), value));
    }

    let calls = options.dimensions.iter().map(|dimension| {
        log::debug!(
            "evaluating {} at {}x{}",
            document.navigation_url,
            dimension.width,
            dimension.height
        );
        evaluator.evaluate(EvaluateRequest {
            url: document.navigation_url.clone(),
            css: document.css.clone(),
            width: dimension.width,
            height: dimension.height,
            force_include: options.force_include.clone(),
            user_agent: options.user_agent.clone(),
            headers: headers.clone(),
            timeout: options.evaluator.timeout,
            render_wait: options.evaluator.render_wait,
            block_js: options.evaluator.block_js_requests,
            max_embedded_base64_length: options.max_embedded_base64_length,
        })
    });

    let fragments = try_join_all(calls).await?;
    log::debug!("evaluated {} viewport(s)", fragments.len());
    Ok(fragments)
}

/// Merge the per-viewport fragments, then either run the post-processing
/// chain or apply plain minification. A single fragment with no applicable
/// steps and minification disabled passes through byte for byte.
async fn finish_css(
    fragments: Vec<String>,
    options: &Options,
    document: &Document,
    client: &Client,
) -> CriticalResult<String> {
    let css = combine(&fragments);

    let steps = options.pipeline_steps();
    if steps.is_empty() {
        return Ok(if options.minify { css::minify(&css) } else { css });
    }

    let cx = TransformContext {
        client,
        asset_paths: &document.asset_dirs,
        base_url: document.base_url.as_ref(),
        fetch_timeout: options.request_timeout,
    };
    let css = transform::apply(css, &steps, &cx).await?;
    Ok(css)
}

async fn persist_targets(options: &Options, output: &Output) -> CriticalResult<()> {
    if let Some(target) = &options.target.css {
        write_target(&resolve_target(options, target), output.css.as_bytes()).await?;
    }
    if let Some(target) = &options.target.html {
        write_target(&resolve_target(options, target), output.html.as_bytes()).await?;
    }
    Ok(())
}

/// Relative targets resolve against the configured base directory.
fn resolve_target(options: &Options, target: &Path) -> PathBuf {
    if target.is_absolute() {
        return target.to_path_buf();
    }
    match &options.base {
        Some(base) => base.join(target),
        None => target.to_path_buf(),
    }
}

async fn write_target(path: &Path, contents: &[u8]) -> CriticalResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await?;
    log::info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::options::{RawTarget, RawTargetPaths};

    fn resolved(raw: RawOptions) -> Options {
        raw.resolve().unwrap()
    }

    #[tokio::test]
    async fn persists_both_targets_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let options = resolved(RawOptions {
            html: Some("<html></html>".to_string()),
            base: Some(dir.path().to_path_buf()),
            target: Some(RawTarget::Split(RawTargetPaths {
                css: Some(PathBuf::from("dist/critical.css")),
                html: Some(PathBuf::from("dist/index.html")),
            })),
            ..RawOptions::default()
        });
        let output = Output {
            css: "a{color:red}".to_string(),
            html: "<html><head></head><body></body></html>".to_string(),
        };

        persist_targets(&options, &output).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("dist/critical.css")).unwrap(),
            output.css
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("dist/index.html")).unwrap(),
            output.html
        );
    }

    #[test]
    fn absolute_targets_ignore_base() {
        let options = resolved(RawOptions {
            html: Some("<html></html>".to_string()),
            base: Some(PathBuf::from("/srv/site")),
            ..RawOptions::default()
        });
        assert_eq!(
            resolve_target(&options, Path::new("/tmp/out.css")),
            PathBuf::from("/tmp/out.css")
        );
        assert_eq!(
            resolve_target(&options, Path::new("out.css")),
            PathBuf::from("/srv/site/out.css")
        );
    }
}
