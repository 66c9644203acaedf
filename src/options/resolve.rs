//! Validation and normalization of raw configuration
//!
//! Checks run in a fixed order (source, viewports, evaluator fields,
//! patterns) and resolution stops at the first violation, so callers get a
//! stable, deterministic error for a given configuration.

use std::path::PathBuf;
use std::time::Duration;

use super::types::{
    CssEntry, DEFAULT_HEIGHT, DEFAULT_MAX_IMAGE_FILE_SIZE, DEFAULT_RENDER_WAIT_MS,
    DEFAULT_TIMEOUT_MS, DEFAULT_WIDTH, Dimension, DocumentSource, EvaluatorOptions, InlineConfig,
    Options, Pattern, RawCss, RawInline, RawOptions, RawTarget, Target,
};
use crate::css::transform::Rebase;
use crate::errors::ConfigError;

impl RawOptions {
    /// Validate and normalize into runnable [`Options`].
    pub fn resolve(self) -> Result<Options, ConfigError> {
        let source = match (self.html, self.src) {
            (None, None) => return Err(ConfigError::MissingSource),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSources),
            (Some(html), None) => DocumentSource::Html(html),
            (None, Some(src)) => classify_source(src),
        };

        let width = self.width.unwrap_or(DEFAULT_WIDTH);
        let height = self.height.unwrap_or(DEFAULT_HEIGHT);
        let dimensions: Vec<Dimension> = if self.dimensions.is_empty() {
            vec![Dimension { width, height }]
        } else {
            self.dimensions
                .iter()
                .map(|d| Dimension {
                    width: d.width.unwrap_or(width),
                    height: d.height.unwrap_or(height),
                })
                .collect()
        };
        for dimension in &dimensions {
            if dimension.width == 0 || dimension.height == 0 {
                return Err(ConfigError::InvalidDimension {
                    width: dimension.width,
                    height: dimension.height,
                });
            }
        }

        let evaluator_raw = self.evaluator.unwrap_or_default();
        let forbidden = [
            ("url", evaluator_raw.url.is_some()),
            ("css", evaluator_raw.css.is_some()),
            ("width", evaluator_raw.width.is_some()),
            ("height", evaluator_raw.height.is_some()),
        ];
        for (field, present) in forbidden {
            if present {
                return Err(ConfigError::ForbiddenEvaluatorField(field));
            }
        }

        let ignore = parse_patterns(&self.ignore)?;
        let mut force_include = parse_patterns(&self.force_include)?;
        force_include.extend(parse_patterns(&evaluator_raw.force_include)?);

        let minify = self.minify.unwrap_or(true);
        let max_image_file_size = self
            .max_image_file_size
            .unwrap_or(DEFAULT_MAX_IMAGE_FILE_SIZE);
        let evaluator = EvaluatorOptions {
            timeout: Duration::from_millis(
                evaluator_raw
                    .timeout
                    .or(self.timeout)
                    .unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            render_wait: Duration::from_millis(
                evaluator_raw
                    .render_wait_time
                    .unwrap_or(DEFAULT_RENDER_WAIT_MS),
            ),
            block_js_requests: evaluator_raw.block_js_requests.unwrap_or(true),
        };

        let inline = normalize_inline(self.inline, self.base.clone(), minify, self.extract);

        Ok(Options {
            source,
            base: self.base,
            css: self.css.map(normalize_css),
            dimensions,
            target: normalize_target(self.target),
            inline,
            minify,
            strict: self.strict,
            ignore,
            force_include,
            inline_images: self.inline_images,
            asset_paths: self.asset_paths,
            max_image_file_size,
            max_embedded_base64_length: evaluator_raw
                .max_embedded_base64_length
                .unwrap_or(max_image_file_size as usize),
            user: self.user,
            pass: self.pass,
            user_agent: self.user_agent,
            page_headers: evaluator_raw.custom_page_headers.into_iter().collect(),
            request_timeout: Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)),
            evaluator,
            rebase: self.rebase.map(|rebase| Rebase::Paths {
                from: rebase.from,
                to: rebase.to,
            }),
            post_process: self.post_process,
        })
    }
}

fn classify_source(src: String) -> DocumentSource {
    let trimmed = src.trim();
    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("file://")
    {
        DocumentSource::Remote(trimmed.to_string())
    } else {
        DocumentSource::Local(PathBuf::from(trimmed))
    }
}

fn normalize_css(css: RawCss) -> Vec<CssEntry> {
    let entries = match css {
        RawCss::Single(entry) => vec![entry],
        RawCss::Many(entries) => entries,
    };
    entries.into_iter().map(classify_css_entry).collect()
}

/// Literal CSS always contains a declaration block; paths never do.
fn classify_css_entry(entry: String) -> CssEntry {
    if entry.contains('{') {
        CssEntry::Inline(entry)
    } else {
        CssEntry::Path(PathBuf::from(entry))
    }
}

fn normalize_target(target: Option<RawTarget>) -> Target {
    match target {
        None => Target::default(),
        Some(RawTarget::Single(path)) => {
            if path.to_ascii_lowercase().ends_with(".css") {
                Target {
                    css: Some(PathBuf::from(path)),
                    html: None,
                }
            } else {
                Target {
                    css: None,
                    html: Some(PathBuf::from(path)),
                }
            }
        }
        Some(RawTarget::Split(paths)) => Target {
            css: paths.css,
            html: paths.html,
        },
    }
}

fn normalize_inline(
    inline: Option<RawInline>,
    base: Option<PathBuf>,
    minify: bool,
    extract: bool,
) -> Option<InlineConfig> {
    let defaults = || InlineConfig {
        base_path: base
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from(".")),
        minify,
        extract,
    };

    match inline {
        None | Some(RawInline::Flag(false)) => None,
        Some(RawInline::Flag(true)) => Some(defaults()),
        Some(RawInline::Config(config)) => {
            let fallback = defaults();
            Some(InlineConfig {
                base_path: config.base_path.unwrap_or(fallback.base_path),
                minify: config.minify.unwrap_or(fallback.minify),
                extract: config.extract.unwrap_or(fallback.extract),
            })
        }
    }
}

fn parse_patterns(raw: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    raw.iter().map(|entry| Pattern::parse(entry)).collect()
}
