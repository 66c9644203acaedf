//! Configuration surface for critical CSS generation
//!
//! [`RawOptions`] mirrors the user-facing configuration, union types and
//! all; [`Options`] is the validated, normalized form the pipeline runs on.
//! Resolution lives in the sibling module and reports the first violation
//! it encounters.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::Deserialize;

use crate::css::transform::{PostProcessStep, Rebase};
use crate::errors::ConfigError;

pub const DEFAULT_WIDTH: u32 = 1300;
pub const DEFAULT_HEIGHT: u32 = 900;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RENDER_WAIT_MS: u64 = 100;
pub const DEFAULT_MAX_IMAGE_FILE_SIZE: u64 = 10_240;

/// Unvalidated configuration as supplied by the caller.
///
/// Every field is optional or defaulted so the struct can be built in code
/// or deserialized from JSON config files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOptions {
    /// Literal document markup. Mutually exclusive with `src`.
    pub html: Option<String>,
    /// Document location, either a filesystem path or an http(s) URL.
    pub src: Option<String>,
    /// Explicit stylesheets overriding document discovery. Entries are file
    /// paths or literal CSS.
    pub css: Option<RawCss>,
    /// Base directory for resolving the document, targets and assets.
    pub base: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Extra viewports; entries missing a side fall back to `width`/`height`.
    pub dimensions: Vec<RawDimension>,
    pub target: Option<RawTarget>,
    pub inline: Option<RawInline>,
    /// Remove the inlined critical rules from the document's stylesheets.
    pub extract: bool,
    pub minify: Option<bool>,
    /// Rules and at-rules to drop from the output. Entries are substrings
    /// or `/pattern/flags` regular expressions.
    pub ignore: Vec<String>,
    /// Selectors kept even when not rendered above the fold.
    pub force_include: Vec<String>,
    pub inline_images: bool,
    /// Directories searched for referenced assets.
    pub asset_paths: Vec<PathBuf>,
    pub max_image_file_size: Option<u64>,
    /// Fail instead of falling back when the document yields no CSS.
    pub strict: bool,
    /// HTTP basic auth credentials for remote sources.
    pub user: Option<String>,
    pub pass: Option<String>,
    pub user_agent: Option<String>,
    /// Overall per-viewport timeout in milliseconds.
    pub timeout: Option<u64>,
    pub rebase: Option<RawRebase>,
    /// Passthrough tuning for the in-browser evaluation.
    pub evaluator: Option<RawEvaluatorOptions>,
    /// Programmatic post-processing steps, appended after the built-in ones.
    #[serde(skip)]
    pub post_process: Vec<PostProcessStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCss {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RawDimension {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTarget {
    /// A single path, classified by its `.css` suffix.
    Single(String),
    Split(RawTargetPaths),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTargetPaths {
    pub css: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInline {
    Flag(bool),
    Config(RawInlineConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawInlineConfig {
    pub base_path: Option<PathBuf>,
    pub minify: Option<bool>,
    pub extract: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRebase {
    pub from: String,
    pub to: String,
}

/// Evaluation tuning. The document, stylesheets and viewport are owned by
/// the pipeline, so their fields are rejected here rather than silently
/// overridden.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvaluatorOptions {
    pub url: Option<serde_json::Value>,
    pub css: Option<serde_json::Value>,
    pub width: Option<serde_json::Value>,
    pub height: Option<serde_json::Value>,
    pub timeout: Option<u64>,
    pub render_wait_time: Option<u64>,
    pub block_js_requests: Option<bool>,
    /// Embedded font sources longer than this many base64 characters are
    /// dropped from the critical CSS. Defaults to `maxImageFileSize`.
    pub max_embedded_base64_length: Option<usize>,
    pub force_include: Vec<String>,
    /// Extra headers sent with every page navigation.
    pub custom_page_headers: BTreeMap<String, String>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub source: DocumentSource,
    pub base: Option<PathBuf>,
    pub css: Option<Vec<CssEntry>>,
    pub dimensions: Vec<Dimension>,
    pub target: Target,
    pub inline: Option<InlineConfig>,
    pub minify: bool,
    pub strict: bool,
    pub ignore: Vec<Pattern>,
    pub force_include: Vec<Pattern>,
    pub inline_images: bool,
    pub asset_paths: Vec<PathBuf>,
    pub max_image_file_size: u64,
    pub max_embedded_base64_length: usize,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub user_agent: Option<String>,
    pub page_headers: Vec<(String, String)>,
    pub request_timeout: Duration,
    pub evaluator: EvaluatorOptions,
    pub rebase: Option<Rebase>,
    pub post_process: Vec<PostProcessStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// Literal markup, staged to a temp file before evaluation.
    Html(String),
    Local(PathBuf),
    /// Unparsed URL text; parsing happens at load time.
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssEntry {
    /// A stylesheet file resolved relative to the base directory.
    Path(PathBuf),
    /// Literal CSS text.
    Inline(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub css: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineConfig {
    pub base_path: PathBuf,
    pub minify: bool,
    pub extract: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorOptions {
    pub timeout: Duration,
    pub render_wait: Duration,
    pub block_js_requests: bool,
}

impl Options {
    /// Assemble the post-processing pipeline: discard first so dropped rules
    /// never trigger asset work, then rebasing, image inlining and finally
    /// the caller's custom steps.
    #[must_use]
    pub fn pipeline_steps(&self) -> Vec<PostProcessStep> {
        let mut steps = Vec::new();
        if !self.ignore.is_empty() {
            steps.push(PostProcessStep::Discard(self.ignore.clone()));
        }
        if let Some(rebase) = &self.rebase {
            steps.push(PostProcessStep::Rebase(rebase.clone()));
        }
        if self.inline_images {
            steps.push(PostProcessStep::InlineImages {
                max_file_size: self.max_image_file_size,
            });
        }
        steps.extend(self.post_process.iter().cloned());
        steps
    }

    /// `Authorization` header value, present when both credentials are set.
    #[must_use]
    pub fn basic_authorization(&self) -> Option<String> {
        let user = self.user.as_deref()?;
        let pass = self.pass.as_deref()?;
        let credentials = STANDARD.encode(format!("{user}:{pass}"));
        Some(format!("Basic {credentials}"))
    }
}

/// A matcher from the `ignore`/`forceInclude` configuration. Plain strings
/// match as substrings (or case-insensitive equality for force-includes);
/// `/pattern/flags` entries compile to regular expressions.
#[derive(Debug, Clone)]
pub enum Pattern {
    Substring(String),
    Regex(Regex),
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.len() >= 2 && raw.starts_with('/') {
            if let Some(closing) = raw.rfind('/') {
                if closing > 0 {
                    let body = &raw[1..closing];
                    let flags = &raw[closing + 1..];
                    if flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'u' | 'g')) {
                        return Self::compile(raw, body, flags);
                    }
                }
            }
        }
        Ok(Pattern::Substring(raw.to_string()))
    }

    fn compile(raw: &str, body: &str, flags: &str) -> Result<Self, ConfigError> {
        let inline_flags: String = flags
            .chars()
            .filter(|c| matches!(c, 'i' | 'm' | 's'))
            .collect();
        let source = if inline_flags.is_empty() {
            body.to_string()
        } else {
            format!("(?{inline_flags}){body}")
        };
        match Regex::new(&source) {
            Ok(regex) => Ok(Pattern::Regex(regex)),
            Err(e) => Err(ConfigError::InvalidPattern {
                pattern: raw.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Discard-style matching: substring containment or regex hit.
    #[must_use]
    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            Pattern::Substring(needle) => haystack.contains(needle.as_str()),
            Pattern::Regex(regex) => regex.is_match(haystack),
        }
    }

    /// Force-include matching: whole-selector equality or regex hit.
    #[must_use]
    pub fn matches_exactly(&self, candidate: &str) -> bool {
        match self {
            Pattern::Substring(needle) => candidate.eq_ignore_ascii_case(needle),
            Pattern::Regex(regex) => regex.is_match(candidate),
        }
    }
}
