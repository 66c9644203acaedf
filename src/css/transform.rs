//! Post-processing pipeline for combined critical CSS
//!
//! Steps run over one parsed stylesheet; the CSS is parsed once before the
//! first step and serialized once after the last, no matter how many steps
//! run. An empty step list returns the input untouched.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::images;
use super::stylesheet::{CssRule, Stylesheet};
use super::urls;
use crate::errors::CssError;
use crate::options::Pattern;

/// One transformation applied to the parsed stylesheet.
#[derive(Debug, Clone)]
pub enum PostProcessStep {
    /// Drop rules and at-rules matching any of the patterns. Ordered before
    /// image inlining so discarded rules never trigger asset fetches.
    Discard(Vec<Pattern>),
    /// Rewrite relative asset references for a new document location.
    Rebase(Rebase),
    /// Replace small image references with base64 data URIs.
    InlineImages { max_file_size: u64 },
    /// User-provided transformation over the parsed stylesheet.
    Custom(CustomTransform),
}

/// Asset reference rewriting strategy.
#[derive(Clone)]
pub enum Rebase {
    /// Rewrite references written relative to `from` (a stylesheet path) so
    /// they resolve from `to` (the document path).
    Paths { from: String, to: String },
    /// Rewrite each reference through a callback; `None` keeps the original.
    With(UrlRewrite),
}

#[derive(Clone)]
pub struct UrlRewrite(pub Arc<dyn Fn(&str) -> Option<String> + Send + Sync>);

#[derive(Clone)]
pub struct CustomTransform(pub Arc<dyn Fn(&mut Stylesheet) -> Result<(), CssError> + Send + Sync>);

impl fmt::Debug for Rebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rebase::Paths { from, to } => f
                .debug_struct("Paths")
                .field("from", from)
                .field("to", to)
                .finish(),
            Rebase::With(_) => f.write_str("With(..)"),
        }
    }
}

impl fmt::Debug for CustomTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomTransform(..)")
    }
}

/// Per-document state shared by the asset-touching steps.
pub struct TransformContext<'a> {
    pub client: &'a reqwest::Client,
    /// Existing directories searched for referenced assets, most specific
    /// first.
    pub asset_paths: &'a [PathBuf],
    /// Set for remote documents; relative references resolve against it.
    pub base_url: Option<&'a Url>,
    pub fetch_timeout: Duration,
}

/// Run the pipeline. Asset fetch failures inside the image step downgrade to
/// warnings; only a failing custom step aborts.
pub async fn apply(
    css: String,
    steps: &[PostProcessStep],
    cx: &TransformContext<'_>,
) -> Result<String, CssError> {
    if steps.is_empty() {
        return Ok(css);
    }

    let mut sheet = Stylesheet::parse(&css);

    for step in steps {
        match step {
            PostProcessStep::Discard(patterns) => discard(&mut sheet.rules, patterns),
            PostProcessStep::Rebase(rebase) => apply_rebase(&mut sheet, rebase),
            PostProcessStep::InlineImages { max_file_size } => {
                images::inline_images(&mut sheet, *max_file_size, cx).await;
            }
            PostProcessStep::Custom(transform) => (transform.0)(&mut sheet)?,
        }
    }

    Ok(sheet.to_css_string())
}

fn discard(rules: &mut Vec<CssRule>, patterns: &[Pattern]) {
    rules.retain_mut(|rule| match rule {
        CssRule::Style(style) => {
            let joined = style.selectors.join(",");
            let hit = patterns.iter().any(|p| {
                p.matches(&joined) || style.selectors.iter().any(|s| p.matches(s))
            });
            !hit
        }
        CssRule::Group(group) => {
            if matches_at_rule(patterns, &group.name, &group.condition) {
                return false;
            }
            discard(&mut group.rules, patterns);
            !group.rules.is_empty()
        }
        CssRule::Declarations(decls) => !matches_at_rule(patterns, &decls.name, &decls.prelude),
        CssRule::Keyframes(keyframes) => {
            !matches_at_rule(patterns, &keyframes.name, &keyframes.animation_name)
        }
        CssRule::Statement(statement) => {
            !matches_at_rule(patterns, &statement.name, &statement.prelude)
        }
    });
}

fn matches_at_rule(patterns: &[Pattern], name: &str, prelude: &str) -> bool {
    let label = format!("@{name}");
    let with_prelude = if prelude.is_empty() {
        label.clone()
    } else {
        format!("@{name} {prelude}")
    };
    patterns
        .iter()
        .any(|p| p.matches(&label) || p.matches(&with_prelude))
}

fn apply_rebase(sheet: &mut Stylesheet, rebase: &Rebase) {
    match rebase {
        Rebase::Paths { from, to } => {
            let from_dir = dirname(from);
            let to_dir = dirname(to);
            if from_dir == to_dir {
                return;
            }
            for_each_value_mut(&mut sheet.rules, &mut |value| {
                *value = urls::rewrite_urls(value, |reference| {
                    rebase_reference(reference, &from_dir, &to_dir)
                });
            });
        }
        Rebase::With(rewrite) => {
            for_each_value_mut(&mut sheet.rules, &mut |value| {
                *value = urls::rewrite_urls(value, |reference| (rewrite.0)(reference));
            });
        }
    }
}

/// Visit every declaration value and raw keyframes body in the tree.
pub(crate) fn for_each_value_mut<F>(rules: &mut [CssRule], visit: &mut F)
where
    F: FnMut(&mut String),
{
    for rule in rules {
        match rule {
            CssRule::Style(style) => {
                for declaration in &mut style.declarations {
                    visit(&mut declaration.value);
                }
            }
            CssRule::Declarations(decls) => {
                for declaration in &mut decls.declarations {
                    visit(&mut declaration.value);
                }
            }
            CssRule::Group(group) => for_each_value_mut(&mut group.rules, visit),
            CssRule::Keyframes(keyframes) => visit(&mut keyframes.body),
            CssRule::Statement(_) => {}
        }
    }
}

fn rebase_reference(reference: &str, from_dir: &str, to_dir: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty()
        || urls::is_data_uri(reference)
        || urls::is_remote_url(reference)
        || reference.starts_with('/')
        || reference.starts_with('#')
    {
        return None;
    }

    let absolute = resolve_segments(from_dir, reference);
    let base = resolve_segments(to_dir, "");
    Some(relative_from(&absolute, &base))
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(index) => path[..index].to_string(),
        None => String::new(),
    }
}

/// Resolve a relative reference against a directory in URL-path space.
fn resolve_segments(dir: &str, reference: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();

    for part in dir.split('/').chain(reference.split('/')) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }

    segments
}

fn relative_from(target: &[String], base: &[String]) -> String {
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..base.len() {
        parts.push("..".to_string());
    }
    for segment in &target[common..] {
        parts.push(segment.clone());
    }

    if parts.is_empty() {
        String::new()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebases_relative_references() {
        assert_eq!(
            rebase_reference("../img/bg.png", "styles/sub", "pages"),
            Some("../styles/img/bg.png".to_string())
        );
        assert_eq!(
            rebase_reference("bg.png", "styles", ""),
            Some("styles/bg.png".to_string())
        );
    }

    #[test]
    fn rebase_leaves_anchored_references_alone() {
        assert_eq!(rebase_reference("/img/bg.png", "styles", "pages"), None);
        assert_eq!(
            rebase_reference("https://cdn.example.com/a.png", "styles", "pages"),
            None
        );
        assert_eq!(rebase_reference("data:image/png;base64,AA", "a", "b"), None);
    }
}
