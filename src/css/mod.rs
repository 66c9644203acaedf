//! CSS engine for critical-path extraction
//!
//! A coarse rule model ([`stylesheet`]), order-preserving fragment merging
//! ([`combine`]) and the typed post-processing pipeline ([`transform`]).

pub mod combine;
mod images;
pub mod stylesheet;
pub mod transform;
pub mod urls;

pub use combine::{combine, dedupe};
pub use stylesheet::{CssRule, Declaration, GroupRule, StyleRule, Stylesheet};
pub use transform::{
    CustomTransform, PostProcessStep, Rebase, TransformContext, UrlRewrite, apply,
};

/// Re-serialize CSS in compact form, dropping unparsable rules.
#[must_use]
pub fn minify(css: &str) -> String {
    Stylesheet::parse(css).to_css_string()
}
