//! Above-the-fold evaluation
//!
//! The [`Evaluator`] trait is the seam between the pipeline and the browser:
//! it receives a document URL plus stylesheet text for one viewport and
//! returns the critical subset of that CSS. [`ChromiumEvaluator`] is the
//! production implementation on headless Chromium; tests substitute scripted
//! implementations.

pub mod browser;
mod chromium;
mod js;
mod prune;

use std::future::Future;
use std::time::Duration;

use crate::errors::EvaluateError;
use crate::options::Pattern;

pub use browser::BrowserLaunchConfig;
pub use chromium::ChromiumEvaluator;

/// One viewport's worth of evaluation work.
#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    /// Navigable document URL (`file://` for local and staged sources).
    pub url: String,
    /// Full stylesheet text to reduce.
    pub css: String,
    pub width: u32,
    pub height: u32,
    /// Selectors kept regardless of rendering.
    pub force_include: Vec<Pattern>,
    pub user_agent: Option<String>,
    /// Extra request headers, e.g. basic authorization.
    pub headers: Vec<(String, String)>,
    /// Budget for the whole evaluation, navigation included.
    pub timeout: Duration,
    /// Settle time after navigation before measuring.
    pub render_wait: Duration,
    /// Disable page script execution while measuring.
    pub block_js: bool,
    /// Embedded font sources above this many base64 characters are dropped.
    pub max_embedded_base64_length: usize,
}

/// Reduces a stylesheet to the rules needed for one viewport's initial
/// render.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        request: EvaluateRequest,
    ) -> impl Future<Output = Result<String, EvaluateError>> + Send;
}
