pub mod css;
pub mod document;
pub mod errors;
pub mod evaluator;
pub mod inline;
pub mod options;
pub mod pipeline;

pub use css::{
    CustomTransform, PostProcessStep, Rebase, Stylesheet, UrlRewrite, combine, dedupe, minify,
};
pub use document::Document;
pub use errors::{ConfigError, CriticalError, CriticalResult, CssError, EvaluateError, LoadError};
pub use evaluator::{BrowserLaunchConfig, ChromiumEvaluator, EvaluateRequest, Evaluator};
pub use inline::inline;
pub use options::{
    Dimension, EvaluatorOptions, InlineConfig, Options, Pattern, RawOptions, Target,
};
pub use pipeline::{Output, create, create_with, generate, process_file};
