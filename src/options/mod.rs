//! Configuration types and validation

mod resolve;
mod types;

pub use types::{
    CssEntry, DEFAULT_HEIGHT, DEFAULT_MAX_IMAGE_FILE_SIZE, DEFAULT_RENDER_WAIT_MS,
    DEFAULT_TIMEOUT_MS, DEFAULT_WIDTH, Dimension, DocumentSource, EvaluatorOptions, InlineConfig,
    Options, Pattern, RawCss, RawDimension, RawEvaluatorOptions, RawInline, RawInlineConfig,
    RawOptions, RawRebase, RawTarget, RawTargetPaths, Target,
};
