//! Error types for hot update computation and source map resolution.

use miette::Diagnostic;
use thiserror::Error;

/// Errors produced while computing hot updates or resolving runtime locations.
#[derive(Debug, Error, Diagnostic)]
pub enum HmrError {
    /// A reported location could not be mapped to a bundle, asset or source file
    #[error("Source map not found for {0}")]
    #[diagnostic(
        code(fob_hmr::source_map_not_found),
        help("Only files inside the dist directory or the project root can be resolved")
    )]
    SourceMapNotFound(String),

    /// The bundle graph has no asset with this id
    #[error("Asset not found: {0}")]
    #[diagnostic(code(fob_hmr::asset_not_found))]
    AssetNotFound(String),

    /// A bundle graph query failed (reading code or maps from the pipeline)
    #[error("Bundle graph query failed: {0}")]
    #[diagnostic(code(fob_hmr::graph))]
    Graph(String),

    /// A source map could not be parsed
    #[error("Invalid source map: {0}")]
    #[diagnostic(code(fob_hmr::invalid_source_map))]
    InvalidSourceMap(String),

    /// I/O errors while reading bundles, maps or raw sources
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using `HmrError` as the default error type.
pub type Result<T, E = HmrError> = std::result::Result<T, E>;
