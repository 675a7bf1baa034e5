//! # fob-hmr
//!
//! Hot module replacement core for the fob dev server.
//!
//! This crate has no networking. It answers three questions about a build:
//!
//! - **What changed?** [`UpdateComputer`] turns a build's changed assets into
//!   an [`HmrMessage`], including the hot payload of every JS module.
//! - **Where is this code from?** [`SourceMapLocator`] classifies any
//!   runtime-reported path as a bundle, an asset or an original source and
//!   loads its code and source map.
//! - **What does it look like?** [`CodeFrameRenderer`] and
//!   [`render_diagnostics`] produce the excerpts shown in terminals and in
//!   the browser overlay.
//!
//! The bundle graph is consumed through the read-only [`BundleGraph`]
//! trait. Enable the `test-utils` feature for an in-memory implementation.

pub mod codeframe;
pub mod diagnostics;
pub mod error;
pub mod frames;
pub mod graph;
pub mod locator;
pub mod payload;
pub mod protocol;
pub mod sourcemap;
pub mod update;

pub use codeframe::{CodeFrameOptions, CodeFrameRenderer};
pub use diagnostics::{BuildDiagnostic, escape_html, render_diagnostics};
pub use error::{HmrError, Result};
pub use frames::{
    CodeFrameRequest, EnrichedFrame, ResolvedFrame, Skipped, StackFrame, resolve_frame,
    resolve_frames,
};
pub use graph::{
    Asset, Bundle, BundleGraph, Dependency, Environment, EnvironmentContext, OutputFormat,
    SharedBundleGraph,
};
pub use locator::{LocatorOptions, ResolvedSource, SourceLocation, SourceMapLocator};
pub use payload::{HMR_ENDPOINT, SOURCES_ENDPOINT, hot_asset_contents, hot_asset_url};
pub use protocol::{HmrAsset, HmrDiagnostics, HmrMessage, RESTART_SENTINEL, RenderedDiagnostic};
pub use update::{MAX_CONCURRENT_JOBS, RELOAD_THRESHOLD, UpdateComputer};

#[cfg(any(test, feature = "test-utils"))]
pub use graph::memory::MemoryBundleGraph;
