//! Query-only view of the bundle graph produced by the build pipeline.
//!
//! The HMR layer never mutates the graph. Every question it asks (which
//! bundles contain an asset, where a dependency resolves, what an asset's
//! compiled code is) goes through the [`BundleGraph`] trait, so any pipeline
//! can plug in its own graph representation.

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Runtime context an asset or bundle is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
    Browser,
    WebWorker,
    ServiceWorker,
    Worklet,
    Node,
    ElectronMain,
    ElectronRenderer,
}

impl EnvironmentContext {
    /// Contexts that run inside a browser engine.
    pub fn is_browser(&self) -> bool {
        matches!(
            self,
            Self::Browser
                | Self::WebWorker
                | Self::ServiceWorker
                | Self::Worklet
                | Self::ElectronRenderer
        )
    }

    /// Contexts that run inside Node.js.
    pub fn is_node(&self) -> bool {
        matches!(
            self,
            Self::Node | Self::ElectronMain | Self::ElectronRenderer
        )
    }
}

/// Module format of the emitted code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Global,
    Commonjs,
    Esmodule,
}

/// Compilation environment shared by assets and bundles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Stable hash identifying this environment
    pub id: String,
    pub context: EnvironmentContext,
    pub output_format: OutputFormat,
}

impl Environment {
    pub fn new(id: impl Into<String>, context: EnvironmentContext, output_format: OutputFormat) -> Self {
        Self {
            id: id.into(),
            context,
            output_format,
        }
    }

    /// Browser environment emitting global scripts.
    pub fn browser(id: impl Into<String>) -> Self {
        Self::new(id, EnvironmentContext::Browser, OutputFormat::Global)
    }

    /// Node environment emitting CommonJS.
    pub fn node(id: impl Into<String>) -> Self {
        Self::new(id, EnvironmentContext::Node, OutputFormat::Commonjs)
    }
}

/// One compiled unit of source content.
///
/// Identity is the `id`: two values with the same id describe the same asset,
/// even when reported twice by one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    /// Output type, e.g. `js`, `css`, `svg`
    #[serde(rename = "type")]
    pub asset_type: String,
    pub file_path: PathBuf,
    pub env: Environment,
}

impl Asset {
    pub fn new(
        id: impl Into<String>,
        asset_type: impl Into<String>,
        file_path: impl Into<PathBuf>,
        env: Environment,
    ) -> Self {
        Self {
            id: id.into(),
            asset_type: asset_type.into(),
            file_path: file_path.into(),
            env,
        }
    }

    pub fn is_js(&self) -> bool {
        self.asset_type == "js"
    }

    /// JS and CSS can be swapped in place by the client runtime; everything
    /// else has to go through a loader.
    pub fn is_live_patchable(&self) -> bool {
        matches!(self.asset_type.as_str(), "js" | "css")
    }
}

/// One emitted output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub file_path: PathBuf,
    pub env: Environment,
}

impl Bundle {
    pub fn new(
        id: impl Into<String>,
        bundle_type: impl Into<String>,
        file_path: impl Into<PathBuf>,
        env: Environment,
    ) -> Self {
        Self {
            id: id.into(),
            bundle_type: bundle_type.into(),
            file_path: file_path.into(),
            env,
        }
    }

    /// Bundles a browser navigates to: HTML pages or browser-targeted scripts.
    pub fn is_browser_entry(&self) -> bool {
        self.bundle_type == "html" || self.env.context.is_browser()
    }

    pub fn is_node_script(&self) -> bool {
        self.bundle_type == "js" && self.env.context.is_node()
    }
}

/// An import edge between assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub id: String,
    /// Literal import specifier as written in source
    pub specifier: String,
    /// Build-time placeholder substituted for the specifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl Dependency {
    pub fn new(id: impl Into<String>, specifier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specifier: specifier.into(),
            placeholder: None,
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// The specifier the emitted code actually uses to require this dependency.
    pub fn effective_specifier(&self) -> &str {
        self.placeholder.as_deref().unwrap_or(&self.specifier)
    }
}

/// Read-only oracle over the pipeline's bundle graph.
#[async_trait]
pub trait BundleGraph: Send + Sync {
    fn get_asset_by_id(&self, id: &str) -> Option<Asset>;

    /// Short id the client runtime registers the asset under.
    fn get_asset_public_id(&self, asset: &Asset) -> String;

    fn get_bundles(&self) -> Vec<Bundle>;

    fn get_entry_bundles(&self) -> Vec<Bundle>;

    fn get_bundles_with_asset(&self, asset: &Asset) -> Vec<Bundle>;

    /// Outgoing dependencies of an asset.
    fn get_dependencies(&self, asset: &Asset) -> Vec<Dependency>;

    /// Dependencies from other assets that point at this asset.
    fn get_incoming_dependencies(&self, asset: &Asset) -> Vec<Dependency>;

    /// Asset a dependency resolves to, optionally as seen from one bundle.
    fn get_resolved_asset(&self, dependency: &Dependency, bundle: Option<&Bundle>) -> Option<Asset>;

    /// Compiled code of an asset.
    async fn get_code(&self, asset: &Asset) -> Result<String>;

    /// Source map of an asset as a JSON document, if one was generated.
    async fn get_map(&self, asset: &Asset) -> Result<Option<String>>;
}

/// Shared handle to the current build's bundle graph.
pub type SharedBundleGraph = Arc<dyn BundleGraph>;
