//! Build pipeline lifecycle events.

use fob_hmr::{Asset, BuildDiagnostic, SharedBundleGraph};

/// Bundle graph of a build plus the assets that changed since the last one.
#[derive(Clone)]
pub struct GraphSnapshot {
    pub bundle_graph: SharedBundleGraph,
    pub changed_assets: Vec<Asset>,
}

impl GraphSnapshot {
    pub fn new(bundle_graph: SharedBundleGraph, changed_assets: Vec<Asset>) -> Self {
        Self {
            bundle_graph,
            changed_assets,
        }
    }
}

impl std::fmt::Debug for GraphSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSnapshot")
            .field("changed_assets", &self.changed_assets.len())
            .finish_non_exhaustive()
    }
}

/// Pipeline phase reported while a build runs.
#[derive(Debug, Clone)]
pub enum BuildProgress {
    Transforming,
    /// The bundle graph is final; packaging has not started yet
    Bundled(GraphSnapshot),
    Packaging,
    Optimizing,
}

impl BuildProgress {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Transforming => "transforming",
            Self::Bundled(_) => "bundled",
            Self::Packaging => "packaging",
            Self::Optimizing => "optimizing",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuildEvent {
    BuildStart,
    BuildProgress(BuildProgress),
    BuildSuccess(GraphSnapshot),
    BuildFailure { diagnostics: Vec<BuildDiagnostic> },
    /// Watch mode ended; servers and workers are torn down
    WatchEnd,
}

impl BuildEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BuildStart => "buildStart",
            Self::BuildProgress(_) => "buildProgress",
            Self::BuildSuccess(_) => "buildSuccess",
            Self::BuildFailure { .. } => "buildFailure",
            Self::WatchEnd => "watchEnd",
        }
    }
}
