//! Dev server options.
//!
//! Loaded from defaults, an optional `fob.dev.json` and `FOB_DEV_`-prefixed
//! environment variables, in increasing priority.

mod defaults;
mod loading;
mod types;
mod validation;

use crate::runner::WorkerPolicy;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use defaults::*;
pub use types::*;
pub use validation::*;

/// Name of the optional options file in the project root.
pub const CONFIG_FILE: &str = "fob.dev.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DevOptions {
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Identifies the build this Node runner belongs to
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve: Option<ServeOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmr: Option<HmrOptions>,

    #[serde(default)]
    pub node: NodeOptions,

    /// Command used to open files from the error overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            instance_id: default_instance_id(),
            serve: None,
            hmr: None,
            node: NodeOptions::default(),
            editor: None,
        }
    }
}

impl DevOptions {
    /// Port the HMR server listens on, if HMR is enabled.
    pub fn hmr_port(&self) -> Option<u16> {
        let hmr = self.hmr.as_ref()?;
        hmr.port.or(self.serve.as_ref().map(|s| s.port))
    }

    /// HMR shares the dev server's port.
    pub fn serves_hmr_on_dev_port(&self) -> bool {
        match (&self.serve, self.hmr_port()) {
            (Some(serve), Some(port)) => serve.port == port,
            _ => false,
        }
    }

    /// Absolute build output directory.
    pub fn dist_dir(&self) -> PathBuf {
        let dist = self
            .serve
            .as_ref()
            .map(|s| s.dist_dir.clone())
            .unwrap_or_else(default_dist_dir);
        self.project_root.join(dist).clean()
    }

    pub fn public_url(&self) -> &str {
        self.serve.as_ref().map(|s| s.public_url.as_str()).unwrap_or("/")
    }

    /// Origin clients reach the dev server at.
    pub fn server_origin(&self) -> String {
        match (&self.serve, &self.hmr) {
            (Some(serve), _) => format!("http://{}:{}", serve.host, serve.port),
            (None, Some(hmr)) => format!("http://{}:{}", hmr.host, self.hmr_port().unwrap_or(0)),
            (None, None) => String::new(),
        }
    }

    /// Origin of the HMR server.
    pub fn hmr_origin(&self) -> String {
        match (&self.hmr, self.hmr_port()) {
            (Some(hmr), Some(port)) if !self.serves_hmr_on_dev_port() => {
                format!("http://{}:{}", hmr.host, port)
            }
            _ => self.server_origin(),
        }
    }

    /// Whether a running worker patches itself or is restarted on every build.
    pub fn worker_policy(&self) -> WorkerPolicy {
        if self.hmr.is_some() {
            WorkerPolicy::LivePatch
        } else {
            WorkerPolicy::RestartOnChange
        }
    }
}
