use super::defaults::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static serving of the build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServeOptions {
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// URL prefix bundles are served under (`/`, `/static/` or an absolute URL)
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Build output directory, relative to the project root
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
}

impl ServeOptions {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            host: default_host(),
            public_url: default_public_url(),
            dist_dir: default_dist_dir(),
        }
    }
}

/// Hot module replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HmrOptions {
    /// Dedicated HMR port; the serve port is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for HmrOptions {
    fn default() -> Self {
        Self {
            port: None,
            host: default_host(),
        }
    }
}

/// Supervised Node worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeOptions {
    #[serde(default = "default_node_binary")]
    pub binary: String,

    /// Restart the worker when an update is not acknowledged in time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            binary: default_node_binary(),
            ack_timeout_ms: None,
        }
    }
}
