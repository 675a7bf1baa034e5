use std::path::PathBuf;

pub fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

pub fn default_instance_id() -> String {
    "default".to_string()
}

pub fn default_host() -> String {
    "localhost".to_string()
}

pub fn default_public_url() -> String {
    "/".to_string()
}

pub fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

pub fn default_node_binary() -> String {
    "node".to_string()
}
