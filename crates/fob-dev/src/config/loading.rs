use super::{CONFIG_FILE, DevOptions};
use crate::error::{ConfigError, Result};
use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized},
};
use std::path::Path;

impl DevOptions {
    /// Load options for a project.
    ///
    /// Priority: environment variables > options file > defaults. Nested
    /// keys use a double underscore: `FOB_DEV_SERVE__PORT=1234`.
    pub fn load(project_root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let defaults = Self {
            project_root: project_root.to_path_buf(),
            ..Self::default()
        };
        let mut figment = Figment::new().merge(Serialized::defaults(defaults));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            let default_path = project_root.join(CONFIG_FILE);
            default_path.exists().then_some(default_path)
        });
        if let Some(path) = config_file {
            tracing::debug!(path = %path.display(), "Loading dev options file");
            figment = figment.merge(Json::file(path));
        }

        figment = figment.merge(
            Env::prefixed("FOB_DEV_")
                .lowercase(false)
                .map(|key| env_key_to_path(key.as_str()).into()),
        );

        let options: Self = figment.extract().map_err(|e| ConfigError::InvalidValue {
            field: "configuration".to_string(),
            value: e.to_string(),
            hint: format!("Check {CONFIG_FILE} syntax and field types"),
        })?;
        options.validate()?;
        Ok(options)
    }
}

/// `SERVE__PUBLIC_URL` -> `serve.publicUrl`
pub(crate) fn env_key_to_path(key: &str) -> String {
    key.split("__")
        .map(|segment| {
            let mut out = String::with_capacity(segment.len());
            for (i, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
                let word = word.to_ascii_lowercase();
                if i == 0 {
                    out.push_str(&word);
                } else {
                    let mut chars = word.chars();
                    if let Some(first) = chars.next() {
                        out.push(first.to_ascii_uppercase());
                        out.push_str(chars.as_str());
                    }
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join(".")
}
