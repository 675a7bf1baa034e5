use super::DevOptions;
use crate::error::{ConfigError, Result};

impl DevOptions {
    /// Check option combinations that deserialize fine but cannot run.
    pub fn validate(&self) -> Result<()> {
        if let Some(hmr) = &self.hmr {
            if hmr.port.is_none() && self.serve.is_none() {
                return Err(ConfigError::MissingField {
                    field: "hmr.port".to_string(),
                    hint: "Set hmr.port, or enable serve so HMR can share its port".to_string(),
                }
                .into());
            }
            if hmr.port == Some(0) {
                return Err(invalid_port("hmr.port"));
            }
        }

        if let Some(serve) = &self.serve {
            if serve.port == 0 {
                return Err(invalid_port("serve.port"));
            }
            validate_public_url(&serve.public_url)?;
        }

        if self.node.ack_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "node.ackTimeoutMs".to_string(),
                value: "0".to_string(),
                hint: "Use a positive number of milliseconds, or omit it to wait indefinitely"
                    .to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn invalid_port(field: &str) -> crate::error::DevError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: "0".to_string(),
        hint: "Use a port between 1 and 65535".to_string(),
    }
    .into()
}

/// Public URLs are either absolute paths or absolute HTTP(S) URLs.
pub fn validate_public_url(public_url: &str) -> Result<()> {
    let ok = public_url.starts_with('/')
        || ((public_url.starts_with("http://") || public_url.starts_with("https://"))
            && url::Url::parse(public_url).is_ok());
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "serve.publicUrl".to_string(),
            value: public_url.to_string(),
            hint: "Use a path starting with '/' or an absolute http(s):// URL".to_string(),
        }
        .into())
    }
}
