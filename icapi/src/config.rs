use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use icapi_client::SessionOptions;

use crate::LibraryOptions;

pub const DEFAULT_ADDRESS: &str = "localhost";

/// Contents of the JSON file passed with `--config`. Command line flags take
/// precedence over it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub address: String,
    pub library: LibraryOptions,
    pub session: SessionOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            library: LibraryOptions::default(),
            session: SessionOptions::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file `{}`", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Invalid config file `{}`", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "address": "192.168.1.20",
                "session": {"timeout_ms": 200, "primary_ion_capacity": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.address, "192.168.1.20");
        assert_eq!(cfg.session.timeout_ms, 200);
        assert_eq!(cfg.session.primary_ion_capacity, 4);
        assert_eq!(cfg.session.transmission_capacity, 10);
        assert_eq!(cfg.library, LibraryOptions::default());
    }

    #[test]
    fn missing_file() {
        let err = Config::load("/nonexistent/icapi.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/icapi.json"));
    }
}
