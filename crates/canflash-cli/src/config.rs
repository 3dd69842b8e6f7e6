//! Configuration file handling for canflash

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canflash::config::{MockConfig, SocketCanConfig};
use canflash::{AdapterConfig, CanflashConfig};

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interface: Option<String>,
    pub mock: bool,
    pub timeout_ms: Option<u64>,
}

/// Load `path`, or the default config file when it exists
pub fn load(path: Option<&Path>) -> Result<CanflashConfig> {
    if let Some(path) = path {
        return CanflashConfig::from_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()));
    }

    let default = config_path()?;
    if default.exists() {
        CanflashConfig::from_file(&default)
            .with_context(|| format!("Failed to load config file: {}", default.display()))
    } else {
        Ok(CanflashConfig::default())
    }
}

/// Get the default config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("canflash");

    Ok(config_dir.join("config.toml"))
}

/// Merge command-line arguments over config file values
pub fn apply(config: &mut CanflashConfig, overrides: &Overrides) {
    if overrides.mock {
        config.adapter = AdapterConfig::Mock(MockConfig::default());
    } else if let Some(interface) = &overrides.interface {
        let mut socketcan = SocketCanConfig::new(interface.clone());
        if let AdapterConfig::SocketCan(current) = &config.adapter {
            socketcan.bitrate = current.bitrate;
        }
        config.adapter = AdapterConfig::SocketCan(socketcan);
    }
    if let Some(timeout_ms) = overrides.timeout_ms {
        config.client.default_timeout_ms = timeout_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_override_keeps_bitrate() {
        let mut config = CanflashConfig::from_toml_str(
            r#"
            [adapter]
            type = "socketcan"
            interface = "can0"
            bitrate = 250000
            "#,
        )
        .unwrap();

        apply(
            &mut config,
            &Overrides {
                interface: Some("can1".to_string()),
                timeout_ms: Some(500),
                ..Default::default()
            },
        );

        match &config.adapter {
            AdapterConfig::SocketCan(cfg) => {
                assert_eq!(cfg.interface, "can1");
                assert_eq!(cfg.bitrate, 250000);
            }
            other => panic!("unexpected adapter {:?}", other),
        }
        assert_eq!(config.client.default_timeout_ms, 500);
    }

    #[test]
    fn test_mock_override() {
        let mut config = CanflashConfig::default();
        config.adapter = AdapterConfig::SocketCan(SocketCanConfig::new("can0"));

        apply(
            &mut config,
            &Overrides {
                mock: true,
                ..Default::default()
            },
        );
        assert!(matches!(config.adapter, AdapterConfig::Mock(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = load(Some(Path::new("/nonexistent/canflash.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config file"));
    }
}
