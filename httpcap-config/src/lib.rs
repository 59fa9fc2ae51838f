//! # httpcap Configuration
//!
//! Layered configuration for capture, reassembly retention, stream bridges,
//! event dispatch and logging.
//!
//! ## Features
//! - **Layering**: defaults, YAML files and `HTTPCAP_*` environment variables
//! - **Validation**: every section is checked with `validator` before use
//! - **Human sizes**: byte limits accept `"1MiB"`‑style strings

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod core;
mod error;
mod reassembly;
mod telemetry;
mod validation;

pub use capture::CaptureConfig;
pub use core::{BridgeConfig, DispatchConfig, FramingConfig};
pub use error::ConfigError;
pub use reassembly::ReassemblyConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/httpcap.yaml";
const ENV_PREFIX: &str = "HTTPCAP_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
#[serde(default)]
pub struct HttpcapConfig {
    /// Packet source parameters.
    #[validate(nested)]
    pub capture: CaptureConfig,

    /// Transaction delivery.
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Idle-stream retention and out-of-order buffering.
    #[validate(nested)]
    pub reassembly: ReassemblyConfig,

    #[validate(nested)]
    pub bridge: BridgeConfig,

    #[validate(nested)]
    pub framing: FramingConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl HttpcapConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/httpcap.yaml`, if present
    /// 3. `config/<HTTPCAP_ENV>.yaml`, if present (`HTTPCAP_ENV` defaults to
    ///    `production`)
    /// 4. `HTTPCAP_*` environment variables, `__` separating sections
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(HttpcapConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("HTTPCAP_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file, still honouring defaults and
    /// environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(HttpcapConfig::default())).merge(Yaml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = HttpcapConfig::default();
        config.validate().expect("Default config should validate");
        assert_eq!(config.capture.filter, "tcp");
        assert!(!config.capture.promiscuous);
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert_eq!(config.reassembly.retention_secs, 120);
        assert_eq!(config.reassembly.flush_interval_secs, 60);
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("HTTPCAP_DISPATCH__WORKERS", "4");
            jail.set_env("HTTPCAP_CAPTURE__FILTER", "tcp port 8080");
            let config = HttpcapConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.dispatch.workers, 4);
            assert_eq!(config.capture.filter, "tcp port 8080");
            Ok(())
        });
    }

    #[test]
    fn yaml_layers_merge_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/httpcap.yaml",
                "capture:\n  interface: lo\n  snaplen: 64KiB\nreassembly:\n  retention_secs: 30\n",
            )?;
            jail.create_file("config/staging.yaml", "dispatch:\n  workers: 2\n")?;
            jail.set_env("HTTPCAP_ENV", "staging");

            let config = HttpcapConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.capture.interface, "lo");
            assert_eq!(config.capture.snaplen, 65536);
            assert_eq!(config.capture.filter, "tcp");
            assert_eq!(config.reassembly.retention_secs, 30);
            assert_eq!(config.dispatch.workers, 2);
            Ok(())
        });
    }

    #[test]
    fn invalid_values_fail_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.yaml", "dispatch:\n  queue_capacity: 0\n")?;
            let err = HttpcapConfig::load_from_path("bad.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            assert!(err.to_string().contains("queue_capacity"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HttpcapConfig::load_from_path("/nonexistent/httpcap.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
