// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Configuration for efikeysctl
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML configuration file, either the one given with `--config`
//!    (which must exist) or the first found among the standard locations
//! 3. `EFIKEYS_` prefixed environment variables, with `__` between the
//!    section and the key (`EFIKEYS_STORE__BACKEND=flash`)
//! 4. Command-line arguments
//!
//! No configuration file is required: without one, efikeysctl talks to the
//! efivarfs mount it discovers and has no default signer.
//!
//! ```toml
//! [store]
//! backend = "efivarfs"
//!
//! [signing]
//! certificate = "/etc/efikeys/KEK.crt"
//! key = "/etc/efikeys/KEK.key"
//! default_owner = "26dc4851-195f-4ae1-9a19-fbf883bbb35e"
//!
//! [output]
//! format = "text"
//! ```

use crate::Cli;
use config::{ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which variable store commands operate on
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The running system's variables through efivarfs
    #[default]
    Efivarfs,
    /// The variable store inside a firmware flash image file
    Flash,
}

/// How results are printed
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON, for scripts
    Json,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Overrides the efivarfs mount point found in /proc/self/mounts
    pub efivarfs_path: Option<String>,
    /// Flash image used when `backend` is `flash`
    pub flash_image: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Signer certificate, PEM or DER
    pub certificate: Option<String>,
    /// Signer private key, PEM
    pub key: Option<String>,
    pub key_password: Option<String>,
    /// Owner GUID of new entries when `--owner` is absent
    pub default_owner: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the configuration file that was loaded, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
    pub store: StoreConfig,
    pub signing: SigningConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Check if a configuration file was loaded
    #[must_use]
    pub fn has_config_file(&self) -> bool {
        self.loaded_from.is_some()
    }

    /// Load configuration from defaults, files and the environment
    ///
    /// # Errors
    ///
    /// Returns ConfigError if an explicit configuration file does not
    /// exist, a file does not parse, or a value has the wrong type.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(explicit_path) = config_path {
            if !PathBuf::from(explicit_path).exists() {
                return Err(ConfigError::Message(format!(
                    "Specified configuration file not found: {explicit_path}"
                )));
            }
        }

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        // Only the first file found is used
        let loaded_path = Self::get_config_paths(config_path)
            .into_iter()
            .find(|path| path.exists());
        if let Some(path) = &loaded_path {
            log::debug!("Loading config from: {}", path.display());
            builder = builder.add_source(
                File::from(path.clone()).format(FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("EFIKEYS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.loaded_from = loaded_path;

        if config.has_config_file() {
            log::debug!("Configuration loaded successfully with config file");
        } else {
            log::debug!(
                "No configuration file found, using defaults and environment variables"
            );
        }

        Ok(config)
    }

    /// Apply command-line argument overrides
    pub fn with_cli_overrides(mut self, cli: &Cli) -> Self {
        if let Some(backend) = cli.store {
            self.store.backend = backend;
        }
        if let Some(ref path) = cli.efivarfs {
            self.store.efivarfs_path = Some(path.clone());
        }
        if let Some(ref image) = cli.flash_image {
            self.store.flash_image = Some(image.clone());
            // An image on the command line means the image is the target
            if cli.store.is_none() {
                self.store.backend = Backend::Flash;
            }
        }
        if let Some(format) = cli.format {
            self.output.format = format;
        }
        self
    }

    /// Get configuration file search paths
    ///
    /// Returns paths in order of precedence (highest priority first):
    /// 1. `efikeysctl.toml` (current directory)
    /// 2. `~/.config/efikeysctl/config.toml` (user)
    /// 3. `$XDG_CONFIG_HOME/efikeysctl/config.toml` (XDG override)
    /// 4. `/etc/efikeys/efikeysctl.conf` (system-wide)
    fn get_config_paths(config_path: Option<&str>) -> Vec<PathBuf> {
        if let Some(path) = config_path {
            return vec![PathBuf::from(path)];
        }

        let mut paths = vec![PathBuf::from("efikeysctl.toml")];

        if let Some(home) = std::env::var_os("HOME") {
            paths.push(
                PathBuf::from(home).join(".config/efikeysctl/config.toml"),
            );
        }

        if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME") {
            paths.push(
                PathBuf::from(xdg_config).join("efikeysctl/config.toml"),
            );
        }

        paths.push(PathBuf::from("/etc/efikeys/efikeysctl.conf"));
        paths
    }
}
