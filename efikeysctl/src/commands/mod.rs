// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Command implementations for efikeysctl

pub mod convert;
pub mod flash;
pub mod keygen;
pub mod read;
pub mod sign;
pub mod status;
pub mod update;

use crate::config::{Backend, Config};
use crate::error::{EfikeysctlError, ErrorContext};
use efikeys::{
    attributes::VariableAttributes,
    auth::Signer,
    guid,
    store::{
        EfivarfsStore, FlashStore, StoreError, Variable, VariableStore,
    },
    time::EfiTime,
};
use log::{debug, info};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The variable store chosen by configuration
#[derive(Debug)]
pub enum SelectedStore {
    Efivarfs(EfivarfsStore),
    /// Changes stay in memory until [`SelectedStore::commit`]
    Flash { store: FlashStore, path: PathBuf },
}

impl SelectedStore {
    pub fn open(config: &Config) -> Result<Self, EfikeysctlError> {
        match config.store.backend {
            Backend::Efivarfs => {
                let store = match &config.store.efivarfs_path {
                    Some(path) => EfivarfsStore::new(path),
                    None => EfivarfsStore::discover()?,
                };
                debug!("Using efivarfs at {}", store.root().display());
                Ok(SelectedStore::Efivarfs(store))
            }
            Backend::Flash => {
                let path = config
                    .store
                    .flash_image
                    .as_deref()
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        EfikeysctlError::validation(
                            "the flash store needs an image: set store.flash_image or pass --flash-image",
                        )
                    })?;
                let store = FlashStore::open(&path).with_context(|| {
                    format!("Failed to open flash image {}", path.display())
                })?;
                debug!(
                    "Using the variable store at {:#x} in {}",
                    store.store_offset(),
                    path.display()
                );
                Ok(SelectedStore::Flash { store, path })
            }
        }
    }

    /// Persist pending changes. Only the flash image buffers writes.
    pub fn commit(&self) -> Result<(), EfikeysctlError> {
        if let SelectedStore::Flash { store, path } = self {
            store.save(path)?;
            info!("Saved flash image {}", path.display());
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        match self {
            SelectedStore::Efivarfs(store) => {
                format!("efivarfs at {}", store.root().display())
            }
            SelectedStore::Flash { path, .. } => {
                format!("flash image {}", path.display())
            }
        }
    }
}

impl VariableStore for SelectedStore {
    fn get(&self, name: &str, guid: &Uuid) -> Result<Variable, StoreError> {
        match self {
            SelectedStore::Efivarfs(store) => store.get(name, guid),
            SelectedStore::Flash { store, .. } => store.get(name, guid),
        }
    }

    fn set(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), StoreError> {
        match self {
            SelectedStore::Efivarfs(store) => {
                store.set(name, guid, attributes, data)
            }
            SelectedStore::Flash { store, .. } => {
                store.set(name, guid, attributes, data)
            }
        }
    }
}

pub fn read_file(path: &Path) -> Result<Vec<u8>, EfikeysctlError> {
    std::fs::read(path).map_err(|e| EfikeysctlError::file(path, e))
}

pub fn write_file(path: &Path, data: &[u8]) -> Result<(), EfikeysctlError> {
    std::fs::write(path, data).map_err(|e| EfikeysctlError::file(path, e))
}

/// Owner GUID for new entries: `--owner`, then `signing.default_owner`,
/// then the all-zero GUID
pub fn resolve_owner(
    owner: Option<&str>,
    config: &Config,
) -> Result<Uuid, EfikeysctlError> {
    match owner.or(config.signing.default_owner.as_deref()) {
        Some(text) => Ok(guid::parse(text)?),
        None => Ok(Uuid::nil()),
    }
}

pub fn parse_timestamp(
    text: Option<&str>,
) -> Result<Option<EfiTime>, EfikeysctlError> {
    text.map(EfiTime::parse).transpose().map_err(Into::into)
}

/// Signer from the command line, else from `[signing]`.
///
/// Returns `None` when neither names both a certificate and a key.
pub fn load_signer(
    cert: Option<&Path>,
    key: Option<&Path>,
    config: &Config,
) -> Result<Option<Signer>, EfikeysctlError> {
    let (cert, key) = match (cert, key) {
        (Some(cert), Some(key)) => (cert.to_path_buf(), key.to_path_buf()),
        (None, None) => match (
            config.signing.certificate.as_deref(),
            config.signing.key.as_deref(),
        ) {
            (Some(cert), Some(key)) => {
                (PathBuf::from(cert), PathBuf::from(key))
            }
            (None, None) => return Ok(None),
            _ => {
                return Err(EfikeysctlError::validation(
                    "signing.certificate and signing.key must be set together",
                ))
            }
        },
        _ => {
            return Err(EfikeysctlError::validation(
                "a signer needs both a certificate and a key",
            ))
        }
    };

    let signer = Signer::load(
        &cert,
        &key,
        config.signing.key_password.as_deref(),
    )?;
    debug!("Loaded signer {}", signer.subject());
    Ok(Some(signer))
}
