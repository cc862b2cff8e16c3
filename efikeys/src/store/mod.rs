// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Variable stores.
//!
//! Reads and writes go through [`VariableStore`], implemented over efivarfs,
//! over UEFI runtime services, over an offline flash image, and by an
//! in-memory firmware emulation used to exercise the authenticated write
//! rules without hardware.
//!
//! A read-modify-write is not atomic: another actor may change a variable
//! between [`VariableStore::get`] and [`VariableStore::set`]. None of the
//! backends offers a lock, and firmware timestamps make a stale write fail
//! rather than silently win.

pub mod efivarfs;
pub mod emulated;
pub mod flash;
pub mod runtime;

pub use efivarfs::EfivarfsStore;
pub use emulated::EmulatedFirmware;
pub use flash::{FlashError, FlashStore};
pub use runtime::{EfiStatus, RuntimeServices, RuntimeStore};

use crate::attributes::VariableAttributes;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The variable does not exist
    #[error("variable {name}-{guid} not found")]
    NotFound { name: String, guid: Uuid },

    /// The store refused the write
    #[error("{message}")]
    PermissionDenied { name: String, message: String },

    /// Stored bytes cannot be a valid variable
    #[error("variable {name} is corrupt: {message}")]
    Corrupt { name: String, message: String },

    /// Fewer bytes written than requested
    #[error("short write to {path}: {written} of {expected} bytes")]
    PartialWrite {
        path: String,
        written: usize,
        expected: usize,
    },

    /// I/O error against the backing filesystem
    #[error("I/O error on {path}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Firmware returned an error status
    #[error("firmware refused {name}: {status}")]
    Firmware { name: String, status: EfiStatus },

    /// No efivarfs mount was found
    #[error("efivarfs is not mounted")]
    NotMounted,

    /// Flash image error
    #[error("flash image error")]
    Flash(#[from] FlashError),
}

impl StoreError {
    pub fn not_found(name: &str, guid: &Uuid) -> Self {
        StoreError::NotFound {
            name: name.to_string(),
            guid: *guid,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A variable as stored, attributes included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub attributes: VariableAttributes,
    pub data: Vec<u8>,
}

pub trait VariableStore {
    /// Read a variable. A missing variable is [`StoreError::NotFound`],
    /// never an empty buffer.
    fn get(&self, name: &str, guid: &Uuid) -> Result<Variable, StoreError>;

    /// Write a variable. `data` goes to the store in a single call, envelope
    /// included for time-based authenticated writes.
    fn set(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), StoreError>;

    /// Like [`VariableStore::get`], mapping a missing variable to `None`
    fn get_optional(
        &self,
        name: &str,
        guid: &Uuid,
    ) -> Result<Option<Variable>, StoreError> {
        match self.get(name, guid) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<S: VariableStore + ?Sized> VariableStore for Box<S> {
    fn get(&self, name: &str, guid: &Uuid) -> Result<Variable, StoreError> {
        (**self).get(name, guid)
    }

    fn set(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), StoreError> {
        (**self).set(name, guid, attributes, data)
    }
}
