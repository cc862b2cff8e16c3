// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

use crate::{
    store::{StoreError, VariableStore},
    variables::{SECURE_BOOT, SETUP_MODE, STATUS_GUID},
};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformMode {
    /// No PK enrolled, firmware accepts unsigned writes
    Setup,
    /// PK enrolled, writes must be signed by an authority
    User,
    /// SetupMode is not readable from this store
    Unknown,
}

impl fmt::Display for PlatformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformMode::Setup => f.write_str("setup mode"),
            PlatformMode::User => f.write_str("user mode"),
            PlatformMode::Unknown => f.write_str("unknown mode"),
        }
    }
}

/// Contents of the SetupMode and SecureBoot variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformStatus {
    pub setup_mode: Option<bool>,
    pub secure_boot: Option<bool>,
}

fn read_flag<S: VariableStore + ?Sized>(
    store: &S,
    name: &str,
) -> Result<Option<bool>, StoreError> {
    Ok(store
        .get_optional(name, &STATUS_GUID)?
        .and_then(|v| v.data.first().copied())
        .map(|b| b == 1))
}

impl PlatformStatus {
    pub fn read<S: VariableStore + ?Sized>(
        store: &S,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            setup_mode: read_flag(store, SETUP_MODE)?,
            secure_boot: read_flag(store, SECURE_BOOT)?,
        })
    }

    pub fn mode(&self) -> PlatformMode {
        match self.setup_mode {
            Some(true) => PlatformMode::Setup,
            Some(false) => PlatformMode::User,
            None => PlatformMode::Unknown,
        }
    }

    pub fn secure_boot_enforced(&self) -> bool {
        self.secure_boot == Some(true)
    }
}
