// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! The Secure Boot variables and the rules attached to each of them.

use crate::{
    attributes::VariableAttributes,
    esl,
    guid::{
        SignatureType, EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE,
        SHIM_LOCK,
    },
};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Platform status variable, 1 while no PK is enrolled
pub const SETUP_MODE: &str = "SetupMode";
/// Platform status variable, 1 while Secure Boot is enforced
pub const SECURE_BOOT: &str = "SecureBoot";
/// Both status variables live under the global variable GUID
pub const STATUS_GUID: Uuid = EFI_GLOBAL_VARIABLE;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    /// Unknown variable name
    #[error("unknown variable '{0}', expected one of PK, KEK, db, dbx, dbt, MokList")]
    Unknown(String),

    /// PK must hold exactly one certificate
    #[error("PK must contain exactly one X509 certificate, found {found} entr(y/ies) of which {x509} X509")]
    InvalidPlatformKey { found: usize, x509: usize },

    /// Payload is not a valid signature database
    #[error("invalid payload for {name}: {source}")]
    Format {
        name: &'static str,
        source: esl::EslError,
    },
}

/// A variable holding a signature database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecureVariable {
    Pk,
    Kek,
    Db,
    Dbx,
    Dbt,
    MokList,
}

impl SecureVariable {
    pub const ALL: [SecureVariable; 6] = [
        SecureVariable::Pk,
        SecureVariable::Kek,
        SecureVariable::Db,
        SecureVariable::Dbx,
        SecureVariable::Dbt,
        SecureVariable::MokList,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SecureVariable::Pk => "PK",
            SecureVariable::Kek => "KEK",
            SecureVariable::Db => "db",
            SecureVariable::Dbx => "dbx",
            SecureVariable::Dbt => "dbt",
            SecureVariable::MokList => "MokList",
        }
    }

    pub fn guid(&self) -> Uuid {
        match self {
            SecureVariable::Pk | SecureVariable::Kek => EFI_GLOBAL_VARIABLE,
            SecureVariable::Db | SecureVariable::Dbx | SecureVariable::Dbt => {
                EFI_IMAGE_SECURITY_DATABASE
            }
            SecureVariable::MokList => SHIM_LOCK,
        }
    }

    /// Attributes used to write this variable, without APPEND_WRITE
    pub fn attributes(&self) -> VariableAttributes {
        match self {
            SecureVariable::MokList => VariableAttributes::BOOT_NON_VOLATILE,
            _ => VariableAttributes::AUTHENTICATED_DATABASE,
        }
    }

    /// Whether writes must carry an EFI_VARIABLE_AUTHENTICATION_2 envelope
    pub fn requires_envelope(&self) -> bool {
        self.attributes().is_time_based()
    }

    /// The variable whose certificates may sign updates to this one
    pub fn authority(&self) -> Option<SecureVariable> {
        match self {
            SecureVariable::Pk | SecureVariable::Kek => {
                Some(SecureVariable::Pk)
            }
            SecureVariable::Db | SecureVariable::Dbx | SecureVariable::Dbt => {
                Some(SecureVariable::Kek)
            }
            SecureVariable::MokList => None,
        }
    }

    /// Check a full replacement payload for this variable.
    ///
    /// Every variable takes a well-formed signature database. PK also needs
    /// exactly one X509 entry, or nothing at all to remove the platform key.
    pub fn validate_payload(
        &self,
        payload: &[u8],
    ) -> Result<(), VariableError> {
        let lists = esl::parse_database(payload).map_err(|source| {
            VariableError::Format {
                name: self.name(),
                source,
            }
        })?;

        if *self != SecureVariable::Pk || payload.is_empty() {
            return Ok(());
        }

        let mut found = 0;
        let mut x509 = 0;
        for list in &lists {
            let count = list.entry_count().map_err(|source| {
                VariableError::Format {
                    name: self.name(),
                    source,
                }
            })?;
            found += count;
            if list.signature_type() == SignatureType::X509 {
                x509 += count;
            }
        }

        if found != 1 || x509 != 1 {
            return Err(VariableError::InvalidPlatformKey { found, x509 });
        }
        Ok(())
    }
}

impl fmt::Display for SecureVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecureVariable {
    type Err = VariableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecureVariable::ALL
            .iter()
            .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| VariableError::Unknown(s.to_string()))
    }
}
