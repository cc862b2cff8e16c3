// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! In-memory firmware variable services enforcing the Secure Boot write
//! rules, for running updates end to end without a machine.
//!
//! The platform is in setup mode while no PK is enrolled; any write is then
//! accepted. Once PK exists, time-based writes to PK and KEK must be signed
//! by the enrolled PK, and writes to db, dbx and dbt by a KEK certificate.
//! Timestamps must increase except for appends.

use super::runtime::{from_ucs2, EfiStatus, RuntimeServices};
use crate::{
    attributes::VariableAttributes,
    auth::{signed_message, verify_detached, AuthenticatedVariable},
    crypto,
    database::SignatureDatabase,
    time::EfiTime,
    variables::{SecureVariable, SECURE_BOOT, SETUP_MODE, STATUS_GUID},
};
use log::*;
use openssl::x509::X509;
use std::collections::HashMap;
use uuid::Uuid;

/// Attributes of SetupMode and SecureBoot
const STATUS_ATTRIBUTES: VariableAttributes = VariableAttributes::from_bits(
    VariableAttributes::BOOTSERVICE_ACCESS.bits()
        | VariableAttributes::RUNTIME_ACCESS.bits(),
);

#[derive(Debug, Clone)]
struct StoredVariable {
    attributes: VariableAttributes,
    data: Vec<u8>,
    timestamp: EfiTime,
}

#[derive(Debug, Clone, Default)]
pub struct EmulatedFirmware {
    vars: HashMap<(String, Uuid), StoredVariable>,
}

impl EmulatedFirmware {
    /// A platform in setup mode with no variables
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_setup_mode(&self) -> bool {
        !self.exists(SecureVariable::Pk.name(), &SecureVariable::Pk.guid())
    }

    pub fn exists(&self, name: &str, guid: &Uuid) -> bool {
        self.vars.contains_key(&(name.to_string(), *guid))
    }

    /// Stored data of a variable, without attributes
    pub fn data(&self, name: &str, guid: &Uuid) -> Option<&[u8]> {
        self.vars
            .get(&(name.to_string(), *guid))
            .map(|v| v.data.as_slice())
    }

    /// Timestamp of the last accepted time-based write
    pub fn timestamp(&self, name: &str, guid: &Uuid) -> Option<EfiTime> {
        self.vars.get(&(name.to_string(), *guid)).map(|v| v.timestamp)
    }

    fn status_variable(&self, name: &str) -> Option<Vec<u8>> {
        match name {
            SETUP_MODE => Some(vec![u8::from(self.is_setup_mode())]),
            SECURE_BOOT => Some(vec![u8::from(!self.is_setup_mode())]),
            _ => None,
        }
    }

    /// X509 certificates allowed to sign writes to `variable`
    fn authority_certificates(
        &self,
        variable: SecureVariable,
    ) -> Result<Vec<X509>, EfiStatus> {
        let Some(authority) = variable.authority() else {
            return Ok(Vec::new());
        };
        let Some(data) = self.data(authority.name(), &authority.guid()) else {
            return Ok(Vec::new());
        };
        let db = SignatureDatabase::from_bytes(data.to_vec())
            .map_err(|_| EfiStatus::SecurityViolation)?;
        Ok(db
            .x509_certificates()
            .into_iter()
            .filter_map(|der| crypto::x509_from_bytes(der).ok())
            .collect())
    }

    fn set_time_based(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), EfiStatus> {
        let envelope = AuthenticatedVariable::parse(data).map_err(|e| {
            debug!("Rejecting {name}: {e}");
            EfiStatus::SecurityViolation
        })?;
        let secure = SecureVariable::ALL
            .into_iter()
            .find(|v| v.name() == name && v.guid() == *guid);

        if !self.is_setup_mode() {
            let trusted = match secure {
                Some(variable) => self.authority_certificates(variable)?,
                None => Vec::new(),
            };
            if envelope.is_unsigned()
                || (secure.is_some() && trusted.is_empty())
            {
                debug!("Rejecting {name}: no usable signature in user mode");
                return Err(EfiStatus::SecurityViolation);
            }
            let message = signed_message(
                name,
                guid,
                attributes,
                &envelope.timestamp,
                &envelope.payload,
            );
            verify_detached(&envelope.cert_data, &message, &trusted).map_err(
                |e| {
                    debug!("Rejecting {name}: {e}");
                    EfiStatus::SecurityViolation
                },
            )?;
        }

        let key = (name.to_string(), *guid);
        let append = attributes.is_append();
        let stored_attributes =
            attributes.difference(VariableAttributes::APPEND_WRITE);

        if let Some(existing) = self.vars.get(&key) {
            if existing.attributes != stored_attributes {
                debug!(
                    "Rejecting {name}: attributes {stored_attributes} \
                     differ from {}",
                    existing.attributes
                );
                return Err(EfiStatus::InvalidParameter);
            }
            if !append && !envelope.timestamp.is_after(&existing.timestamp) {
                debug!(
                    "Rejecting {name}: timestamp {} is not after {}",
                    envelope.timestamp, existing.timestamp
                );
                return Err(EfiStatus::SecurityViolation);
            }
        }

        let new_data = match self.vars.get(&key) {
            Some(existing) if append => {
                let mut merged = existing.data.clone();
                merged.extend_from_slice(&envelope.payload);
                merged
            }
            _ => envelope.payload.clone(),
        };

        if let Some(variable) = secure {
            if !(append && envelope.payload.is_empty()) {
                variable
                    .validate_payload(&new_data)
                    .map_err(|e| {
                        debug!("Rejecting {name}: {e}");
                        EfiStatus::InvalidParameter
                    })?;
            }
        }

        if new_data.is_empty() && !append {
            debug!("Deleting {name}");
            let _ = self.vars.remove(&key);
            return Ok(());
        }

        let timestamp = match self.vars.get(&key) {
            Some(existing)
                if !envelope.timestamp.is_after(&existing.timestamp) =>
            {
                existing.timestamp
            }
            _ => envelope.timestamp,
        };
        let _ = self.vars.insert(
            key,
            StoredVariable {
                attributes: stored_attributes,
                data: new_data,
                timestamp,
            },
        );
        Ok(())
    }
}

impl RuntimeServices for EmulatedFirmware {
    fn get_variable(
        &self,
        name: &[u16],
        guid: &Uuid,
        buf: &mut [u8],
    ) -> Result<(VariableAttributes, usize), EfiStatus> {
        let name = from_ucs2(name);
        let (attributes, data) = match (*guid == STATUS_GUID)
            .then(|| self.status_variable(&name))
            .flatten()
        {
            Some(status) => (STATUS_ATTRIBUTES, status),
            None => {
                let v = self
                    .vars
                    .get(&(name, *guid))
                    .ok_or(EfiStatus::NotFound)?;
                (v.attributes, v.data.clone())
            }
        };

        if buf.len() < data.len() {
            return Err(EfiStatus::BufferTooSmall {
                required: data.len(),
            });
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok((attributes, data.len()))
    }

    fn set_variable(
        &mut self,
        name: &[u16],
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), EfiStatus> {
        let name = from_ucs2(name);
        if *guid == STATUS_GUID && self.status_variable(&name).is_some() {
            return Err(EfiStatus::WriteProtected);
        }

        if attributes.is_time_based() {
            return self.set_time_based(&name, guid, attributes, data);
        }

        let requires_envelope = SecureVariable::ALL
            .into_iter()
            .any(|v| {
                v.name() == name && v.guid() == *guid && v.requires_envelope()
            });
        if requires_envelope {
            debug!(
                "Rejecting {name}: written without time-based authentication"
            );
            return Err(EfiStatus::SecurityViolation);
        }

        let key = (name, *guid);
        let stored_attributes =
            attributes.difference(VariableAttributes::APPEND_WRITE);
        if attributes.is_append() {
            match self.vars.get_mut(&key) {
                Some(existing) => existing.data.extend_from_slice(data),
                None => {
                    let _ = self.vars.insert(
                        key,
                        StoredVariable {
                            attributes: stored_attributes,
                            data: data.to_vec(),
                            timestamp: EfiTime::default(),
                        },
                    );
                }
            }
        } else if data.is_empty() {
            let _ = self.vars.remove(&key).ok_or(EfiStatus::NotFound)?;
        } else {
            let _ = self.vars.insert(
                key,
                StoredVariable {
                    attributes: stored_attributes,
                    data: data.to_vec(),
                    timestamp: EfiTime::default(),
                },
            );
        }
        Ok(())
    }
}
