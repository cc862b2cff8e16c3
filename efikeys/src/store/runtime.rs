// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Variables behind UEFI runtime services.
//!
//! [`RuntimeServices`] is the seam to the platform: a boot-time binding
//! implements it over GetVariable/SetVariable, and the firmware emulation
//! in [`super::emulated`] implements it for tests.

use super::{StoreError, Variable, VariableStore};
use crate::attributes::VariableAttributes;
use log::*;
use std::fmt;
use uuid::Uuid;

/// Initial read buffer, grown on EFI_BUFFER_TOO_SMALL
const INITIAL_BUFFER_SIZE: usize = 4096;

/// The EFI_STATUS codes variable services return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfiStatus {
    NotFound,
    /// The buffer passed to GetVariable is too small for the data
    BufferTooSmall { required: usize },
    InvalidParameter,
    OutOfResources,
    DeviceError,
    WriteProtected,
    SecurityViolation,
    Unsupported,
    Other(usize),
}

impl fmt::Display for EfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EfiStatus::NotFound => f.write_str("EFI_NOT_FOUND"),
            EfiStatus::BufferTooSmall { required } => {
                write!(f, "EFI_BUFFER_TOO_SMALL ({required} bytes needed)")
            }
            EfiStatus::InvalidParameter => {
                f.write_str("EFI_INVALID_PARAMETER")
            }
            EfiStatus::OutOfResources => f.write_str("EFI_OUT_OF_RESOURCES"),
            EfiStatus::DeviceError => f.write_str("EFI_DEVICE_ERROR"),
            EfiStatus::WriteProtected => f.write_str("EFI_WRITE_PROTECTED"),
            EfiStatus::SecurityViolation => {
                f.write_str("EFI_SECURITY_VIOLATION")
            }
            EfiStatus::Unsupported => f.write_str("EFI_UNSUPPORTED"),
            EfiStatus::Other(code) => write!(f, "EFI status {code:#x}"),
        }
    }
}

/// GetVariable and SetVariable as firmware exposes them
pub trait RuntimeServices {
    /// Copy the variable into `buf`, returning its attributes and size
    ///
    /// `name` is UCS-2 and null terminated.
    fn get_variable(
        &self,
        name: &[u16],
        guid: &Uuid,
        buf: &mut [u8],
    ) -> Result<(VariableAttributes, usize), EfiStatus>;

    fn set_variable(
        &mut self,
        name: &[u16],
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), EfiStatus>;
}

/// Null terminated UCS-2 encoding of a variable name
pub fn to_ucs2(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Decode a null terminated UCS-2 name
pub fn from_ucs2(name: &[u16]) -> String {
    let end = name.iter().position(|c| *c == 0).unwrap_or(name.len());
    String::from_utf16_lossy(&name[..end])
}

/// A [`VariableStore`] over runtime services
pub struct RuntimeStore<R> {
    services: R,
}

impl<R: RuntimeServices> RuntimeStore<R> {
    pub fn new(services: R) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &R {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut R {
        &mut self.services
    }

    pub fn into_inner(self) -> R {
        self.services
    }
}

fn map_status(name: &str, guid: &Uuid, status: EfiStatus) -> StoreError {
    match status {
        EfiStatus::NotFound => StoreError::not_found(name, guid),
        EfiStatus::SecurityViolation | EfiStatus::WriteProtected => {
            refused(name, status)
        }
        status => StoreError::Firmware {
            name: name.to_string(),
            status,
        },
    }
}

/// SetVariable also answers EFI_INVALID_PARAMETER when the attributes do
/// not match the existing variable
fn map_set_status(name: &str, guid: &Uuid, status: EfiStatus) -> StoreError {
    match status {
        EfiStatus::InvalidParameter => refused(name, status),
        status => map_status(name, guid, status),
    }
}

fn refused(name: &str, status: EfiStatus) -> StoreError {
    StoreError::PermissionDenied {
        name: name.to_string(),
        message: format!("Firmware refused to write {name}: {status}"),
    }
}

impl<R: RuntimeServices> VariableStore for RuntimeStore<R> {
    fn get(&self, name: &str, guid: &Uuid) -> Result<Variable, StoreError> {
        let ucs2 = to_ucs2(name);
        let mut buf = vec![0u8; INITIAL_BUFFER_SIZE];

        let (attributes, size) =
            match self.services.get_variable(&ucs2, guid, &mut buf) {
                Err(EfiStatus::BufferTooSmall { required }) => {
                    trace!("{name} needs a {required} byte buffer");
                    buf = vec![0u8; required];
                    self.services
                        .get_variable(&ucs2, guid, &mut buf)
                        .map_err(|status| map_status(name, guid, status))?
                }
                other => {
                    other.map_err(|status| map_status(name, guid, status))?
                }
            };

        buf.truncate(size);
        Ok(Variable {
            attributes,
            data: buf,
        })
    }

    fn set(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), StoreError> {
        self.services
            .set_variable(&to_ucs2(name), guid, attributes, data)
            .map_err(|status| map_set_status(name, guid, status))?;
        info!(
            "Wrote {} bytes to {name} with attributes {attributes}",
            data.len()
        );
        Ok(())
    }
}
