// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Well-known GUIDs and the signature type registry.
//!
//! GUIDs are kept as [`Uuid`] values in their canonical textual form. On the
//! wire, firmware stores the first three fields little-endian, which is what
//! [`to_efi_bytes`] and [`from_efi_bytes`] produce and consume.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub const GUID_SIZE: usize = 16;

/// Owner of PK, KEK and the platform status variables
pub const EFI_GLOBAL_VARIABLE: Uuid =
    Uuid::from_u128(0x8be4df61_93ca_11d2_aa0d_00e098032b8c);
/// Owner of db, dbx and dbt
pub const EFI_IMAGE_SECURITY_DATABASE: Uuid =
    Uuid::from_u128(0xd719b2cb_3d3a_4596_a3bc_dad00e67656f);
/// Owner of the shim machine owner key list
pub const SHIM_LOCK: Uuid =
    Uuid::from_u128(0x605dab50_e046_4300_abb6_3dd810dd8b23);
/// Signature owner used for hashes enrolled by the platform owner
pub const MOK_OWNER: Uuid = SHIM_LOCK;
/// Signature of an authenticated variable store in a flash image
pub const EFI_AUTHENTICATED_VARIABLE: Uuid =
    Uuid::from_u128(0xaaf32c78_947b_439a_a180_2e144ec37792);

pub const EFI_CERT_SHA1: Uuid =
    Uuid::from_u128(0x826ca512_cf10_4ac9_b187_be01496631bd);
pub const EFI_CERT_SHA256: Uuid =
    Uuid::from_u128(0xc1c41626_504c_4092_aca9_41f936934328);
pub const EFI_CERT_SHA384: Uuid =
    Uuid::from_u128(0xff3e5307_9fd0_48c9_85f1_8ad56c701e01);
pub const EFI_CERT_SHA512: Uuid =
    Uuid::from_u128(0x093e0fae_a6c4_4f50_9f1b_d41e2b89c19a);
pub const EFI_CERT_RSA2048: Uuid =
    Uuid::from_u128(0x3c5766e8_269c_4e34_aa14_ed776e85b3b6);
pub const EFI_CERT_X509: Uuid =
    Uuid::from_u128(0xa5c059a1_94e4_4aa7_87b5_ab155c2bf072);
pub const EFI_CERT_X509_SHA256: Uuid =
    Uuid::from_u128(0x3bd2a492_96c0_4079_b420_fcf98ef103ed);
pub const EFI_CERT_X509_SHA384: Uuid =
    Uuid::from_u128(0x7076876e_80c2_4ee6_aad2_28b349a6865b);
pub const EFI_CERT_X509_SHA512: Uuid =
    Uuid::from_u128(0x446dbf63_2502_4cda_bcfa_2465d2b0fe9d);
/// Certificate type of the WIN_CERTIFICATE_UEFI_GUID in an authenticated
/// variable, and the signature type of PKCS#7 lists
pub const EFI_CERT_TYPE_PKCS7: Uuid =
    Uuid::from_u128(0x4aafd29d_68df_49ee_8aa9_347d375665a7);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GuidError {
    /// Not enough bytes for a GUID
    #[error("a GUID needs 16 bytes, got {0}")]
    Length(usize),

    /// Unparseable textual GUID
    #[error("invalid GUID '{0}'")]
    Parse(String),
}

/// Encode a GUID in the mixed-endian layout used by firmware
pub fn to_efi_bytes(guid: &Uuid) -> [u8; GUID_SIZE] {
    guid.to_bytes_le()
}

/// Decode a GUID from the first 16 bytes of `bytes`
pub fn from_efi_bytes(bytes: &[u8]) -> Result<Uuid, GuidError> {
    let raw = bytes
        .get(..GUID_SIZE)
        .ok_or(GuidError::Length(bytes.len()))?;
    Uuid::from_slice_le(raw).map_err(|_| GuidError::Length(raw.len()))
}

/// Parse a GUID in its canonical textual form
pub fn parse(text: &str) -> Result<Uuid, GuidError> {
    Uuid::parse_str(text.trim()).map_err(|_| GuidError::Parse(text.into()))
}

/// The encoding of the entries of a signature list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Rsa2048,
    X509,
    X509Sha256,
    X509Sha384,
    X509Sha512,
    Pkcs7,
    Unknown(Uuid),
}

impl SignatureType {
    pub fn from_guid(guid: &Uuid) -> Self {
        match *guid {
            EFI_CERT_SHA1 => SignatureType::Sha1,
            EFI_CERT_SHA256 => SignatureType::Sha256,
            EFI_CERT_SHA384 => SignatureType::Sha384,
            EFI_CERT_SHA512 => SignatureType::Sha512,
            EFI_CERT_RSA2048 => SignatureType::Rsa2048,
            EFI_CERT_X509 => SignatureType::X509,
            EFI_CERT_X509_SHA256 => SignatureType::X509Sha256,
            EFI_CERT_X509_SHA384 => SignatureType::X509Sha384,
            EFI_CERT_X509_SHA512 => SignatureType::X509Sha512,
            EFI_CERT_TYPE_PKCS7 => SignatureType::Pkcs7,
            other => SignatureType::Unknown(other),
        }
    }

    pub fn guid(&self) -> Uuid {
        match self {
            SignatureType::Sha1 => EFI_CERT_SHA1,
            SignatureType::Sha256 => EFI_CERT_SHA256,
            SignatureType::Sha384 => EFI_CERT_SHA384,
            SignatureType::Sha512 => EFI_CERT_SHA512,
            SignatureType::Rsa2048 => EFI_CERT_RSA2048,
            SignatureType::X509 => EFI_CERT_X509,
            SignatureType::X509Sha256 => EFI_CERT_X509_SHA256,
            SignatureType::X509Sha384 => EFI_CERT_X509_SHA384,
            SignatureType::X509Sha512 => EFI_CERT_X509_SHA512,
            SignatureType::Pkcs7 => EFI_CERT_TYPE_PKCS7,
            SignatureType::Unknown(guid) => *guid,
        }
    }

    /// Short label used when dumping a database
    pub fn label(&self) -> &'static str {
        match self {
            SignatureType::Sha1 => "SHA1",
            SignatureType::Sha256 => "SHA256",
            SignatureType::Sha384 => "SHA384",
            SignatureType::Sha512 => "SHA512",
            SignatureType::Rsa2048 => "RSA2048",
            SignatureType::X509 => "X509",
            SignatureType::X509Sha256 => "X509_SHA256",
            SignatureType::X509Sha384 => "X509_SHA384",
            SignatureType::X509Sha512 => "X509_SHA512",
            SignatureType::Pkcs7 => "PKCS7",
            SignatureType::Unknown(_) => "Unknown",
        }
    }

    /// Length of the data part of every entry, when the type fixes it.
    ///
    /// The X509 hash types carry the TBS digest followed by a 16-byte
    /// time of revocation.
    pub fn data_size(&self) -> Option<usize> {
        match self {
            SignatureType::Sha1 => Some(20),
            SignatureType::Sha256 => Some(32),
            SignatureType::Sha384 => Some(48),
            SignatureType::Sha512 => Some(64),
            SignatureType::Rsa2048 => Some(256),
            SignatureType::X509Sha256 => Some(32 + 16),
            SignatureType::X509Sha384 => Some(48 + 16),
            SignatureType::X509Sha512 => Some(64 + 16),
            SignatureType::X509
            | SignatureType::Pkcs7
            | SignatureType::Unknown(_) => None,
        }
    }

    pub fn is_hash(&self) -> bool {
        matches!(
            self,
            SignatureType::Sha1
                | SignatureType::Sha256
                | SignatureType::Sha384
                | SignatureType::Sha512
        )
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
