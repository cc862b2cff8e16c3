// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! EFI_VARIABLE_AUTHENTICATION_2 envelopes.
//!
//! ```text
//! EFI_VARIABLE_AUTHENTICATION_2 {
//!     TimeStamp: EFI_TIME                     // 16 bytes
//!     AuthInfo: WIN_CERTIFICATE_UEFI_GUID {
//!         Hdr: WIN_CERTIFICATE {
//!             dwLength:         u32           // Hdr + CertType + CertData
//!             wRevision:        u16           // 0x0200
//!             wCertificateType: u16           // WIN_CERT_TYPE_EFI_GUID
//!         }
//!         CertType: GUID                      // EFI_CERT_TYPE_PKCS7_GUID
//!         CertData: [u8]                      // DER SignedData, detached
//!     }
//! }
//! ```
//!
//! The envelope is followed directly by the payload written to the
//! variable.

pub mod detached;

use crate::{
    attributes::VariableAttributes,
    crypto::{self, CryptoError},
    database::SignatureDatabase,
    guid::{self, EFI_CERT_TYPE_PKCS7, GUID_SIZE},
    time::EfiTime,
};
use byteorder::{ByteOrder, LittleEndian};
use log::*;
use openssl::{
    pkcs7::{Pkcs7, Pkcs7Flags},
    pkey::{PKey, Private},
    stack::Stack,
    x509::{store::X509StoreBuilder, X509},
};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub const WIN_CERT_REVISION: u16 = 0x0200;
pub const WIN_CERT_TYPE_EFI_GUID: u16 = 0x0EF1;
/// dwLength, wRevision and wCertificateType
pub const WIN_CERTIFICATE_SIZE: usize = 8;
/// WIN_CERTIFICATE followed by the CertType GUID
pub const WIN_CERTIFICATE_UEFI_GUID_SIZE: usize =
    WIN_CERTIFICATE_SIZE + GUID_SIZE;
/// Size of the envelope before the certificate data
pub const AUTH_HEADER_SIZE: usize =
    EfiTime::SIZE + WIN_CERTIFICATE_UEFI_GUID_SIZE;

const_assert_eq!(AUTH_HEADER_SIZE, 40);

#[derive(Error, Debug)]
pub enum AuthError {
    /// The private key does not belong to the certificate
    #[error("the private key does not match the public key of certificate {subject}")]
    KeyMismatch { subject: String },

    /// The signer is not enrolled in the authority variable
    #[error("signer {subject} is not enrolled in {authority}")]
    UnauthorizedSigner { subject: String, authority: String },

    /// PKCS#7 signing failed
    #[error("failed to create the PKCS#7 signature")]
    Sign(#[source] openssl::error::ErrorStack),

    /// The detached signature does not verify
    #[error("signature verification failed: {message}")]
    InvalidSignature {
        message: String,
        #[source]
        source: Option<openssl::error::ErrorStack>,
    },

    /// The envelope is malformed
    #[error("malformed authenticated variable: {0}")]
    Malformed(String),

    /// The signing bundle does not describe the message it claims to
    #[error("signing bundle does not match its message: {0}")]
    BundleMismatch(String),

    /// Unsupported signing bundle
    #[error("unsupported signing bundle format version {0}")]
    UnsupportedBundleVersion(u32),

    /// Operation not valid in the current signing state
    #[error("cannot {operation} while the update is {state}")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },

    /// Signed envelopes need a real timestamp
    #[error("the timestamp of a signed update to {0} must not be zero")]
    ZeroTimestamp(String),

    /// Envelope too large for the 32-bit length field
    #[error("certificate data of {0} bytes does not fit the 32-bit length field")]
    TooLarge(usize),

    /// Certificate or key handling error
    #[error("crypto error")]
    Crypto(#[from] CryptoError),

    /// Bundle serialization error
    #[error("failed to (de)serialize the signing bundle")]
    Json(#[from] serde_json::Error),

    /// Bundle payload is not valid base64
    #[error("failed to decode base64 payload")]
    Base64(#[from] base64::DecodeError),

    /// Error reading or writing a bundle
    #[error("failed to access {path}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// The exact byte sequence covered by the signature of a time-based
/// authenticated write:
/// `name (UTF-16LE, no terminator) || vendor GUID || attributes (u32 LE) ||
/// timestamp || payload`
pub fn signed_message(
    name: &str,
    guid: &Uuid,
    attributes: VariableAttributes,
    timestamp: &EfiTime,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        name.len() * 2 + GUID_SIZE + 4 + EfiTime::SIZE + payload.len(),
    );
    for unit in name.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&guid::to_efi_bytes(guid));
    out.extend_from_slice(&attributes.to_le_bytes());
    out.extend_from_slice(&timestamp.to_bytes());
    out.extend_from_slice(payload);
    out
}

/// A parsed or freshly built EFI_VARIABLE_AUTHENTICATION_2 with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedVariable {
    pub timestamp: EfiTime,
    /// DER PKCS#7 SignedData, empty for an unsigned descriptor
    pub cert_data: Vec<u8>,
    pub payload: Vec<u8>,
}

impl AuthenticatedVariable {
    /// The dwLength field: WIN_CERTIFICATE_UEFI_GUID plus the certificate
    /// data
    pub fn dw_length(&self) -> Result<u32, AuthError> {
        u32::try_from(WIN_CERTIFICATE_UEFI_GUID_SIZE + self.cert_data.len())
            .map_err(|_| AuthError::TooLarge(self.cert_data.len()))
    }

    /// Setup-mode descriptor without certificate data
    pub fn is_unsigned(&self) -> bool {
        self.cert_data.is_empty()
    }

    /// Size of everything before the payload
    pub fn header_len(&self) -> usize {
        AUTH_HEADER_SIZE + self.cert_data.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AuthError> {
        let dw_length = self.dw_length()?;
        let mut out =
            Vec::with_capacity(self.header_len() + self.payload.len());
        out.extend_from_slice(&self.timestamp.to_bytes());

        let mut win_cert = [0u8; WIN_CERTIFICATE_SIZE];
        LittleEndian::write_u32(&mut win_cert[0..4], dw_length);
        LittleEndian::write_u16(&mut win_cert[4..6], WIN_CERT_REVISION);
        LittleEndian::write_u16(&mut win_cert[6..8], WIN_CERT_TYPE_EFI_GUID);
        out.extend_from_slice(&win_cert);
        out.extend_from_slice(&guid::to_efi_bytes(&EFI_CERT_TYPE_PKCS7));
        out.extend_from_slice(&self.cert_data);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Split an envelope into its timestamp, certificate data and payload
    pub fn parse(bytes: &[u8]) -> Result<Self, AuthError> {
        if bytes.len() < AUTH_HEADER_SIZE {
            return Err(AuthError::Malformed(format!(
                "{} bytes cannot hold the {AUTH_HEADER_SIZE} byte header",
                bytes.len()
            )));
        }

        let timestamp = EfiTime::from_bytes(&bytes[..EfiTime::SIZE])
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let win_cert = &bytes[EfiTime::SIZE..];
        let dw_length = LittleEndian::read_u32(&win_cert[0..4]) as usize;
        let revision = LittleEndian::read_u16(&win_cert[4..6]);
        let cert_type = LittleEndian::read_u16(&win_cert[6..8]);
        let cert_guid = guid::from_efi_bytes(&win_cert[WIN_CERTIFICATE_SIZE..])
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        if revision != WIN_CERT_REVISION {
            return Err(AuthError::Malformed(format!(
                "unexpected WIN_CERTIFICATE revision {revision:#06x}"
            )));
        }
        if cert_type != WIN_CERT_TYPE_EFI_GUID {
            return Err(AuthError::Malformed(format!(
                "unexpected WIN_CERTIFICATE type {cert_type:#06x}"
            )));
        }
        if cert_guid != EFI_CERT_TYPE_PKCS7 {
            return Err(AuthError::Malformed(format!(
                "unexpected certificate type {cert_guid}"
            )));
        }
        if dw_length < WIN_CERTIFICATE_UEFI_GUID_SIZE {
            return Err(AuthError::Malformed(format!(
                "dwLength {dw_length} is smaller than the certificate header"
            )));
        }

        let cert_end = EfiTime::SIZE + dw_length;
        if cert_end > bytes.len() {
            return Err(AuthError::Malformed(format!(
                "dwLength {dw_length} runs past the end of the {} byte envelope",
                bytes.len()
            )));
        }

        Ok(Self {
            timestamp,
            cert_data: bytes[AUTH_HEADER_SIZE..cert_end].to_vec(),
            payload: bytes[cert_end..].to_vec(),
        })
    }
}

/// A certificate and the private key that goes with it
pub struct Signer {
    certificate: X509,
    key: PKey<Private>,
}

impl Signer {
    /// Pair a certificate with its key, refusing keys that do not match
    pub fn new(
        certificate: X509,
        key: PKey<Private>,
    ) -> Result<Self, AuthError> {
        let public = crypto::x509_get_pubkey(&certificate)?;
        if !public.public_eq(&key) {
            return Err(AuthError::KeyMismatch {
                subject: crypto::x509_subject(&certificate),
            });
        }
        Ok(Self { certificate, key })
    }

    /// Load a PEM or DER certificate and a PEM private key
    pub fn load(
        cert_path: &Path,
        key_path: &Path,
        key_password: Option<&str>,
    ) -> Result<Self, AuthError> {
        let certificate = crypto::load_x509(cert_path)?;
        let key = crypto::load_private_key(key_path, key_password)?;
        Self::new(certificate, key)
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn certificate_der(&self) -> Result<Vec<u8>, AuthError> {
        Ok(crypto::x509_to_der(&self.certificate)?)
    }

    pub fn subject(&self) -> String {
        crypto::x509_subject(&self.certificate)
    }

    /// Detached PKCS#7 SignedData over `message`, DER encoded
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AuthError> {
        let certs: Stack<X509> = Stack::new().map_err(AuthError::Sign)?;
        let flags =
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY | Pkcs7Flags::NOATTR;
        let p7 =
            Pkcs7::sign(&self.certificate, &self.key, &certs, message, flags)
                .map_err(AuthError::Sign)?;
        p7.to_der().map_err(AuthError::Sign)
    }

    /// Check the signer's certificate is one of the X509 entries of
    /// `authority`, the current contents of the variable named
    /// `authority_name`
    pub fn check_authority(
        &self,
        authority_name: &str,
        authority: &SignatureDatabase,
    ) -> Result<(), AuthError> {
        let der = self.certificate_der()?;
        if authority.contains_certificate(&der) {
            debug!(
                "Signer {} is enrolled in {authority_name}",
                self.subject()
            );
            Ok(())
        } else {
            Err(AuthError::UnauthorizedSigner {
                subject: self.subject(),
                authority: authority_name.to_string(),
            })
        }
    }
}

/// How the envelope of a time-based write is produced
#[derive(Clone, Copy)]
pub enum EnvelopeMode<'a> {
    /// Empty certificate data, only accepted by firmware in setup mode
    Unsigned,
    /// Signed by the given signer
    Signed(&'a Signer),
}

/// Wrap `payload` in an authenticated envelope for variable `name`.
///
/// When `timestamp` is `None` the current UTC time is used. A zero
/// timestamp is only accepted for [`EnvelopeMode::Unsigned`]. Authority
/// membership of the signer is checked by the caller, which knows the
/// platform mode and the authority variable's contents.
pub fn build_envelope(
    name: &str,
    guid: &Uuid,
    attributes: VariableAttributes,
    payload: &[u8],
    mode: EnvelopeMode<'_>,
    timestamp: Option<EfiTime>,
) -> Result<AuthenticatedVariable, AuthError> {
    let timestamp = timestamp.unwrap_or_else(EfiTime::now);
    let cert_data = match mode {
        EnvelopeMode::Unsigned => {
            info!("Building unsigned envelope for {name}");
            Vec::new()
        }
        EnvelopeMode::Signed(_) if timestamp.is_zero() => {
            return Err(AuthError::ZeroTimestamp(name.to_string()));
        }
        EnvelopeMode::Signed(signer) => {
            let message =
                signed_message(name, guid, attributes, &timestamp, payload);
            debug!(
                "Signing {} byte message for {name} as {}",
                message.len(),
                signer.subject()
            );
            signer.sign(&message)?
        }
    };

    let envelope = AuthenticatedVariable {
        timestamp,
        cert_data,
        payload: payload.to_vec(),
    };
    // Fail before anything can reach a store
    let _ = envelope.dw_length()?;
    Ok(envelope)
}

fn invalid(
    message: &str,
) -> impl FnOnce(openssl::error::ErrorStack) -> AuthError {
    let message = message.to_string();
    move |source| AuthError::InvalidSignature {
        message,
        source: Some(source),
    }
}

fn parse_pkcs7(signature: &[u8]) -> Result<Pkcs7, AuthError> {
    Pkcs7::from_der(signature)
        .or_else(|_| Pkcs7::from_pem(signature))
        .map_err(|source| AuthError::InvalidSignature {
            message: "not a DER or PEM PKCS#7 structure".into(),
            source: Some(source),
        })
}

/// Verify a detached PKCS#7 signature over `message`.
///
/// With an empty `trusted` list the certificates embedded in the signature
/// are used, which only proves integrity. Otherwise the signer must be one
/// of `trusted`. Certificate chains are not evaluated; firmware matches
/// signer certificates against its databases directly.
pub fn verify_detached(
    signature: &[u8],
    message: &[u8],
    trusted: &[X509],
) -> Result<(), AuthError> {
    let p7 = parse_pkcs7(signature)?;
    let mut certs = Stack::new().map_err(invalid("failed to allocate stack"))?;
    for cert in trusted {
        certs
            .push(cert.clone())
            .map_err(invalid("failed to build certificate stack"))?;
    }
    let store = X509StoreBuilder::new()
        .map_err(invalid("failed to create certificate store"))?
        .build();

    let mut flags = Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY;
    if !trusted.is_empty() {
        flags |= Pkcs7Flags::NOINTERN;
        let _ = p7
            .signers(&certs, Pkcs7Flags::NOINTERN)
            .map_err(invalid(
                "signer is not one of the trusted certificates",
            ))?;
    }

    p7.verify(&certs, &store, Some(message), None, flags)
        .map_err(invalid("signature does not cover the message"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::generate_signer;
    use crate::esl::{build_x509_list, OwnedSignatureList};
    use crate::guid::{EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE};
    use crate::guid::SignatureType;

    fn fixed_time() -> EfiTime {
        EfiTime {
            year: 2024,
            ..EfiTime::default()
        }
    }

    fn signer(cn: &str) -> Signer {
        let (cert, key) = generate_signer(cn).unwrap(); //#[allow_ci]
        Signer::new(cert, key).unwrap() //#[allow_ci]
    }

    #[test]
    fn test_signed_message_golden_vector() {
        let message = signed_message(
            "db",
            &EFI_IMAGE_SECURITY_DATABASE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &fixed_time(),
            &[],
        );
        assert_eq!(message.len(), 40);
        let expected: [u8; 40] = [
            // "db"
            0x64, 0x00, 0x62, 0x00,
            // d719b2cb-3d3a-4596-a3bc-dad00e67656f
            0xcb, 0xb2, 0x19, 0xd7, 0x3a, 0x3d, 0x96, 0x45, 0xa3, 0xbc,
            0xda, 0xd0, 0x0e, 0x67, 0x65, 0x6f,
            // NV|BS|RT|AT
            0x27, 0x00, 0x00, 0x00,
            // 2024-00-00 00:00:00
            0xe8, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(message, expected);
    }

    #[test]
    fn test_signed_message_is_deterministic() {
        let payload = [1u8, 2, 3];
        let a = signed_message(
            "KEK",
            &EFI_GLOBAL_VARIABLE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &fixed_time(),
            &payload,
        );
        let b = signed_message(
            "KEK",
            &EFI_GLOBAL_VARIABLE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &fixed_time(),
            &payload,
        );
        assert_eq!(a, b);
        assert_eq!(&a[a.len() - 3..], &payload);
    }

    #[test]
    fn test_unsigned_envelope_layout() {
        let payload = vec![0xaa; 10];
        let env = build_envelope(
            "PK",
            &EFI_GLOBAL_VARIABLE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &payload,
            EnvelopeMode::Unsigned,
            Some(fixed_time()),
        )
        .unwrap(); //#[allow_ci]
        assert!(env.is_unsigned());
        assert_eq!(env.dw_length().unwrap(), 24); //#[allow_ci]

        let bytes = env.to_bytes().unwrap(); //#[allow_ci]
        assert_eq!(bytes.len(), 40 + 10);
        assert_eq!(&bytes[16..20], &24u32.to_le_bytes());
        assert_eq!(&bytes[20..22], &[0x00, 0x02]);
        assert_eq!(&bytes[22..24], &[0xf1, 0x0e]);
        assert_eq!(&bytes[24..40], &EFI_CERT_TYPE_PKCS7.to_bytes_le());
        assert_eq!(&bytes[40..], &payload[..]);
        assert_eq!(AuthenticatedVariable::parse(&bytes).unwrap(), env); //#[allow_ci]
    }

    #[test]
    fn test_signed_envelope_lengths_and_signature() {
        let pk = signer("PK");
        let payload = build_x509_list(
            &Uuid::nil(),
            &pk.certificate_der().unwrap(), //#[allow_ci]
        )
        .unwrap(); //#[allow_ci]
        let env = build_envelope(
            "PK",
            &EFI_GLOBAL_VARIABLE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &payload,
            EnvelopeMode::Signed(&pk),
            Some(fixed_time()),
        )
        .unwrap(); //#[allow_ci]

        let bytes = env.to_bytes().unwrap(); //#[allow_ci]
        let dw_length = LittleEndian::read_u32(&bytes[16..20]) as usize;
        assert_eq!(
            dw_length,
            WIN_CERTIFICATE_UEFI_GUID_SIZE + env.cert_data.len()
        );
        // The certificate part, without its GUID, is WIN_CERTIFICATE plus
        // the certificate data
        assert_eq!(
            dw_length - GUID_SIZE,
            WIN_CERTIFICATE_SIZE + env.cert_data.len()
        );
        assert_eq!(
            bytes.len(),
            AUTH_HEADER_SIZE + env.cert_data.len() + payload.len()
        );

        let parsed = AuthenticatedVariable::parse(&bytes).unwrap(); //#[allow_ci]
        assert_eq!(parsed.payload, payload);
        let message = signed_message(
            "PK",
            &EFI_GLOBAL_VARIABLE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &parsed.timestamp,
            &parsed.payload,
        );
        verify_detached(
            &parsed.cert_data,
            &message,
            &[pk.certificate().clone()],
        )
        .unwrap(); //#[allow_ci]
        verify_detached(&parsed.cert_data, &message, &[]).unwrap(); //#[allow_ci]

        // Any change to the covered bytes breaks the signature
        let mut tampered = message.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(verify_detached(&parsed.cert_data, &tampered, &[]).is_err());

        // Signed by PK, not by another key
        let other = signer("other");
        assert!(verify_detached(
            &parsed.cert_data,
            &message,
            &[other.certificate().clone()]
        )
        .is_err());
    }

    #[test]
    fn test_zero_timestamp_only_unsigned() {
        let pk = signer("PK");
        assert!(matches!(
            build_envelope(
                "db",
                &EFI_IMAGE_SECURITY_DATABASE,
                VariableAttributes::AUTHENTICATED_DATABASE,
                &[],
                EnvelopeMode::Signed(&pk),
                Some(EfiTime::default()),
            ),
            Err(AuthError::ZeroTimestamp(name)) if name == "db"
        ));

        let env = build_envelope(
            "db",
            &EFI_IMAGE_SECURITY_DATABASE,
            VariableAttributes::AUTHENTICATED_DATABASE,
            &[],
            EnvelopeMode::Unsigned,
            Some(EfiTime::default()),
        )
        .unwrap(); //#[allow_ci]
        assert!(env.timestamp.is_zero());
    }

    #[test]
    fn test_signature_uses_sha256() {
        // DER OIDs of id-sha256 and id-sha1
        const SHA256_OID: [u8; 11] = [
            0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
        ];
        const SHA1_OID: [u8; 7] = [0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a];

        let signature = signer("PK").sign(b"message").unwrap(); //#[allow_ci]
        let contains = |oid: &[u8]| {
            signature.windows(oid.len()).any(|window| window == oid)
        };
        assert!(contains(&SHA256_OID));
        assert!(!contains(&SHA1_OID));
    }

    #[test]
    fn test_key_mismatch() {
        let (cert, _) = generate_signer("one").unwrap(); //#[allow_ci]
        let (_, key) = generate_signer("two").unwrap(); //#[allow_ci]
        assert!(matches!(
            Signer::new(cert, key),
            Err(AuthError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_check_authority() {
        let kek = signer("KEK");
        let stranger = signer("stranger");
        let authority = SignatureDatabase::from_lists(&[
            OwnedSignatureList::new(SignatureType::X509)
                .with_entry(Uuid::nil(), kek.certificate_der().unwrap()), //#[allow_ci]
        ])
        .unwrap(); //#[allow_ci]

        assert!(kek.check_authority("KEK", &authority).is_ok());
        assert!(matches!(
            stranger.check_authority("KEK", &authority),
            Err(AuthError::UnauthorizedSigner { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        let env = AuthenticatedVariable {
            timestamp: fixed_time(),
            cert_data: vec![0x30, 0x00],
            payload: vec![1, 2, 3],
        };
        let good = env.to_bytes().unwrap(); //#[allow_ci]

        assert!(AuthenticatedVariable::parse(&good[..39]).is_err());

        let mut bad = good.clone();
        bad[20] = 0x01;
        assert!(AuthenticatedVariable::parse(&bad).is_err());

        let mut bad = good.clone();
        bad[22] = 0x02;
        assert!(AuthenticatedVariable::parse(&bad).is_err());

        let mut bad = good.clone();
        bad[24] ^= 0xff;
        assert!(AuthenticatedVariable::parse(&bad).is_err());

        let mut bad = good.clone();
        bad[16..20].copy_from_slice(&1000u32.to_le_bytes());
        assert!(AuthenticatedVariable::parse(&bad).is_err());

        let mut bad = good;
        bad[16..20].copy_from_slice(&8u32.to_le_bytes());
        assert!(AuthenticatedVariable::parse(&bad).is_err());
    }
}
