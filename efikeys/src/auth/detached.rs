// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Two-phase signing, for keys that never touch the machine being updated.
//!
//! An update starts [`SigningState::Unsigned`]. Preparing it fixes the
//! timestamp and the exact message to sign, and moves it to
//! [`SigningState::AwaitingSignature`]. That state can be exported as a
//! [`SigningBundle`], carried to the key custodian and imported again.
//! Attaching a signature that verifies over the message moves the update to
//! [`SigningState::Signed`], from which the envelope is taken.

use super::{
    parse_pkcs7, signed_message, verify_detached, AuthError,
    AuthenticatedVariable, Signer,
};
use crate::{attributes::VariableAttributes, time::EfiTime};
use base64::{engine::general_purpose, Engine as _};
use log::*;
use openssl::{hash::MessageDigest, x509::X509};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Version written into new bundles
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// What is being written, before any timestamp or signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub name: String,
    pub guid: Uuid,
    pub attributes: VariableAttributes,
    pub payload: Vec<u8>,
}

/// A request whose timestamp and message are fixed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignature {
    request: SigningRequest,
    timestamp: EfiTime,
    message: Vec<u8>,
}

impl PendingSignature {
    pub fn request(&self) -> &SigningRequest {
        &self.request
    }

    pub fn timestamp(&self) -> EfiTime {
        self.timestamp
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }
}

/// The intermediate file exchanged with the key custodian
///
/// The message itself is not stored; it is rebuilt from the fields on
/// import and compared against `message_sha256` and `message_length`, so a
/// bundle edited by hand is refused instead of producing an envelope the
/// firmware rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningBundle {
    pub format_version: u32,
    pub variable: String,
    pub guid: Uuid,
    pub attributes: VariableAttributes,
    pub timestamp: EfiTime,
    /// Base64 payload
    pub payload: String,
    /// Hex SHA-256 of the message to sign
    pub message_sha256: String,
    pub message_length: usize,
}

impl SigningBundle {
    pub fn to_json(&self) -> Result<String, AuthError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, AuthError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), AuthError> {
        std::fs::write(path, self.to_json()?).map_err(|source| AuthError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, AuthError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            AuthError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
        Self::from_json(&text)
    }
}

fn message_digest(message: &[u8]) -> Result<String, AuthError> {
    Ok(hex::encode(crate::crypto::hash(message, MessageDigest::sha256())?))
}

/// Where an update is in the detached signing protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningState {
    Unsigned(SigningRequest),
    AwaitingSignature(PendingSignature),
    Signed(AuthenticatedVariable),
}

impl SigningState {
    pub fn new(
        name: &str,
        guid: Uuid,
        attributes: VariableAttributes,
        payload: Vec<u8>,
    ) -> Self {
        SigningState::Unsigned(SigningRequest {
            name: name.to_string(),
            guid,
            attributes,
            payload,
        })
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            SigningState::Unsigned(_) => "unsigned",
            SigningState::AwaitingSignature(_) => "awaiting a signature",
            SigningState::Signed(_) => "signed",
        }
    }

    fn invalid(&self, operation: &'static str) -> AuthError {
        AuthError::InvalidTransition {
            state: self.state_name(),
            operation,
        }
    }

    /// Fix the timestamp, the current UTC time when `None`, and compute the
    /// message to sign
    pub fn prepare(
        self,
        timestamp: Option<EfiTime>,
    ) -> Result<Self, AuthError> {
        match self {
            SigningState::Unsigned(request) => {
                let timestamp = timestamp.unwrap_or_else(EfiTime::now);
                if timestamp.is_zero() {
                    return Err(AuthError::ZeroTimestamp(request.name));
                }
                let message = signed_message(
                    &request.name,
                    &request.guid,
                    request.attributes,
                    &timestamp,
                    &request.payload,
                );
                debug!(
                    "Prepared {} byte message for {} at {timestamp}",
                    message.len(),
                    request.name
                );
                Ok(SigningState::AwaitingSignature(PendingSignature {
                    request,
                    timestamp,
                    message,
                }))
            }
            other => Err(other.invalid("prepare")),
        }
    }

    /// The message to be signed, once prepared
    pub fn message(&self) -> Option<&[u8]> {
        match self {
            SigningState::AwaitingSignature(p) => Some(&p.message),
            _ => None,
        }
    }

    pub fn to_bundle(&self) -> Result<SigningBundle, AuthError> {
        match self {
            SigningState::AwaitingSignature(p) => Ok(SigningBundle {
                format_version: BUNDLE_FORMAT_VERSION,
                variable: p.request.name.clone(),
                guid: p.request.guid,
                attributes: p.request.attributes,
                timestamp: p.timestamp,
                payload: general_purpose::STANDARD.encode(&p.request.payload),
                message_sha256: message_digest(&p.message)?,
                message_length: p.message.len(),
            }),
            other => Err(other.invalid("export a bundle")),
        }
    }

    /// Rebuild an update awaiting its signature from a bundle
    pub fn from_bundle(bundle: &SigningBundle) -> Result<Self, AuthError> {
        if bundle.format_version != BUNDLE_FORMAT_VERSION {
            return Err(AuthError::UnsupportedBundleVersion(
                bundle.format_version,
            ));
        }

        if bundle.timestamp.is_zero() {
            return Err(AuthError::ZeroTimestamp(bundle.variable.clone()));
        }
        let payload = general_purpose::STANDARD.decode(&bundle.payload)?;
        let message = signed_message(
            &bundle.variable,
            &bundle.guid,
            bundle.attributes,
            &bundle.timestamp,
            &payload,
        );

        if message.len() != bundle.message_length {
            return Err(AuthError::BundleMismatch(format!(
                "message is {} bytes, the bundle declares {}",
                message.len(),
                bundle.message_length
            )));
        }
        let digest = message_digest(&message)?;
        if !digest.eq_ignore_ascii_case(&bundle.message_sha256) {
            return Err(AuthError::BundleMismatch(format!(
                "message digest is {digest}, the bundle declares {}",
                bundle.message_sha256
            )));
        }

        Ok(SigningState::AwaitingSignature(PendingSignature {
            request: SigningRequest {
                name: bundle.variable.clone(),
                guid: bundle.guid,
                attributes: bundle.attributes,
                payload,
            },
            timestamp: bundle.timestamp,
            message,
        }))
    }

    /// Accept an externally produced detached signature, DER or PEM.
    ///
    /// When `signer` is given the signature must come from that
    /// certificate; otherwise the certificates embedded in the signature are
    /// used to check it covers the message.
    pub fn attach(
        self,
        signature: &[u8],
        signer: Option<&X509>,
    ) -> Result<Self, AuthError> {
        match self {
            SigningState::AwaitingSignature(p) => {
                let trusted: Vec<X509> = signer.into_iter().cloned().collect();
                verify_detached(signature, &p.message, &trusted)?;
                // Firmware wants DER whatever the custodian handed back
                let der = parse_pkcs7(signature)?
                    .to_der()
                    .map_err(AuthError::Sign)?;
                info!(
                    "Attached {} byte signature for {}",
                    der.len(),
                    p.request.name
                );
                Ok(SigningState::Signed(AuthenticatedVariable {
                    timestamp: p.timestamp,
                    cert_data: der,
                    payload: p.request.payload,
                }))
            }
            other => Err(other.invalid("attach a signature")),
        }
    }

    /// Sign in-process, for keys available locally
    pub fn sign_with(self, signer: &Signer) -> Result<Self, AuthError> {
        match self {
            SigningState::AwaitingSignature(p) => {
                let cert_data = signer.sign(&p.message)?;
                Ok(SigningState::Signed(AuthenticatedVariable {
                    timestamp: p.timestamp,
                    cert_data,
                    payload: p.request.payload,
                }))
            }
            other => Err(other.invalid("sign")),
        }
    }

    pub fn into_envelope(self) -> Result<AuthenticatedVariable, AuthError> {
        match self {
            SigningState::Signed(envelope) => Ok(envelope),
            other => Err(other.invalid("take the envelope")),
        }
    }
}
