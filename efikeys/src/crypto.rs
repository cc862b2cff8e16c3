// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

pub mod x509;

use log::*;
use openssl::{
    hash::MessageDigest,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    x509::{X509NameRef, X509},
};
use picky_asn1_der::Asn1RawDer;
use picky_asn1_x509::Certificate;
use serde::Deserialize;
use std::{
    fs::{set_permissions, Permissions},
    io::Write,
    os::unix::fs::PermissionsExt,
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Malformed DER in a certificate
    #[error("malformed DER certificate")]
    DerParseError(#[source] picky_asn1_der::Asn1DerError),

    /// File not found
    #[error("could not find file {0}")]
    FileNotFound(String),

    /// Error creating file
    #[error("failed to create file {file}")]
    FSCreateError {
        file: String,
        source: std::io::Error,
    },

    /// Error calculating hash
    #[error("failed to calculate hash")]
    HashError(#[source] openssl::error::ErrorStack),

    /// Read error
    #[error("failed to read {path}")]
    IOReadError {
        path: String,
        source: std::io::Error,
    },

    /// Write error
    #[error("failed to write")]
    IOWriteError(#[source] std::io::Error),

    /// Error setting file permission
    #[error("failed to set file permission")]
    IOSetPermissionError(#[source] std::io::Error),

    /// Error creating PKey structure from RSA structure
    #[error("failed to create PKey structure from RSA structure")]
    PKeyFromRSAError(#[source] openssl::error::ErrorStack),

    /// Error encoding PKey structure in PKCS#8 format
    #[error("failed to encode PKey structure in PKCS#8 format")]
    PKeyToPKCS8(#[source] openssl::error::ErrorStack),

    /// Error decoding private key from PEM
    #[error("failed to decode private key from PEM")]
    PrivateKeyFromPEMError(#[source] openssl::error::ErrorStack),

    /// Error creating RSA from public components
    #[error("failed to create RSA key from public components")]
    RSAFromComponents(#[source] openssl::error::ErrorStack),

    /// Error generating RSA key pair
    #[error("failed to generate RSA key pair")]
    RSAGenerateError(#[source] openssl::error::ErrorStack),

    /// Error obtaining RSA private key
    #[error("failed to get RSA private key")]
    RSAGetPrivateKeyError(#[source] openssl::error::ErrorStack),

    /// Error converting to owned value
    #[error("failed to convert to owned value")]
    ToOwnedError(#[source] openssl::error::ErrorStack),

    /// Unsupported key algorithm
    #[error("unsupported key algorithm: {id}")]
    UnsupportedKeyAlgorithm { id: String },

    /// Error loading X509 certificate from DER
    #[error("failed to load X509 certificate from DER")]
    X509FromDERError(#[source] openssl::error::ErrorStack),

    /// Error loading X509 certificate from PEM
    #[error("failed to load X509 certificate from PEM")]
    X509FromPEMError(#[source] openssl::error::ErrorStack),

    /// Error obtaining certificate public key
    #[error("failed to get certificate public key")]
    X509GetPublicError(#[source] openssl::error::ErrorStack),

    /// Error encoding X509 certificate in DER format
    #[error("failed to encode X509 certificate in DER format")]
    X509ToDERError(#[source] openssl::error::ErrorStack),

    /// Error encoding X509 certificate in PEM format
    #[error("failed to encode X509 certificate in PEM format")]
    X509ToPEMError(#[source] openssl::error::ErrorStack),
}

fn read_file(path: &Path) -> Result<Vec<u8>, CryptoError> {
    std::fs::read(path).map_err(|source| CryptoError::IOReadError {
        path: path.display().to_string(),
        source,
    })
}

/// Load a X509 certificate in DER format from file
pub fn load_x509_der(input_cert_path: &Path) -> Result<X509, CryptoError> {
    let contents = read_file(input_cert_path)?;
    X509::from_der(&contents).map_err(CryptoError::X509FromDERError)
}

/// Load X509 certificate in PEM format from file
pub fn load_x509_pem(input_cert_path: &Path) -> Result<X509, CryptoError> {
    let contents = read_file(input_cert_path)?;
    X509::from_pem(&contents).map_err(CryptoError::X509FromPEMError)
}

/// Load a X509 certificate in PEM or DER format from a given path
pub fn load_x509(path: &Path) -> Result<X509, CryptoError> {
    if path.exists() {
        load_x509_der(path).or_else(|_| load_x509_pem(path))
    } else {
        Err(CryptoError::FileNotFound(path.display().to_string()))
    }
}

/// Decode a certificate held in memory, DER first then PEM
pub fn x509_from_bytes(bytes: &[u8]) -> Result<X509, CryptoError> {
    X509::from_der(bytes)
        .or_else(|_| X509::from_pem(bytes))
        .map_err(CryptoError::X509FromPEMError)
}

/// Write a X509 certificate to a file in PEM format
pub fn write_x509(cert: &X509, file_path: &Path) -> Result<(), CryptoError> {
    write_file(
        file_path,
        &cert.to_pem().map_err(CryptoError::X509ToPEMError)?,
    )
}

/// Write a X509 certificate to a file in DER format
pub fn write_x509_der(
    cert: &X509,
    file_path: &Path,
) -> Result<(), CryptoError> {
    write_file(file_path, &x509_to_der(cert)?)
}

fn write_file(file_path: &Path, contents: &[u8]) -> Result<(), CryptoError> {
    let mut file = std::fs::File::create(file_path).map_err(|source| {
        CryptoError::FSCreateError {
            file: file_path.display().to_string(),
            source,
        }
    })?;
    file.write_all(contents).map_err(CryptoError::IOWriteError)
}

/// Encode the X509 certificate in DER format
///
/// The certificate is returned as a Vec<u8>
pub fn x509_to_der(cert: &X509) -> Result<Vec<u8>, CryptoError> {
    cert.to_der().map_err(CryptoError::X509ToDERError)
}

/// Get the X509 certificate public key
pub fn x509_get_pubkey(cert: &X509) -> Result<PKey<Public>, CryptoError> {
    cert.public_key().map_err(CryptoError::X509GetPublicError)
}

fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|e| {
            let key = e.object().nid().short_name().unwrap_or("?");
            let value = e
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{key}={value}")
        })
        .collect::<Vec<String>>()
        .join(", ")
}

/// Subject distinguished name as `CN=..., O=...`
pub fn x509_subject(cert: &X509) -> String {
    name_to_string(cert.subject_name())
}

/// Issuer distinguished name as `CN=..., O=...`
pub fn x509_issuer(cert: &X509) -> String {
    name_to_string(cert.issuer_name())
}

/// Calculate the hash of the input data using the given Message Digest algorithm
pub fn hash(
    data: &[u8],
    algorithm: MessageDigest,
) -> Result<Vec<u8>, CryptoError> {
    Ok(openssl::hash::hash(algorithm, data)
        .map_err(CryptoError::HashError)?
        .to_vec())
}

/// Certificate with its top level elements kept as encoded
#[derive(Deserialize)]
struct RawCertificate {
    tbs_certificate: Asn1RawDer,
    _signature_algorithm: Asn1RawDer,
    _signature_value: Asn1RawDer,
}

/// The encoded TBSCertificate of a DER certificate, tag and length included
pub fn tbs_certificate(der: &[u8]) -> Result<Vec<u8>, CryptoError> {
    // Only well-formed certificates are accepted, the raw split below
    // would take any three element SEQUENCE
    let _: Certificate =
        picky_asn1_der::from_bytes(der).map_err(CryptoError::DerParseError)?;
    let raw: RawCertificate =
        picky_asn1_der::from_bytes(der).map_err(CryptoError::DerParseError)?;
    Ok(raw.tbs_certificate.0)
}

/// Digest of the TBSCertificate, as stored in X509_SHA* revocation entries
pub fn tbs_digest(
    der: &[u8],
    algorithm: MessageDigest,
) -> Result<Vec<u8>, CryptoError> {
    hash(&tbs_certificate(der)?, algorithm)
}

/// Read a PEM private key, decrypting it with `key_password` when one is
/// given
pub fn load_private_key(
    key_path: &Path,
    key_password: Option<&str>,
) -> Result<PKey<Private>, CryptoError> {
    let pem = read_file(key_path)?;
    match key_password {
        Some(pw) if !pw.is_empty() => {
            PKey::private_key_from_pem_passphrase(&pem, pw.as_bytes())
                .map_err(CryptoError::PrivateKeyFromPEMError)
        }
        _ => PKey::private_key_from_pem(&pem)
            .map_err(CryptoError::PrivateKeyFromPEMError),
    }
}

/// Read a PEM file and returns the public and private keys
pub fn load_key_pair(
    key_path: &Path,
    key_password: Option<&str>,
) -> Result<(PKey<Public>, PKey<Private>), CryptoError> {
    let private = load_private_key(key_path, key_password)?;
    let public = pkey_pub_from_priv(&private)?;
    Ok((public, private))
}

/// Write a private key to a file.
///
/// If a passphrase is provided, the key will be stored encrypted using AES-256-CBC
pub fn write_key_pair(
    key: &PKey<Private>,
    file_path: &Path,
    passphrase: Option<&str>,
) -> Result<(), CryptoError> {
    let pem = match passphrase {
        Some(pw) if !pw.is_empty() => key
            .private_key_to_pem_pkcs8_passphrase(
                openssl::symm::Cipher::aes_256_cbc(),
                pw.as_bytes(),
            )
            .map_err(CryptoError::PKeyToPKCS8)?,
        _ => key
            .private_key_to_pem_pkcs8()
            .map_err(CryptoError::PKeyToPKCS8)?,
    };
    write_file(file_path, &pem)?;
    set_permissions(file_path, Permissions::from_mode(0o600))
        .map_err(CryptoError::IOSetPermissionError)?;
    Ok(())
}

fn rsa_generate(key_size: u32) -> Result<PKey<Private>, CryptoError> {
    PKey::from_rsa(
        Rsa::generate(key_size).map_err(CryptoError::RSAGenerateError)?,
    )
    .map_err(CryptoError::PKeyFromRSAError)
}

/// Generate RSA key pair with the given size
///
/// Returns a tuple containing the PKey<Public> and PKey<Private>
pub fn rsa_generate_pair(
    key_size: u32,
) -> Result<(PKey<Public>, PKey<Private>), CryptoError> {
    let private = rsa_generate(key_size)?;
    let public = pkey_pub_from_priv(&private)?;

    Ok((public, private))
}

pub(crate) fn pkey_pub_from_priv(
    privkey: &PKey<Private>,
) -> Result<PKey<Public>, CryptoError> {
    match privkey.id() {
        Id::RSA => {
            let rsa =
                privkey.rsa().map_err(CryptoError::RSAGetPrivateKeyError)?;
            let public = Rsa::from_public_components(
                rsa.n().to_owned().map_err(CryptoError::ToOwnedError)?,
                rsa.e().to_owned().map_err(CryptoError::ToOwnedError)?,
            )
            .map_err(CryptoError::RSAFromComponents)?;
            PKey::from_rsa(public).map_err(CryptoError::PKeyFromRSAError)
        }
        id => Err(CryptoError::UnsupportedKeyAlgorithm {
            id: format!("{id:?}"),
        }),
    }
}

pub mod testing {
    use super::*;
    use std::path::{Path, PathBuf};

    #[derive(Error, Debug)]
    pub enum CryptoTestError {
        /// Crypto error
        #[error("CryptoError")]
        CryptoError(#[from] CryptoError),

        /// Certificate builder error
        #[error("CertificateBuilderError")]
        CertificateBuilderError(#[from] x509::CertificateBuilderError),
    }

    /// A throwaway RSA-2048 key and a self-signed certificate for it
    pub fn generate_signer(
        common_name: &str,
    ) -> Result<(X509, PKey<Private>), CryptoTestError> {
        let key = rsa_generate(2048)?;
        let cert = x509::CertificateBuilder::new()
            .private_key(&key)
            .common_name(common_name)
            .build()?;
        Ok((cert, key))
    }

    /// Generate a signer and write it as `{name}.crt` (PEM) and
    /// `{name}.key` under `dir`
    ///
    /// Returns the paths to the certificate and the key
    pub fn write_signer(
        dir: &Path,
        name: &str,
    ) -> Result<(PathBuf, PathBuf, X509, PKey<Private>), CryptoTestError> {
        let (cert, key) = generate_signer(name)?;
        let cert_path = dir.join(format!("{name}.crt"));
        let key_path = dir.join(format!("{name}.key"));
        write_x509(&cert, &cert_path)?;
        write_key_pair(&key, &key_path, None)?;
        Ok((cert_path, key_path, cert, key))
    }
}
