// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Offline conversions between certificates, binaries and signature lists

use super::{read_file, resolve_owner, write_file};
use crate::config::Config;
use crate::error::{EfikeysctlError, ErrorContext};
use efikeys::{
    authenticode, crypto,
    database::{extract_certificates, SignatureDatabase},
    esl,
    guid::SignatureType,
    time::EfiTime,
};
use log::{debug, info};
use openssl::hash::MessageDigest;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub fn cert_to_esl(
    cert: &Path,
    output: &Path,
    owner: Option<&str>,
    config: &Config,
) -> Result<Value, EfikeysctlError> {
    let owner = resolve_owner(owner, config)?;
    let x509 = crypto::load_x509(cert)?;
    let der = crypto::x509_to_der(&x509)?;
    let list = esl::build_x509_list(&owner, &der)?;
    write_file(output, &list)?;

    Ok(json!({
        "message": format!(
            "Wrote X509 list for {} ({} bytes) to {}",
            crypto::x509_subject(&x509),
            list.len(),
            output.display()
        ),
        "owner": owner.to_string(),
        "bytes": list.len(),
    }))
}

/// `files` holds the binaries followed by the output path. Each binary gets
/// its own single-entry SHA-256 list.
pub fn hash_to_esl(
    files: &[PathBuf],
    owner: Option<&str>,
    config: &Config,
) -> Result<Value, EfikeysctlError> {
    let Some((output, binaries)) = files.split_last() else {
        return Err(EfikeysctlError::validation(
            "hash-to-esl needs at least one binary and an output file",
        ));
    };
    if binaries.is_empty() {
        return Err(EfikeysctlError::validation(
            "hash-to-esl needs at least one binary before the output file",
        ));
    }

    let owner = resolve_owner(owner, config)?;
    let mut out = Vec::new();
    let mut hashes = Vec::with_capacity(binaries.len());
    for path in binaries {
        let image = read_file(path)?;
        let digest = authenticode::authenticode_sha256(&image)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        debug!("{}: {}", path.display(), hex::encode(digest));
        out.extend(esl::build_sha256_list(&owner, &digest));
        hashes.push(json!({
            "file": path.display().to_string(),
            "sha256": hex::encode(digest),
        }));
    }
    write_file(output, &out)?;

    Ok(json!({
        "message": format!(
            "Wrote {} SHA256 list(s) to {}",
            binaries.len(),
            output.display()
        ),
        "hashes": hashes,
    }))
}

pub struct CertHashParams<'a> {
    pub cert: &'a Path,
    pub output: &'a Path,
    pub owner: Option<&'a str>,
    /// 256, 384 or 512
    pub hash_bits: u16,
    pub revocation_time: Option<&'a str>,
}

fn x509_hash_kind(
    bits: u16,
) -> Result<(SignatureType, MessageDigest), EfikeysctlError> {
    match bits {
        256 => Ok((SignatureType::X509Sha256, MessageDigest::sha256())),
        384 => Ok((SignatureType::X509Sha384, MessageDigest::sha384())),
        512 => Ok((SignatureType::X509Sha512, MessageDigest::sha512())),
        other => Err(EfikeysctlError::validation(format!(
            "unsupported hash size {other}, expected 256, 384 or 512"
        ))),
    }
}

/// Revoke a certificate by the digest of its TBSCertificate.
///
/// Without a revocation time the entry carries the zero time, which
/// revokes every signature made with the certificate.
pub fn cert_to_hash_esl(
    params: &CertHashParams<'_>,
    config: &Config,
) -> Result<Value, EfikeysctlError> {
    let (kind, digest) = x509_hash_kind(params.hash_bits)?;
    let owner = resolve_owner(params.owner, config)?;
    let revocation = match params.revocation_time {
        Some(text) => EfiTime::parse(text)?,
        None => EfiTime::default(),
    };

    let x509 = crypto::load_x509(params.cert)?;
    let der = crypto::x509_to_der(&x509)?;
    let tbs = crypto::tbs_digest(&der, digest)?;
    let list = esl::build_x509_hash_list(kind, &owner, &tbs, &revocation)?;
    write_file(params.output, &list)?;

    Ok(json!({
        "message": format!(
            "Wrote {} revocation of {} to {}",
            kind.label(),
            crypto::x509_subject(&x509),
            params.output.display()
        ),
        "tbs_hash": hex::encode(&tbs),
        "time_of_revocation": revocation.to_string(),
    }))
}

/// Write every X.509 entry of a signature list file as `{prefix}-{n}.der`
pub fn esl_to_certs(
    esl_path: &Path,
    prefix: &str,
) -> Result<Value, EfikeysctlError> {
    let db = SignatureDatabase::from_bytes(read_file(esl_path)?)
        .with_context(|| {
            format!("{} is not a valid signature database", esl_path.display())
        })?;

    let mut written = Vec::new();
    for (n, der) in extract_certificates(&db).into_iter().enumerate() {
        let path = PathBuf::from(format!("{prefix}-{n}.der"));
        write_file(&path, &der)?;
        info!("Extracted certificate {n} to {}", path.display());
        written.push(path.display().to_string());
    }

    let message = if written.is_empty() {
        format!("{} holds no X509 certificates", esl_path.display())
    } else {
        format!("Extracted {} certificate(s)", written.len())
    };
    Ok(json!({
        "message": message,
        "files": written,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use efikeys::crypto::testing::write_signer;

    #[test]
    fn test_cert_to_esl_and_back() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let (cert, _, x509, _) = write_signer(dir.path(), "db").unwrap(); //#[allow_ci]
        let esl_path = dir.path().join("db.esl");

        let value = cert_to_esl(
            &cert,
            &esl_path,
            Some("605dab50-e046-4300-abb6-3dd810dd8b23"),
            &Config::default(),
        )
        .unwrap(); //#[allow_ci]
        assert_eq!(value["owner"], "605dab50-e046-4300-abb6-3dd810dd8b23");

        let prefix = dir.path().join("out").display().to_string();
        let value = esl_to_certs(&esl_path, &prefix).unwrap(); //#[allow_ci]
        assert_eq!(value["files"].as_array().map(Vec::len), Some(1));

        let der = std::fs::read(format!("{prefix}-0.der")).unwrap(); //#[allow_ci]
        assert_eq!(der, x509.to_der().unwrap()); //#[allow_ci]
    }

    #[test]
    fn test_cert_to_hash_esl() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let (cert, _, x509, _) = write_signer(dir.path(), "old").unwrap(); //#[allow_ci]
        let output = dir.path().join("revoke.esl");

        let _ = cert_to_hash_esl(
            &CertHashParams {
                cert: &cert,
                output: &output,
                owner: None,
                hash_bits: 384,
                revocation_time: Some("2025-06-01 00:00:00"),
            },
            &Config::default(),
        )
        .unwrap(); //#[allow_ci]

        let db = SignatureDatabase::from_bytes(std::fs::read(&output).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        let list = db.list(0).unwrap(); //#[allow_ci]
        assert_eq!(list.signature_type(), SignatureType::X509Sha384);
        assert_eq!(list.entry_size(), 16 + 48 + 16);

        let entry = list.entries().unwrap().next().unwrap(); //#[allow_ci]
        let der = x509.to_der().unwrap(); //#[allow_ci]
        let tbs = crypto::tbs_digest(&der, MessageDigest::sha384()).unwrap(); //#[allow_ci]
        assert_eq!(&entry.data[..48], tbs.as_slice());
        let time = EfiTime::from_bytes(&entry.data[48..]).unwrap(); //#[allow_ci]
        assert_eq!((time.year, time.month, time.day), (2025, 6, 1));
    }

    #[test]
    fn test_x509_hash_kind() {
        assert!(x509_hash_kind(256).is_ok());
        assert!(x509_hash_kind(1).is_err());
    }

    #[test]
    fn test_hash_to_esl_needs_binaries() {
        let config = Config::default();
        assert!(hash_to_esl(&[], None, &config).is_err());
        let output = [PathBuf::from("out.esl")];
        assert!(hash_to_esl(&output, None, &config).is_err());
    }
}
