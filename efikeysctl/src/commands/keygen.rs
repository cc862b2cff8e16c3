// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

use super::write_file;
use crate::error::EfikeysctlError;
use crate::KeygenArgs;
use efikeys::crypto::{self, x509::CertificateBuilder};
use log::info;
use serde_json::{json, Value};

/// RSA-2048 key with a self-signed certificate, usable as a PK, KEK or db
/// signing key
pub fn execute(args: &KeygenArgs) -> Result<Value, EfikeysctlError> {
    if args.common_name.trim().is_empty() {
        return Err(EfikeysctlError::validation(
            "the common name must not be empty",
        ));
    }

    let (_, key) = crypto::rsa_generate_pair(2048)?;
    let cert = CertificateBuilder::new()
        .private_key(&key)
        .common_name(&args.common_name)
        .not_after(args.days)
        .build()?;

    crypto::write_key_pair(&key, &args.key, args.key_password.as_deref())?;
    crypto::write_x509(&cert, &args.cert)?;
    if let Some(der_path) = &args.der {
        write_file(der_path, &crypto::x509_to_der(&cert)?)?;
    }
    info!(
        "Generated {} valid for {} days",
        crypto::x509_subject(&cert),
        args.days
    );

    Ok(json!({
        "message": format!(
            "Wrote certificate {} and key {}",
            args.cert.display(),
            args.key.display()
        ),
        "subject": crypto::x509_subject(&cert),
        "der": args.der.as_ref().map(|p| p.display().to_string()),
    }))
}
