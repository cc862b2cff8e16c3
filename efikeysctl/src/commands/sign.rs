// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Produce authenticated envelopes offline.
//!
//! `sign` does it in one step with a local key. `sign-prepare` and
//! `sign-complete` split it around an external signer: the first fixes the
//! timestamp and writes a bundle describing the exact message to sign, the
//! second checks the returned PKCS#7 signature against that message and
//! assembles the envelope.

use super::{
    load_signer, parse_timestamp, read_file, write_file, SelectedStore,
};
use crate::config::Config;
use crate::error::EfikeysctlError;
use crate::output::OutputHandler;
use crate::{SignArgs, SignCompleteArgs, SignPrepareArgs};
use efikeys::{
    attributes::VariableAttributes,
    auth::{
        self,
        detached::{SigningBundle, SigningState},
        EnvelopeMode,
    },
    crypto, esl,
    update::{Update, UpdateAction, UpdateError, UpdateOutcome},
    variables::SecureVariable,
};
use serde_json::{json, Value};

/// Attributes and payload of an offline update, checked the way the
/// firmware will check them
fn offline_request(
    variable: &str,
    esl_path: &std::path::Path,
    append: bool,
) -> Result<(SecureVariable, VariableAttributes, Vec<u8>), EfikeysctlError> {
    let var: SecureVariable = variable.parse()?;
    if !var.requires_envelope() {
        return Err(
            UpdateError::EnvelopeNotApplicable { variable: var }.into()
        );
    }

    let payload = read_file(esl_path)?;
    let mut attributes = var.attributes();
    if append {
        if var == SecureVariable::Pk {
            return Err(UpdateError::AppendNotAllowed { variable: var }.into());
        }
        let _ = esl::parse_database(&payload)?;
        attributes |= VariableAttributes::APPEND_WRITE;
    } else {
        var.validate_payload(&payload)?;
    }
    Ok((var, attributes, payload))
}

pub fn sign(
    args: &SignArgs,
    config: &Config,
) -> Result<Value, EfikeysctlError> {
    let (var, attributes, payload) =
        offline_request(&args.variable, &args.esl, args.append)?;
    let signer =
        load_signer(args.cert.as_deref(), args.key.as_deref(), config)?
            .ok_or_else(|| {
                EfikeysctlError::validation(
                    "sign needs --cert and --key, or signing.certificate and signing.key",
                )
            })?;

    let envelope = auth::build_envelope(
        var.name(),
        &var.guid(),
        attributes,
        &payload,
        EnvelopeMode::Signed(&signer),
        parse_timestamp(args.timestamp.as_deref())?,
    )?;
    let bytes = envelope.to_bytes()?;
    write_file(&args.output, &bytes)?;

    Ok(json!({
        "message": format!(
            "Signed {var} update as {}, wrote {} bytes to {}",
            signer.subject(),
            bytes.len(),
            args.output.display()
        ),
        "variable": var.name(),
        "attributes": attributes.to_string(),
        "timestamp": envelope.timestamp.to_string(),
        "bytes": bytes.len(),
    }))
}

pub fn prepare(args: &SignPrepareArgs) -> Result<Value, EfikeysctlError> {
    let (var, attributes, payload) =
        offline_request(&args.variable, &args.esl, args.append)?;

    let state = SigningState::new(var.name(), var.guid(), attributes, payload)
        .prepare(parse_timestamp(args.timestamp.as_deref())?)?;
    let bundle = state.to_bundle()?;
    bundle.write(&args.bundle)?;

    if let (Some(path), Some(message)) = (&args.message, state.message()) {
        write_file(path, message)?;
    }

    Ok(json!({
        "message": format!(
            "Wrote signing bundle for {var} to {}",
            args.bundle.display()
        ),
        "variable": var.name(),
        "attributes": attributes.to_string(),
        "timestamp": bundle.timestamp.to_string(),
        "message_sha256": bundle.message_sha256,
        "message_length": bundle.message_length,
    }))
}

pub fn complete(
    args: &SignCompleteArgs,
    config: &Config,
    output: &OutputHandler,
) -> Result<Value, EfikeysctlError> {
    let bundle = SigningBundle::read(&args.bundle)?;
    let signature = read_file(&args.signature)?;
    let expected = args
        .signer_cert
        .as_deref()
        .map(crypto::load_x509)
        .transpose()?;

    let envelope = SigningState::from_bundle(&bundle)?
        .attach(&signature, expected.as_ref())?
        .into_envelope()?;
    output.progress(format!(
        "Signature over the {} byte message verified",
        bundle.message_length
    ));

    let bytes = envelope.to_bytes()?;
    write_file(&args.output, &bytes)?;

    let mut result = json!({
        "message": format!(
            "Wrote {} byte envelope for {} to {}",
            bytes.len(),
            bundle.variable,
            args.output.display()
        ),
        "variable": bundle.variable,
        "timestamp": bundle.timestamp.to_string(),
        "bytes": bytes.len(),
    });

    if args.write {
        let var: SecureVariable = bundle.variable.parse()?;
        if var.guid() != bundle.guid {
            return Err(EfikeysctlError::validation(format!(
                "the bundle is for {}-{}, not the {var} variable",
                bundle.variable, bundle.guid
            )));
        }
        let mut store = SelectedStore::open(config)?;
        let update = Update::new(
            var,
            UpdateAction::PreSigned {
                envelope: bytes,
                append: bundle.attributes.is_append(),
            },
        );
        if let UpdateOutcome::Written { attributes, .. } =
            update.apply(&mut store)?
        {
            store.commit()?;
            result["written"] = Value::from(format!(
                "{var} in {}, attributes {attributes}",
                store.describe()
            ));
        }
    }

    Ok(result)
}
