// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Change a signature database variable.
//!
//! `--file` is taken as an already signed `.auth` envelope and written
//! unchanged, unless `--esl`, `--unsigned` or a signer on the command line
//! says it is a bare signature list to be wrapped. Hashes and certificates
//! are enrolled only when not already present.
//!
//! Variables written with a time-based envelope need either a signer (from
//! the command line or the configuration) or an unsigned envelope, which
//! only firmware in setup mode accepts. `--esl` without any signer selects
//! the unsigned envelope.

use super::{
    load_signer, parse_timestamp, read_file, resolve_owner, write_file,
    SelectedStore,
};
use crate::config::Config;
use crate::error::{EfikeysctlError, ErrorContext};
use crate::output::OutputHandler;
use crate::UpdateArgs;
use efikeys::{
    authenticode, crypto,
    database::EntryLocation,
    guid::SignatureType,
    update::{AppendStrategy, Plan, Update, UpdateAction, UpdateOutcome},
    variables::SecureVariable,
};
use log::debug;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn execute(
    args: &UpdateArgs,
    config: &Config,
    output: &OutputHandler,
) -> Result<Value, EfikeysctlError> {
    let var: SecureVariable = args.variable.parse()?;
    let explicit_signer = args.signer_cert.is_some();
    let pre_signed = args.file.is_some()
        && !args.esl
        && !args.unsigned
        && !explicit_signer;

    let owner = resolve_owner(args.owner.as_deref(), config)?;
    let action = build_action(args, pre_signed, owner, output)?;

    // MokList takes no envelope, so a configured signer does not apply
    let signer = if args.unsigned
        || pre_signed
        || (!var.requires_envelope() && !explicit_signer)
    {
        None
    } else {
        load_signer(
            args.signer_cert.as_deref(),
            args.signer_key.as_deref(),
            config,
        )?
    };

    let mut update = Update::new(var, action);
    if args.merge_locally {
        update = update.append_strategy(AppendStrategy::Local);
    }
    if let Some(timestamp) = parse_timestamp(args.timestamp.as_deref())? {
        update = update.timestamp(timestamp);
    }
    update = match &signer {
        Some(signer) => update.signed(signer),
        None if args.unsigned || (args.esl && var.requires_envelope()) => {
            update.unsigned()
        }
        None => update,
    };

    let mut store = SelectedStore::open(config)?;

    if let Some(out) = &args.output {
        return match update.plan(&store)? {
            Plan::AlreadyPresent { location } => {
                Ok(already_present(var, location))
            }
            Plan::Write { attributes, data } => {
                write_file(out, &data)?;
                Ok(json!({
                    "message": format!(
                        "Wrote {} byte update of {var} to {}",
                        data.len(),
                        out.display()
                    ),
                    "variable": var.name(),
                    "attributes": attributes.to_string(),
                    "bytes": data.len(),
                }))
            }
        };
    }

    let outcome = update
        .apply(&mut store)
        .with_context(|| format!("Failed to update {var}"))?;
    match outcome {
        UpdateOutcome::AlreadyPresent { location } => {
            Ok(already_present(var, location))
        }
        UpdateOutcome::Written { attributes, bytes } => {
            store.commit()?;
            Ok(json!({
                "message": format!(
                    "Updated {var} in {}: {bytes} bytes, attributes {attributes}",
                    store.describe()
                ),
                "variable": var.name(),
                "attributes": attributes.to_string(),
                "bytes": bytes,
            }))
        }
    }
}

fn already_present(var: SecureVariable, location: EntryLocation) -> Value {
    json!({
        "message": format!(
            "{var} already holds this entry (list {}, entry {}), nothing written",
            location.list, location.entry
        ),
        "variable": var.name(),
        "list": location.list,
        "entry": location.entry,
    })
}

fn build_action(
    args: &UpdateArgs,
    pre_signed: bool,
    owner: Uuid,
    output: &OutputHandler,
) -> Result<UpdateAction, EfikeysctlError> {
    if let Some(path) = &args.file {
        let bytes = read_file(path)?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        return Ok(match (pre_signed, args.append) {
            (true, append) => UpdateAction::PreSigned {
                envelope: bytes,
                append,
            },
            (false, true) => UpdateAction::Append(bytes),
            (false, false) => UpdateAction::Replace(bytes),
        });
    }

    if let Some(path) = &args.hash_binary {
        let image = read_file(path)?;
        let digest = authenticode::authenticode_sha256(&image)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        output.progress(format!(
            "{}: SHA256 {}",
            path.display(),
            hex::encode(digest)
        ));
        return Ok(UpdateAction::EnrollHash {
            kind: SignatureType::Sha256,
            digest: digest.to_vec(),
            owner,
        });
    }

    if let Some(path) = &args.cert {
        let cert = crypto::load_x509(path)?;
        debug!("Enrolling certificate {}", crypto::x509_subject(&cert));
        return Ok(UpdateAction::EnrollCertificate {
            der: crypto::x509_to_der(&cert)?,
            owner,
        });
    }

    match &args.delete {
        Some(text) => parse_delete(text),
        None => Err(EfikeysctlError::validation(
            "one of --file, --hash-binary, --cert or --delete is required",
        )),
    }
}

/// `L` deletes list L, `L:E` deletes entry E of list L
fn parse_delete(text: &str) -> Result<UpdateAction, EfikeysctlError> {
    let invalid = || {
        EfikeysctlError::validation(format!(
            "invalid deletion '{text}', expected LIST or LIST:ENTRY"
        ))
    };
    match text.split_once(':') {
        None => Ok(UpdateAction::DeleteList(
            text.trim().parse().map_err(|_| invalid())?,
        )),
        Some((list, entry)) => Ok(UpdateAction::DeleteEntry(EntryLocation {
            list: list.trim().parse().map_err(|_| invalid())?,
            entry: entry.trim().parse().map_err(|_| invalid())?,
        })),
    }
}
