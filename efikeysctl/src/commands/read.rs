// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Dump signature database variables.
//!
//! Without a variable name the four firmware databases are printed in the
//! order PK, KEK, db, dbx. A missing variable is reported as having no
//! entries and does not fail the command unless it was asked for by name
//! together with `--output`.

use super::{read_file, write_file, SelectedStore};
use crate::config::Config;
use crate::error::{EfikeysctlError, ErrorContext};
use crate::ReadArgs;
use efikeys::{
    crypto,
    database::{EntryLocation, SignatureDatabase},
    esl::SignatureList,
    guid::SignatureType,
    store::{StoreError, VariableStore},
    time::EfiTime,
    variables::SecureVariable,
};
use log::{debug, warn};
use serde_json::{json, Value};

const DEFAULT_VARIABLES: [SecureVariable; 4] = [
    SecureVariable::Pk,
    SecureVariable::Kek,
    SecureVariable::Db,
    SecureVariable::Dbx,
];

pub fn execute(
    args: &ReadArgs,
    config: &Config,
) -> Result<Value, EfikeysctlError> {
    if let Some(path) = &args.esl {
        let bytes = read_file(path)?;
        let label = path.display().to_string();
        let db = SignatureDatabase::from_bytes(bytes).with_context(|| {
            format!("{label} is not a valid signature database")
        })?;
        return match &args.output {
            Some(out) => export(&label, &db, args, out),
            None => Ok(json!({ "databases": [describe(&label, &db, args)?] })),
        };
    }

    let variables = match &args.variable {
        Some(name) => vec![name.parse::<SecureVariable>()?],
        None => {
            if args.list.is_some() || args.output.is_some() {
                return Err(EfikeysctlError::validation(
                    "--list and --output need a variable name",
                ));
            }
            DEFAULT_VARIABLES.to_vec()
        }
    };

    let store = SelectedStore::open(config)?;
    debug!("Reading from {}", store.describe());

    let mut databases = Vec::with_capacity(variables.len());
    for var in variables {
        let name = var.name();
        let Some(current) = store.get_optional(name, &var.guid())? else {
            if args.output.is_some() {
                return Err(StoreError::not_found(name, &var.guid()).into());
            }
            databases.push(json!({
                "variable": name,
                "message": format!("Variable {name} has no entries"),
            }));
            continue;
        };

        let db = SignatureDatabase::from_bytes(current.data).with_context(
            || format!("Variable {name} is not a valid signature database"),
        )?;
        if let Some(out) = &args.output {
            return export(name, &db, args, out);
        }

        let mut description = describe(name, &db, args)?;
        description["attributes"] =
            Value::from(current.attributes.to_string());
        databases.push(description);
    }

    Ok(json!({ "databases": databases }))
}

/// Write the selected bytes: the whole database, one list, or the data of
/// one entry
fn export(
    label: &str,
    db: &SignatureDatabase,
    args: &ReadArgs,
    out: &std::path::Path,
) -> Result<Value, EfikeysctlError> {
    let bytes = match (args.list, args.entry) {
        (None, _) => db.as_bytes().to_vec(),
        (Some(list), None) => db.list(list)?.as_bytes().to_vec(),
        (Some(list), Some(entry)) => {
            db.entry(EntryLocation { list, entry })?.data.to_vec()
        }
    };
    write_file(out, &bytes)?;
    Ok(json!({
        "message": format!(
            "Wrote {} bytes of {label} to {}",
            bytes.len(),
            out.display()
        ),
        "bytes": bytes.len(),
    }))
}

fn describe(
    label: &str,
    db: &SignatureDatabase,
    args: &ReadArgs,
) -> Result<Value, EfikeysctlError> {
    let lists = db.lists();
    let selected: Vec<(usize, SignatureList<'_>)> = match args.list {
        Some(index) => vec![(index, db.list(index)?)],
        None => lists.into_iter().enumerate().collect(),
    };

    let mut out = Vec::with_capacity(selected.len());
    for (index, list) in selected {
        let kind = list.signature_type();
        if let SignatureType::Unknown(guid) = kind {
            warn!("{label}: list {index} has unknown signature type {guid}");
        }

        let mut entries = Vec::new();
        for (entry_index, entry) in list.entries()?.enumerate() {
            if args.entry.is_some_and(|e| e != entry_index) {
                continue;
            }
            let mut value = json!({
                "index": entry_index,
                "owner": entry.owner.to_string(),
                "size": entry.data.len(),
            });
            describe_entry(&mut value, kind, entry.data);
            entries.push(value);
        }
        if let Some(wanted) = args.entry {
            if entries.is_empty() {
                return Err(efikeys::database::DatabaseError::EntryNotFound {
                    list: index,
                    entry: wanted,
                    count: list.entry_count()?,
                }
                .into());
            }
        }

        out.push(json!({
            "index": index,
            "type": kind.label(),
            "entry_size": list.entry_size(),
            "entries": entries,
        }));
    }

    Ok(json!({
        "variable": label,
        "length": db.len(),
        "lists": out,
    }))
}

fn describe_entry(value: &mut Value, kind: SignatureType, data: &[u8]) {
    match kind {
        SignatureType::X509 => match crypto::x509_from_bytes(data) {
            Ok(cert) => {
                value["subject"] = Value::from(crypto::x509_subject(&cert));
                value["issuer"] = Value::from(crypto::x509_issuer(&cert));
            }
            Err(e) => {
                warn!("X509 entry does not parse: {e}");
                value["subject"] = Value::from("(unparseable certificate)");
            }
        },
        SignatureType::X509Sha256
        | SignatureType::X509Sha384
        | SignatureType::X509Sha512 => {
            let split = data.len().saturating_sub(EfiTime::SIZE);
            let (digest, time) = data.split_at(split);
            value["tbs_hash"] = Value::from(hex::encode(digest));
            if let Ok(time) = EfiTime::from_bytes(time) {
                value["time_of_revocation"] = Value::from(time.to_string());
            }
        }
        kind if kind.is_hash() => {
            value["hash"] = Value::from(hex::encode(data));
        }
        _ => {}
    }
}
