// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Inspect and edit the authenticated variable store of a firmware image.
//!
//! `flash set` stores the file contents as the variable value without any
//! authentication, the way an image is provisioned before first boot.

use super::read_file;
use crate::config::Config;
use crate::error::{EfikeysctlError, ErrorContext};
use crate::FlashAction;
use efikeys::{
    attributes::VariableAttributes, guid, store::FlashStore, time::EfiTime,
    variables::SecureVariable,
};
use log::info;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub fn execute(
    action: &FlashAction,
    config: &Config,
) -> Result<Value, EfikeysctlError> {
    match action {
        FlashAction::List { image, all } => {
            let path = match image {
                Some(path) => path.clone(),
                None => config
                    .store
                    .flash_image
                    .as_deref()
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        EfikeysctlError::validation(
                            "no flash image given and store.flash_image is not set",
                        )
                    })?,
            };
            list(&path, *all)
        }
        FlashAction::Set {
            image,
            variable,
            file,
            owner,
            attributes,
            timestamp,
        } => set(
            image,
            variable,
            file,
            owner.as_deref(),
            attributes.as_deref(),
            timestamp.as_deref(),
        ),
    }
}

fn open(path: &Path) -> Result<FlashStore, EfikeysctlError> {
    FlashStore::open(path).with_context(|| {
        format!("Failed to open flash image {}", path.display())
    })
}

fn list(path: &Path, all: bool) -> Result<Value, EfikeysctlError> {
    let store = open(path)?;
    let variables: Vec<Value> = store
        .variables()?
        .into_iter()
        .filter(|v| all || v.is_valid())
        .map(|v| {
            json!({
                "name": v.name,
                "guid": v.guid.to_string(),
                "offset": format!("{:#x}", v.offset),
                "state": if v.is_live() {
                    "added"
                } else if v.is_in_deleted_transition() {
                    "in-deleted-transition"
                } else {
                    "deleted"
                },
                "attributes": v.attributes.to_string(),
                "timestamp": v.timestamp.to_string(),
                "size": v.data.len(),
            })
        })
        .collect();

    Ok(json!({
        "image": path.display().to_string(),
        "store_offset": format!("{:#x}", store.store_offset()),
        "free": store.free_space()?,
        "variables": variables,
    }))
}

/// Hexadecimal, with or without the `0x` prefix
fn parse_attributes(
    text: &str,
) -> Result<VariableAttributes, EfikeysctlError> {
    let t = text.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    u32::from_str_radix(digits, 16)
        .map(VariableAttributes::from_bits)
        .map_err(|_| {
            EfikeysctlError::validation(format!(
                "invalid attributes '{text}', expected a hexadecimal word"
            ))
        })
}

fn set(
    image: &Path,
    name: &str,
    file: &Path,
    owner: Option<&str>,
    attributes: Option<&str>,
    timestamp: Option<&str>,
) -> Result<Value, EfikeysctlError> {
    let known = name.parse::<SecureVariable>().ok();
    let guid = match (owner, known) {
        (Some(text), _) => guid::parse(text)?,
        (None, Some(var)) => var.guid(),
        (None, None) => {
            return Err(EfikeysctlError::validation(format!(
                "{name} is not a known variable, pass its GUID with --owner"
            )))
        }
    };
    let attributes = match (attributes, known) {
        (Some(text), _) => parse_attributes(text)?,
        (None, Some(var)) => var.attributes(),
        (None, None) => VariableAttributes::AUTHENTICATED_DATABASE,
    };
    let timestamp = match timestamp {
        Some(text) => EfiTime::parse(text)?,
        None => EfiTime::now(),
    };
    // Registered variables keep their canonical spelling
    let name = known.map_or(name, |v| v.name());

    let data = read_file(file)?;
    let mut store = open(image)?;
    store.write_variable(name, &guid, attributes, timestamp, &data)?;
    store.save(image)?;
    info!("Set {name}-{guid} in {}", image.display());

    Ok(json!({
        "message": format!(
            "Set {name}-{guid} ({} bytes, attributes {attributes}) in {}",
            data.len(),
            image.display()
        ),
        "name": name,
        "guid": guid.to_string(),
        "bytes": data.len(),
    }))
}
