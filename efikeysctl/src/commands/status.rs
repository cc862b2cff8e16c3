// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

use super::SelectedStore;
use crate::config::Config;
use crate::error::EfikeysctlError;
use efikeys::{
    database::SignatureDatabase,
    status::PlatformStatus,
    store::VariableStore,
    variables::SecureVariable,
};
use log::warn;
use serde_json::{json, Value};

/// Report setup/user mode, Secure Boot enforcement and how many entries
/// each database holds
pub fn execute(config: &Config) -> Result<Value, EfikeysctlError> {
    let store = SelectedStore::open(config)?;
    let status = PlatformStatus::read(&store)?;

    let mut databases = serde_json::Map::new();
    for var in SecureVariable::ALL {
        let entries = match store.get_optional(var.name(), &var.guid())? {
            None => 0,
            Some(current) => {
                match SignatureDatabase::from_bytes(current.data) {
                    Ok(db) => db.entries().len(),
                    Err(e) => {
                        warn!("{var} does not decode: {e}");
                        0
                    }
                }
            }
        };
        let _ = databases.insert(var.name().to_string(), Value::from(entries));
    }

    let enforcement = if status.secure_boot_enforced() {
        "enforced"
    } else {
        "not enforced"
    };
    Ok(json!({
        "message": format!(
            "Platform is in {}, Secure Boot {enforcement}",
            status.mode(),
        ),
        "store": store.describe(),
        "mode": status.mode(),
        "setup_mode": status.setup_mode,
        "secure_boot": status.secure_boot,
        "entries": databases,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use efikeys::{
        attributes::VariableAttributes, esl::build_sha256_list,
        variables::STATUS_GUID,
    };
    use uuid::Uuid;

    #[test]
    fn test_status_from_efivarfs() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let mut config = Config::default();
        config.store.efivarfs_path = Some(dir.path().display().to_string());

        let value = execute(&config).unwrap(); //#[allow_ci]
        assert_eq!(value["mode"], "unknown");
        assert_eq!(value["entries"]["db"], 0);

        let mut store = SelectedStore::open(&config).unwrap(); //#[allow_ci]
        store
            .set(
                "SetupMode",
                &STATUS_GUID,
                VariableAttributes::from_bits(0x6),
                &[1],
            )
            .unwrap(); //#[allow_ci]
        let dbx = SecureVariable::Dbx;
        store
            .set(
                dbx.name(),
                &dbx.guid(),
                dbx.attributes(),
                &build_sha256_list(&Uuid::nil(), &[7; 32]),
            )
            .unwrap(); //#[allow_ci]

        let value = execute(&config).unwrap(); //#[allow_ci]
        assert_eq!(value["mode"], "setup");
        assert_eq!(value["setup_mode"], true);
        assert_eq!(value["secure_boot"], Value::Null);
        assert_eq!(value["entries"]["dbx"], 1);
    }
}
