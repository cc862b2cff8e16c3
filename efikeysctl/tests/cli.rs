// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Integration tests running the efikeysctl binary against files and an
//! efivarfs-like directory.

#![allow(deprecated)] // Command::cargo_bin, its replacement is not stable yet

use assert_cmd::Command;
use efikeys::auth::AuthenticatedVariable;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;

const DB_FILE: &str = "db-d719b2cb-3d3a-4596-a3bc-dad00e67656f";
const MOK_FILE: &str = "MokList-605dab50-e046-4300-abb6-3dd810dd8b23";

/// Run from a temporary directory where no configuration file or
/// environment override can be picked up
fn efikeysctl_in_clean_dir(tmpdir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("efikeysctl").unwrap(); //#[allow_ci]
    cmd.current_dir(tmpdir.path());
    cmd.env("HOME", tmpdir.path());
    cmd.env_remove("XDG_CONFIG_HOME");
    for (key, _) in std::env::vars() {
        if key.starts_with("EFIKEYS_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

fn efivars(tmpdir: &tempfile::TempDir) -> std::path::PathBuf {
    let dir = tmpdir.path().join("efivars");
    std::fs::create_dir_all(&dir).unwrap(); //#[allow_ci]
    dir
}

fn keygen(tmpdir: &tempfile::TempDir, name: &str) {
    efikeysctl_in_clean_dir(tmpdir)
        .args([
            "keygen",
            "--common-name",
            name,
            "--cert",
            &format!("{name}.crt"),
            "--key",
            &format!("{name}.key"),
        ])
        .assert()
        .success();
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap(); //#[allow_ci]
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap() //#[allow_ci]
}

fn attributes_of(path: &Path) -> u32 {
    let raw = std::fs::read(path).unwrap(); //#[allow_ci]
    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
}

#[test]
fn test_help_lists_subcommands() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    efikeysctl_in_clean_dir(&tmpdir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("read"))
        .stdout(predicate::str::contains("sign-prepare"))
        .stdout(predicate::str::contains("cert-to-esl"));
}

#[test]
fn test_missing_config_file() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    efikeysctl_in_clean_dir(&tmpdir)
        .args(["--config", "nowhere.toml", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Specified configuration file not found",
        ));
}

#[test]
fn test_keygen_cert_to_esl_and_read() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    keygen(&tmpdir, "db");

    efikeysctl_in_clean_dir(&tmpdir)
        .args(["cert-to-esl", "db.crt", "db.esl"])
        .assert()
        .success();

    let value = json_stdout(
        efikeysctl_in_clean_dir(&tmpdir).args([
            "--format", "json", "read", "--esl", "db.esl",
        ]),
    );
    let list = &value["databases"][0]["lists"][0];
    assert_eq!(list["type"], "X509");
    assert_eq!(list["entries"][0]["subject"], "CN=db");
    assert_eq!(
        list["entries"][0]["owner"],
        "00000000-0000-0000-0000-000000000000"
    );

    efikeysctl_in_clean_dir(&tmpdir)
        .args(["esl-to-certs", "db.esl", "extracted"])
        .assert()
        .success();
    assert!(tmpdir.path().join("extracted-0.der").exists());
}

#[test]
fn test_read_reports_missing_variables() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let dir = efivars(&tmpdir);
    efikeysctl_in_clean_dir(&tmpdir)
        .arg("--efivarfs")
        .arg(&dir)
        .arg("read")
        .assert()
        .success()
        .stdout(predicate::str::contains("Variable PK has no entries"))
        .stdout(predicate::str::contains("Variable dbx has no entries"));
}

#[test]
fn test_missing_file_json_error() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let output = efikeysctl_in_clean_dir(&tmpdir)
        .args(["--format", "json", "read", "--esl", "missing.esl"])
        .output()
        .unwrap(); //#[allow_ci]
    assert_eq!(output.status.code(), Some(2));
    let value: Value = serde_json::from_slice(&output.stdout).unwrap(); //#[allow_ci]
    assert_eq!(value["error"]["exit_code"], 2);
}

#[test]
fn test_moklist_enroll_is_idempotent() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let dir = efivars(&tmpdir);
    keygen(&tmpdir, "vendor");

    let enroll = |tmpdir: &tempfile::TempDir| {
        json_stdout(
            efikeysctl_in_clean_dir(tmpdir)
                .args(["--format", "json", "--efivarfs"])
                .arg(&dir)
                .args(["update", "MokList", "--cert", "vendor.crt"]),
        )
    };

    let first = enroll(&tmpdir);
    assert_eq!(first["attributes"], "0x00000043 (NV|BS|AP)");
    // No envelope for MokList, the list is written as is
    let raw = std::fs::read(dir.join(MOK_FILE)).unwrap(); //#[allow_ci]
    assert_eq!(attributes_of(&dir.join(MOK_FILE)), 0x43);
    assert_eq!(
        &raw[4..20],
        efikeys::guid::to_efi_bytes(&efikeys::guid::EFI_CERT_X509)
    );

    let second = enroll(&tmpdir);
    assert_eq!(second["list"], 0);
    assert_eq!(second["entry"], 0);
}

#[test]
fn test_update_db_needs_authorization() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let dir = efivars(&tmpdir);
    keygen(&tmpdir, "db");

    efikeysctl_in_clean_dir(&tmpdir)
        .arg("--efivarfs")
        .arg(&dir)
        .args(["update", "db", "--cert", "db.crt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("needs an authenticated envelope"));
    assert!(!dir.join(DB_FILE).exists());

    efikeysctl_in_clean_dir(&tmpdir)
        .arg("--efivarfs")
        .arg(&dir)
        .args(["update", "db", "--cert", "db.crt", "--unsigned"])
        .assert()
        .success();

    let raw = std::fs::read(dir.join(DB_FILE)).unwrap(); //#[allow_ci]
    assert_eq!(attributes_of(&dir.join(DB_FILE)), 0x67);
    let envelope = AuthenticatedVariable::parse(&raw[4..]).unwrap(); //#[allow_ci]
    assert!(envelope.is_unsigned());
}

#[test]
fn test_sign_then_write_pre_signed() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let dir = efivars(&tmpdir);
    keygen(&tmpdir, "KEK");
    keygen(&tmpdir, "db");

    efikeysctl_in_clean_dir(&tmpdir)
        .args(["cert-to-esl", "db.crt", "db.esl"])
        .assert()
        .success();
    efikeysctl_in_clean_dir(&tmpdir)
        .args([
            "sign",
            "db",
            "--esl",
            "db.esl",
            "--cert",
            "KEK.crt",
            "--key",
            "KEK.key",
            "--timestamp",
            "2026-05-01 10:00:00",
            "--output",
            "db.auth",
        ])
        .assert()
        .success();

    let signed = std::fs::read(tmpdir.path().join("db.auth")).unwrap(); //#[allow_ci]
    let envelope = AuthenticatedVariable::parse(&signed).unwrap(); //#[allow_ci]
    assert!(!envelope.is_unsigned());
    assert_eq!(envelope.timestamp.to_string(), "2026-05-01 10:00:00");

    efikeysctl_in_clean_dir(&tmpdir)
        .arg("--efivarfs")
        .arg(&dir)
        .args(["update", "db", "--file", "db.auth"])
        .assert()
        .success();

    let raw = std::fs::read(dir.join(DB_FILE)).unwrap(); //#[allow_ci]
    assert_eq!(attributes_of(&dir.join(DB_FILE)), 0x27);
    assert_eq!(&raw[4..], signed.as_slice());
}

#[test]
fn test_sign_prepare_writes_bundle_and_message() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    keygen(&tmpdir, "db");
    efikeysctl_in_clean_dir(&tmpdir)
        .args(["cert-to-esl", "db.crt", "db.esl"])
        .assert()
        .success();

    let value = json_stdout(efikeysctl_in_clean_dir(&tmpdir).args([
        "--format",
        "json",
        "sign-prepare",
        "db",
        "--esl",
        "db.esl",
        "--timestamp",
        "2026-05-01 10:00:00",
        "--bundle",
        "db.bundle.json",
        "--message",
        "db.msg",
    ]));

    let message = std::fs::read(tmpdir.path().join("db.msg")).unwrap(); //#[allow_ci]
    let esl = std::fs::read(tmpdir.path().join("db.esl")).unwrap(); //#[allow_ci]
    assert_eq!(value["message_length"], message.len());
    // UTF-16 "db", vendor GUID, attributes and time precede the payload
    assert_eq!(message.len(), 4 + 16 + 4 + 16 + esl.len());
    assert!(message.ends_with(&esl));

    efikeysctl_in_clean_dir(&tmpdir)
        .args([
            "sign-complete",
            "--bundle",
            "db.bundle.json",
            "--signature",
            "db.msg",
            "--output",
            "db.auth",
        ])
        .assert()
        .failure();
    assert!(!tmpdir.path().join("db.auth").exists());
}

#[test]
fn test_sign_complete_with_external_signature() {
    let tmpdir = tempfile::tempdir().unwrap(); //#[allow_ci]
    let dir = efivars(&tmpdir);
    keygen(&tmpdir, "KEK");
    keygen(&tmpdir, "db");
    efikeysctl_in_clean_dir(&tmpdir)
        .args(["cert-to-esl", "db.crt", "db.esl"])
        .assert()
        .success();
    efikeysctl_in_clean_dir(&tmpdir)
        .args([
            "sign-prepare",
            "db",
            "--esl",
            "db.esl",
            "--timestamp",
            "2026-06-01 08:30:00",
            "--bundle",
            "db.bundle.json",
            "--message",
            "db.msg",
        ])
        .assert()
        .success();

    // The custodian signs the message with the KEK somewhere else
    let kek = efikeys::auth::Signer::load(
        &tmpdir.path().join("KEK.crt"),
        &tmpdir.path().join("KEK.key"),
        None,
    )
    .unwrap(); //#[allow_ci]
    let message = std::fs::read(tmpdir.path().join("db.msg")).unwrap(); //#[allow_ci]
    let signature = kek.sign(&message).unwrap(); //#[allow_ci]
    std::fs::write(tmpdir.path().join("db.p7"), signature).unwrap(); //#[allow_ci]

    // Signed by KEK, not by the db key
    efikeysctl_in_clean_dir(&tmpdir)
        .args([
            "sign-complete",
            "--bundle",
            "db.bundle.json",
            "--signature",
            "db.p7",
            "--signer-cert",
            "db.crt",
            "--output",
            "db.auth",
        ])
        .assert()
        .failure();
    assert!(!tmpdir.path().join("db.auth").exists());

    let value = json_stdout(
        efikeysctl_in_clean_dir(&tmpdir)
            .args(["--format", "json", "--efivarfs"])
            .arg(&dir)
            .args([
                "sign-complete",
                "--bundle",
                "db.bundle.json",
                "--signature",
                "db.p7",
                "--signer-cert",
                "KEK.crt",
                "--output",
                "db.auth",
                "--write",
            ]),
    );
    assert_eq!(value["variable"], "db");
    assert_eq!(value["timestamp"], "2026-06-01 08:30:00");

    let envelope = std::fs::read(tmpdir.path().join("db.auth")).unwrap(); //#[allow_ci]
    let parsed = AuthenticatedVariable::parse(&envelope).unwrap(); //#[allow_ci]
    assert!(!parsed.is_unsigned());
    assert!(message.ends_with(&parsed.payload));

    let raw = std::fs::read(dir.join(DB_FILE)).unwrap(); //#[allow_ci]
    assert_eq!(attributes_of(&dir.join(DB_FILE)), 0x27);
    assert_eq!(&raw[4..], envelope.as_slice());
}
