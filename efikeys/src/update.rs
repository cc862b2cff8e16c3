// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! The update pipeline: load the current database, decode it, change it,
//! encode it, wrap it in an envelope when the variable needs one and write
//! it to a store.
//!
//! Nothing reaches [`VariableStore::set`] unless every earlier step
//! succeeded. An enrollment of a hash or certificate that is already
//! present is a no-op.

use crate::{
    attributes::VariableAttributes,
    auth::{self, AuthError, AuthenticatedVariable, EnvelopeMode, Signer},
    database::{DatabaseError, EntryLocation, SignatureDatabase},
    esl::{self, EslError},
    guid::SignatureType,
    status::{PlatformMode, PlatformStatus},
    store::{StoreError, VariableStore},
    time::EfiTime,
    variables::{SecureVariable, VariableError},
};
use log::*;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UpdateError {
    /// A time-based variable written without signer or explicit unsigned mode
    #[error("{variable} needs an authenticated envelope: supply a signer or select unsigned mode")]
    MissingAuthorization { variable: SecureVariable },

    /// Envelope requested for a variable that is written directly
    #[error("{variable} is written without an authenticated envelope")]
    EnvelopeNotApplicable { variable: SecureVariable },

    /// Unsigned envelope while the platform enforces signatures
    #[error("refusing unsigned write to {variable}: the platform is in user mode")]
    UnsignedInUserMode { variable: SecureVariable },

    /// Append to a variable that only takes full replacements
    #[error("{variable} cannot be appended to, replace it instead")]
    AppendNotAllowed { variable: SecureVariable },

    /// The variable's current contents do not decode
    #[error("current contents of {variable} are not a valid signature database")]
    CurrentInvalid {
        variable: SecureVariable,
        source: DatabaseError,
    },

    /// Database error
    #[error("signature database error")]
    Database(#[from] DatabaseError),

    /// Signature list error
    #[error("signature list error")]
    Esl(#[from] EslError),

    /// Payload rejected for this variable
    #[error("invalid payload")]
    Variable(#[from] VariableError),

    /// Envelope or signing error
    #[error("authentication error")]
    Auth(#[from] AuthError),

    /// Variable store error
    #[error("variable store error")]
    Store(#[from] StoreError),
}

/// What an update does to the target database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    /// Add the lists in these bytes
    Append(Vec<u8>),
    /// Replace the whole database
    Replace(Vec<u8>),
    /// Add a hash unless it is already present
    EnrollHash {
        kind: SignatureType,
        digest: Vec<u8>,
        owner: Uuid,
    },
    /// Add a DER certificate unless it is already present
    EnrollCertificate { der: Vec<u8>, owner: Uuid },
    DeleteEntry(EntryLocation),
    DeleteList(usize),
    /// An already built `.auth` envelope, written unchanged
    PreSigned { envelope: Vec<u8>, append: bool },
}

/// Which side merges an append
///
/// Exactly one party appends: either the store is handed the new lists with
/// APPEND_WRITE, or the merged database is written as a replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppendStrategy {
    #[default]
    Store,
    Local,
}

/// The write an update resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The hash or certificate is already enrolled
    AlreadyPresent { location: EntryLocation },
    Write {
        attributes: VariableAttributes,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    AlreadyPresent { location: EntryLocation },
    Written {
        attributes: VariableAttributes,
        bytes: usize,
    },
}

/// Payload change before any envelope is built
enum Change {
    Append(Vec<u8>),
    Replace(Vec<u8>),
}

pub struct Update<'a> {
    variable: SecureVariable,
    action: UpdateAction,
    mode: Option<EnvelopeMode<'a>>,
    strategy: AppendStrategy,
    timestamp: Option<EfiTime>,
}

impl<'a> Update<'a> {
    pub fn new(variable: SecureVariable, action: UpdateAction) -> Self {
        Self {
            variable,
            action,
            mode: None,
            strategy: AppendStrategy::default(),
            timestamp: None,
        }
    }

    /// Sign the envelope with `signer`
    pub fn signed(mut self, signer: &'a Signer) -> Self {
        self.mode = Some(EnvelopeMode::Signed(signer));
        self
    }

    /// Use an envelope without certificate data, for setup mode
    pub fn unsigned(mut self) -> Self {
        self.mode = Some(EnvelopeMode::Unsigned);
        self
    }

    pub fn append_strategy(mut self, strategy: AppendStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Envelope timestamp; the current time when unset
    pub fn timestamp(mut self, timestamp: EfiTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn variable(&self) -> SecureVariable {
        self.variable
    }

    fn current<S: VariableStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<SignatureDatabase, UpdateError> {
        let var = self.variable;
        match store.get_optional(var.name(), &var.guid())? {
            Some(v) => SignatureDatabase::from_bytes(v.data).map_err(|source| {
                UpdateError::CurrentInvalid {
                    variable: var,
                    source,
                }
            }),
            None => {
                debug!(
                    "{var} does not exist yet, starting from an empty database"
                );
                Ok(SignatureDatabase::new())
            }
        }
    }

    /// Like [`Update::current`] but a missing variable is an error
    fn existing<S: VariableStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<SignatureDatabase, UpdateError> {
        let var = self.variable;
        let current = store.get(var.name(), &var.guid())?;
        SignatureDatabase::from_bytes(current.data).map_err(|source| {
            UpdateError::CurrentInvalid {
                variable: var,
                source,
            }
        })
    }

    fn append_change<S: VariableStore + ?Sized>(
        &self,
        store: &S,
        lists: Vec<u8>,
    ) -> Result<Change, UpdateError> {
        if self.variable == SecureVariable::Pk {
            return Err(UpdateError::AppendNotAllowed {
                variable: self.variable,
            });
        }
        let _ = esl::parse_database(&lists)?;
        match self.strategy {
            AppendStrategy::Store => Ok(Change::Append(lists)),
            AppendStrategy::Local => {
                let merged = self.current(store)?.append(&lists)?;
                Ok(Change::Replace(merged.into_bytes()))
            }
        }
    }

    fn enroll_change<S: VariableStore + ?Sized>(
        &self,
        store: &S,
        list: Vec<u8>,
    ) -> Result<Change, UpdateError> {
        // PK holds a single certificate, enrolling one replaces it
        if self.variable == SecureVariable::Pk {
            return Ok(Change::Replace(list));
        }
        self.append_change(store, list)
    }

    /// Check an unsigned or signed envelope is acceptable before building it
    fn authorize<S: VariableStore + ?Sized>(
        &self,
        store: &S,
        mode: &EnvelopeMode<'_>,
    ) -> Result<(), UpdateError> {
        let var = self.variable;
        let platform = PlatformStatus::read(store)?.mode();

        match mode {
            EnvelopeMode::Unsigned => match platform {
                PlatformMode::User => {
                    Err(UpdateError::UnsignedInUserMode { variable: var })
                }
                PlatformMode::Setup => {
                    warn!("Writing unsigned envelope to {var} in setup mode");
                    Ok(())
                }
                PlatformMode::Unknown => {
                    warn!(
                        "Writing unsigned envelope to {var}, platform mode unknown"
                    );
                    Ok(())
                }
            },
            EnvelopeMode::Signed(signer) => {
                let Some(authority) = var.authority() else {
                    return Ok(());
                };
                let enrolled = store
                    .get_optional(authority.name(), &authority.guid())?
                    .map(|v| SignatureDatabase::from_bytes(v.data))
                    .transpose()
                    .map_err(|source| UpdateError::CurrentInvalid {
                        variable: authority,
                        source,
                    })?;

                match (platform, enrolled) {
                    (PlatformMode::Setup, _) => Ok(()),
                    (PlatformMode::User, enrolled) => Ok(signer
                        .check_authority(
                            authority.name(),
                            &enrolled.unwrap_or_default(),
                        )?),
                    (PlatformMode::Unknown, Some(enrolled))
                        if !enrolled.is_empty() =>
                    {
                        Ok(signer
                            .check_authority(authority.name(), &enrolled)?)
                    }
                    (PlatformMode::Unknown, _) => {
                        debug!(
                            "{authority} is not enrolled, not checking signer of {var}"
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    /// Work out the exact write without touching the store
    pub fn plan<S: VariableStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Plan, UpdateError> {
        let var = self.variable;
        let base = var.attributes();

        let change = match &self.action {
            UpdateAction::Append(lists) => {
                self.append_change(store, lists.clone())?
            }
            UpdateAction::Replace(bytes) => Change::Replace(bytes.clone()),
            UpdateAction::EnrollHash {
                kind,
                digest,
                owner,
            } => {
                if let Some(location) =
                    self.current(store)?.find_hash(*kind, digest)
                {
                    info!("{kind} hash is already in {var}, nothing to do");
                    return Ok(Plan::AlreadyPresent { location });
                }
                let list =
                    esl::build_hash_list(*kind, owner, &[digest.clone()])?;
                self.enroll_change(store, list)?
            }
            UpdateAction::EnrollCertificate { der, owner } => {
                if let Some(location) =
                    self.current(store)?.find_certificate(der)
                {
                    info!("Certificate is already in {var}, nothing to do");
                    return Ok(Plan::AlreadyPresent { location });
                }
                self.enroll_change(store, esl::build_x509_list(owner, der)?)?
            }
            UpdateAction::DeleteEntry(location) => {
                let db = self
                    .existing(store)?
                    .delete_entry(location.list, location.entry)?;
                Change::Replace(db.into_bytes())
            }
            UpdateAction::DeleteList(index) => {
                let db = self.existing(store)?.delete_list(*index)?;
                Change::Replace(db.into_bytes())
            }
            UpdateAction::PreSigned { envelope, append } => {
                if !var.requires_envelope() {
                    return Err(UpdateError::EnvelopeNotApplicable {
                        variable: var,
                    });
                }
                let parsed = AuthenticatedVariable::parse(envelope)?;
                if *append {
                    if var == SecureVariable::Pk {
                        return Err(UpdateError::AppendNotAllowed {
                            variable: var,
                        });
                    }
                    let _ = esl::parse_database(&parsed.payload)?;
                } else {
                    var.validate_payload(&parsed.payload)?;
                }
                if parsed.is_unsigned() {
                    self.authorize(store, &EnvelopeMode::Unsigned)?;
                }
                let mut attributes = base;
                if *append {
                    attributes |= VariableAttributes::APPEND_WRITE;
                }
                return Ok(Plan::Write {
                    attributes,
                    data: envelope.clone(),
                });
            }
        };

        let (attributes, payload) = match change {
            Change::Append(lists) => {
                (base | VariableAttributes::APPEND_WRITE, lists)
            }
            Change::Replace(bytes) => {
                var.validate_payload(&bytes)?;
                (base, bytes)
            }
        };

        if !var.requires_envelope() {
            if self.mode.is_some() {
                return Err(UpdateError::EnvelopeNotApplicable {
                    variable: var,
                });
            }
            return Ok(Plan::Write {
                attributes,
                data: payload,
            });
        }

        let mode = self
            .mode
            .ok_or(UpdateError::MissingAuthorization { variable: var })?;
        self.authorize(store, &mode)?;
        let envelope = auth::build_envelope(
            var.name(),
            &var.guid(),
            attributes,
            &payload,
            mode,
            self.timestamp,
        )?;

        Ok(Plan::Write {
            attributes,
            data: envelope.to_bytes()?,
        })
    }

    /// Plan the update and write it
    pub fn apply<S: VariableStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<UpdateOutcome, UpdateError> {
        match self.plan(&*store)? {
            Plan::AlreadyPresent { location } => {
                Ok(UpdateOutcome::AlreadyPresent { location })
            }
            Plan::Write { attributes, data } => {
                let var = self.variable;
                store.set(var.name(), &var.guid(), attributes, &data)?;
                info!(
                    "Updated {var}-{} with {} bytes, attributes {attributes}",
                    var.guid(),
                    data.len()
                );
                Ok(UpdateOutcome::Written {
                    attributes,
                    bytes: data.len(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::generate_signer;
    use crate::esl::{build_sha256_list, build_x509_list};
    use crate::guid::MOK_OWNER;
    use crate::store::{EmulatedFirmware, RuntimeStore};

    fn signer(cn: &str) -> Signer {
        let (cert, key) = generate_signer(cn).unwrap(); //#[allow_ci]
        Signer::new(cert, key).unwrap() //#[allow_ci]
    }

    fn cert_list(s: &Signer) -> Vec<u8> {
        build_x509_list(&Uuid::nil(), &s.certificate_der().unwrap()).unwrap() //#[allow_ci]
    }

    fn at(minute: u8) -> EfiTime {
        EfiTime {
            year: 2025,
            month: 3,
            day: 3,
            minute,
            ..EfiTime::default()
        }
    }

    #[test]
    fn test_empty_dbx_append_writes_delta_with_append_write() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let outcome = Update::new(
            SecureVariable::Dbx,
            UpdateAction::EnrollHash {
                kind: SignatureType::Sha256,
                digest: vec![0; 32],
                owner: Uuid::nil(),
            },
        )
        .unsigned()
        .timestamp(at(1))
        .apply(&mut store)
        .unwrap(); //#[allow_ci]

        assert_eq!(
            outcome,
            UpdateOutcome::Written {
                attributes: VariableAttributes::from_bits(0x67),
                bytes: 40 + 76,
            }
        );
        let dbx = store.get("dbx", &SecureVariable::Dbx.guid()).unwrap(); //#[allow_ci]
        assert_eq!(dbx.data, build_sha256_list(&Uuid::nil(), &[0; 32]));
    }

    #[test]
    fn test_enrolling_twice_is_a_no_op() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let update = Update::new(
            SecureVariable::Db,
            UpdateAction::EnrollHash {
                kind: SignatureType::Sha256,
                digest: vec![9; 32],
                owner: MOK_OWNER,
            },
        )
        .unsigned()
        .timestamp(at(1));

        assert!(matches!(
            update.apply(&mut store).unwrap(), //#[allow_ci]
            UpdateOutcome::Written { .. }
        ));
        assert_eq!(
            update.apply(&mut store).unwrap(), //#[allow_ci]
            UpdateOutcome::AlreadyPresent {
                location: EntryLocation { list: 0, entry: 0 }
            }
        );
        let db = store.get("db", &SecureVariable::Db.guid()).unwrap(); //#[allow_ci]
        assert_eq!(db.data.len(), 76);
    }

    #[test]
    fn test_local_append_replaces_without_append_write() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let first = build_sha256_list(&MOK_OWNER, &[1; 32]);
        let second = build_sha256_list(&MOK_OWNER, &[2; 32]);
        let _ = Update::new(
            SecureVariable::Db,
            UpdateAction::Replace(first.clone()),
        )
        .unsigned()
        .timestamp(at(1))
        .apply(&mut store)
        .unwrap(); //#[allow_ci]

        let update = Update::new(
            SecureVariable::Db,
            UpdateAction::Append(second.clone()),
        )
        .unsigned()
        .timestamp(at(2))
        .append_strategy(AppendStrategy::Local);
        match update.plan(&store).unwrap() { //#[allow_ci]
            Plan::Write { attributes, data } => {
                assert!(!attributes.is_append());
                let env = AuthenticatedVariable::parse(&data).unwrap(); //#[allow_ci]
                let expected = [first.clone(), second.clone()].concat();
                assert_eq!(env.payload, expected);
            }
            other => panic!("unexpected plan {other:?}"),
        }
        let _ = update.apply(&mut store).unwrap(); //#[allow_ci]
        let db = store.get("db", &SecureVariable::Db.guid()).unwrap(); //#[allow_ci]
        assert_eq!(db.data, [first, second].concat());
    }

    #[test]
    fn test_authorization_rules() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let pk = signer("PK");
        let stranger = signer("Stranger");
        let replace_kek = |s: &Signer| {
            let action = UpdateAction::Replace(cert_list(s));
            Update::new(SecureVariable::Kek, action)
        };

        assert!(matches!(
            replace_kek(&pk).plan(&store),
            Err(UpdateError::MissingAuthorization { .. })
        ));

        let _ = Update::new(
            SecureVariable::Pk,
            UpdateAction::Replace(cert_list(&pk)),
        )
        .unsigned()
        .timestamp(at(1))
        .apply(&mut store)
        .unwrap(); //#[allow_ci]

        assert!(matches!(
            replace_kek(&pk).unsigned().plan(&store),
            Err(UpdateError::UnsignedInUserMode { .. })
        ));
        assert!(matches!(
            replace_kek(&pk).signed(&stranger).plan(&store),
            Err(UpdateError::Auth(AuthError::UnauthorizedSigner { .. }))
        ));
        let _ = replace_kek(&pk)
            .signed(&pk)
            .timestamp(at(2))
            .apply(&mut store)
            .unwrap(); //#[allow_ci]
    }

    #[test]
    fn test_pk_rules() {
        let store = RuntimeStore::new(EmulatedFirmware::new());
        let pk = signer("PK");
        let append = UpdateAction::Append(cert_list(&pk));
        assert!(matches!(
            Update::new(SecureVariable::Pk, append).unsigned().plan(&store),
            Err(UpdateError::AppendNotAllowed { .. })
        ));
        let two = [cert_list(&pk), cert_list(&signer("Other"))].concat();
        assert!(matches!(
            Update::new(SecureVariable::Pk, UpdateAction::Replace(two))
                .unsigned()
                .plan(&store),
            Err(UpdateError::Variable(
                VariableError::InvalidPlatformKey { .. }
            ))
        ));
    }

    #[test]
    fn test_delete_entry_and_missing_variable() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let delete = Update::new(
            SecureVariable::Db,
            UpdateAction::DeleteEntry(EntryLocation { list: 0, entry: 0 }),
        )
        .unsigned()
        .timestamp(at(5));
        assert!(matches!(
            delete.plan(&store),
            Err(UpdateError::Store(StoreError::NotFound { .. }))
        ));

        let _ = Update::new(
            SecureVariable::Db,
            UpdateAction::Replace(build_sha256_list(&MOK_OWNER, &[4; 32])),
        )
        .unsigned()
        .timestamp(at(1))
        .apply(&mut store)
        .unwrap(); //#[allow_ci]

        // The sole entry goes, the variable is deleted
        let _ = delete.apply(&mut store).unwrap(); //#[allow_ci]
        assert!(store
            .get_optional("db", &SecureVariable::Db.guid())
            .unwrap() //#[allow_ci]
            .is_none());
    }

    #[test]
    fn test_moklist_is_written_directly() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let list = build_sha256_list(&MOK_OWNER, &[6; 32]);
        let outcome = Update::new(
            SecureVariable::MokList,
            UpdateAction::Append(list.clone()),
        )
        .apply(&mut store)
        .unwrap(); //#[allow_ci]
        assert_eq!(
            outcome,
            UpdateOutcome::Written {
                attributes: VariableAttributes::from_bits(0x43),
                bytes: 76,
            }
        );
        assert!(matches!(
            Update::new(SecureVariable::MokList, UpdateAction::Append(list))
                .unsigned()
                .plan(&store),
            Err(UpdateError::EnvelopeNotApplicable { .. })
        ));
    }

    #[test]
    fn test_presigned_envelope_is_written_unchanged() {
        let mut store = RuntimeStore::new(EmulatedFirmware::new());
        let payload = build_sha256_list(&MOK_OWNER, &[8; 32]);
        let envelope = auth::build_envelope(
            "dbx",
            &SecureVariable::Dbx.guid(),
            VariableAttributes::AUTHENTICATED_DATABASE,
            &payload,
            EnvelopeMode::Unsigned,
            Some(at(1)),
        )
        .unwrap() //#[allow_ci]
        .to_bytes()
        .unwrap(); //#[allow_ci]

        let update = Update::new(
            SecureVariable::Dbx,
            UpdateAction::PreSigned {
                envelope: envelope.clone(),
                append: false,
            },
        );
        assert_eq!(
            update.plan(&store).unwrap(), //#[allow_ci]
            Plan::Write {
                attributes: VariableAttributes::AUTHENTICATED_DATABASE,
                data: envelope,
            }
        );
        let _ = update.apply(&mut store).unwrap(); //#[allow_ci]
        assert_eq!(
            store.get("dbx", &SecureVariable::Dbx.guid()).unwrap().data, //#[allow_ci]
            payload
        );
    }
}
