// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

use crate::{
    attributes::AttributesParseError,
    auth::AuthError,
    authenticode::AuthenticodeError,
    crypto::{x509::CertificateBuilderError, CryptoError},
    database::DatabaseError,
    esl::EslError,
    guid::GuidError,
    store::{FlashError, StoreError},
    time::TimeError,
    update::UpdateError,
    variables::VariableError,
};
use thiserror::Error;

/// Broad class of an error, as reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, nothing was written
    Format,
    /// Variable, list or entry absent
    NotFound,
    /// The store refused the write
    PermissionDenied,
    /// Certificate and private key do not match
    KeyMismatch,
    /// Signer not enrolled in the authority variable
    UnauthorizedSigner,
    /// I/O or firmware failure
    Store,
    /// Invalid request
    Usage,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Signature list error: {0}")]
    Esl(#[from] EslError),

    #[error("Signature database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Variable store error: {0}")]
    Store(#[from] StoreError),

    #[error("Flash image error: {0}")]
    Flash(#[from] FlashError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Certificate builder error: {0}")]
    CertificateBuilder(#[from] CertificateBuilderError),

    #[error("Variable error: {0}")]
    Variable(#[from] VariableError),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    #[error("Authenticode error: {0}")]
    Authenticode(#[from] AuthenticodeError),

    #[error("Invalid timestamp: {0}")]
    Time(#[from] TimeError),

    #[error("Invalid GUID: {0}")]
    Guid(#[from] GuidError),

    #[error("Invalid attributes: {0}")]
    Attributes(#[from] AttributesParseError),
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::NotFound { .. } => ErrorKind::NotFound,
        StoreError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
        StoreError::Corrupt { .. } => ErrorKind::Format,
        StoreError::Flash(f) => flash_kind(f),
        _ => ErrorKind::Store,
    }
}

fn flash_kind(e: &FlashError) -> ErrorKind {
    match e {
        FlashError::Envelope { source, .. } => auth_kind(source),
        FlashError::StoreNotFound(_)
        | FlashError::CorruptStore { .. }
        | FlashError::CorruptVariable { .. }
        | FlashError::TooSmall(_) => ErrorKind::Format,
        FlashError::StoreFull { .. }
        | FlashError::Read { .. }
        | FlashError::Write { .. } => ErrorKind::Store,
    }
}

fn database_kind(e: &DatabaseError) -> ErrorKind {
    match e {
        DatabaseError::Format(_) => ErrorKind::Format,
        DatabaseError::ListNotFound { .. }
        | DatabaseError::EntryNotFound { .. } => ErrorKind::NotFound,
    }
}

fn crypto_kind(e: &CryptoError) -> ErrorKind {
    match e {
        CryptoError::FileNotFound(_) => ErrorKind::NotFound,
        CryptoError::IOReadError { .. }
        | CryptoError::IOWriteError { .. }
        | CryptoError::FSCreateError { .. }
        | CryptoError::IOSetPermissionError { .. } => ErrorKind::Store,
        _ => ErrorKind::Format,
    }
}

fn auth_kind(e: &AuthError) -> ErrorKind {
    match e {
        AuthError::KeyMismatch { .. } => ErrorKind::KeyMismatch,
        AuthError::UnauthorizedSigner { .. } => ErrorKind::UnauthorizedSigner,
        AuthError::InvalidTransition { .. } | AuthError::ZeroTimestamp(_) => {
            ErrorKind::Usage
        }
        AuthError::Crypto(c) => crypto_kind(c),
        AuthError::Io { .. } => ErrorKind::Store,
        _ => ErrorKind::Format,
    }
}

fn update_kind(e: &UpdateError) -> ErrorKind {
    match e {
        UpdateError::MissingAuthorization { .. }
        | UpdateError::EnvelopeNotApplicable { .. }
        | UpdateError::UnsignedInUserMode { .. }
        | UpdateError::AppendNotAllowed { .. } => ErrorKind::Usage,
        UpdateError::CurrentInvalid { .. }
        | UpdateError::Esl(_)
        | UpdateError::Variable(_) => ErrorKind::Format,
        UpdateError::Database(d) => database_kind(d),
        UpdateError::Auth(a) => auth_kind(a),
        UpdateError::Store(s) => store_kind(s),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(e) => database_kind(e),
            Error::Auth(e) => auth_kind(e),
            Error::Store(e) => store_kind(e),
            Error::Flash(e) => flash_kind(e),
            Error::Crypto(e) => crypto_kind(e),
            Error::Update(e) => update_kind(e),
            Error::Variable(VariableError::Unknown(_))
            | Error::Time(_)
            | Error::Guid(_)
            | Error::Attributes(_) => ErrorKind::Usage,
            Error::Esl(_)
            | Error::Variable(_)
            | Error::Authenticode(_)
            | Error::CertificateBuilder(_) => ErrorKind::Format,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::EFI_GLOBAL_VARIABLE;
    use crate::variables::SecureVariable;

    #[test]
    fn test_kinds() {
        let e: Error =
            StoreError::not_found("PK", &EFI_GLOBAL_VARIABLE).into();
        assert_eq!(e.kind(), ErrorKind::NotFound);

        let e: Error = StoreError::PermissionDenied {
            name: "db".into(),
            message: "Cannot write to db: Permission denied (os error 13)"
                .into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            e.to_string(),
            "Variable store error: Cannot write to db: Permission denied (os error 13)"
        );

        let e: Error = UpdateError::Auth(AuthError::UnauthorizedSigner {
            subject: "CN=x".into(),
            authority: "KEK".into(),
        })
        .into();
        assert_eq!(e.kind(), ErrorKind::UnauthorizedSigner);

        let e: Error = UpdateError::Database(DatabaseError::ListNotFound {
            index: 3,
            count: 1,
        })
        .into();
        assert_eq!(e.kind(), ErrorKind::NotFound);

        let e: Error = UpdateError::UnsignedInUserMode {
            variable: SecureVariable::Db,
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Usage);

        let e: Error = EslError::ZeroEntrySize { offset: 0 }.into();
        assert_eq!(e.kind(), ErrorKind::Format);
    }
}
