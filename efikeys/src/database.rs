// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Signature database engine.
//!
//! A [`SignatureDatabase`] owns a buffer that is known to parse cleanly as a
//! sequence of signature lists. Every mutation builds a new buffer from the
//! unaffected prefix and suffix and is validated again before it is handed
//! back, so a half-edited database never escapes this module.

use crate::esl::{
    self, Entry, EslError, OwnedSignatureList, SignatureList,
    SignatureListHeader, SIGNATURE_LIST_HEADER_SIZE,
};
use crate::guid::SignatureType;
use log::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// Malformed signature list data
    #[error("malformed signature database: {0}")]
    Format(#[from] EslError),

    /// List index out of range
    #[error("signature list {index} not found, the database has {count} list(s)")]
    ListNotFound { index: usize, count: usize },

    /// Entry index out of range
    #[error("entry {entry} not found in signature list {list}, which has {count} entr(y/ies)")]
    EntryNotFound {
        list: usize,
        entry: usize,
        count: usize,
    },
}

/// Position of an entry in a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryLocation {
    pub list: usize,
    pub entry: usize,
}

/// An entry together with where it lives and the type of its list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedEntry<'a> {
    pub location: EntryLocation,
    pub signature_type: SignatureType,
    pub entry: Entry<'a>,
}

/// A validated EFI signature database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureDatabase {
    buf: Vec<u8>,
}

impl SignatureDatabase {
    /// An empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `buf` after checking every list and entry
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, DatabaseError> {
        let _ = esl::parse_database(&buf)?;
        Ok(Self { buf })
    }

    pub fn from_lists(
        lists: &[OwnedSignatureList],
    ) -> Result<Self, DatabaseError> {
        let mut buf = Vec::new();
        for list in lists {
            buf.extend(list.to_bytes()?);
        }
        Self::from_bytes(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Lists in storage order
    pub fn lists(&self) -> Vec<SignatureList<'_>> {
        // Validated when the database was built
        esl::parse_lists(&self.buf).map_while(Result::ok).collect()
    }

    pub fn list_count(&self) -> usize {
        self.lists().len()
    }

    pub fn list(
        &self,
        index: usize,
    ) -> Result<SignatureList<'_>, DatabaseError> {
        let lists = self.lists();
        let count = lists.len();
        lists
            .get(index)
            .copied()
            .ok_or(DatabaseError::ListNotFound { index, count })
    }

    /// Every entry of every list, in storage order
    pub fn entries(&self) -> Vec<LocatedEntry<'_>> {
        let mut out = Vec::new();
        for (list_index, list) in self.lists().into_iter().enumerate() {
            let signature_type = list.signature_type();
            for (entry_index, entry) in
                list.entries().into_iter().flatten().enumerate()
            {
                out.push(LocatedEntry {
                    location: EntryLocation {
                        list: list_index,
                        entry: entry_index,
                    },
                    signature_type,
                    entry,
                });
            }
        }
        out
    }

    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    pub fn entry(
        &self,
        location: EntryLocation,
    ) -> Result<Entry<'_>, DatabaseError> {
        let list = self.list(location.list)?;
        let count = list.entry_count()?;
        list.entries()?
            .nth(location.entry)
            .ok_or(DatabaseError::EntryNotFound {
                list: location.list,
                entry: location.entry,
                count,
            })
    }

    /// Location of the first entry matching `predicate`
    pub fn find<P>(&self, mut predicate: P) -> Option<EntryLocation>
    where
        P: FnMut(SignatureType, &Entry<'_>) -> bool,
    {
        self.entries()
            .into_iter()
            .find(|e| predicate(e.signature_type, &e.entry))
            .map(|e| e.location)
    }

    /// Location of a hash entry of type `kind` with data `digest`
    pub fn find_hash(
        &self,
        kind: SignatureType,
        digest: &[u8],
    ) -> Option<EntryLocation> {
        self.find(|t, e| t == kind && e.data == digest)
    }

    /// Location of an X.509 entry holding exactly `der`
    pub fn find_certificate(&self, der: &[u8]) -> Option<EntryLocation> {
        self.find(|t, e| t == SignatureType::X509 && e.data == der)
    }

    pub fn contains_hash(&self, kind: SignatureType, digest: &[u8]) -> bool {
        self.find_hash(kind, digest).is_some()
    }

    pub fn contains_certificate(&self, der: &[u8]) -> bool {
        self.find_certificate(der).is_some()
    }

    /// DER bytes of every X.509 entry
    pub fn x509_certificates(&self) -> Vec<&[u8]> {
        self.entries()
            .into_iter()
            .filter(|e| e.signature_type == SignatureType::X509)
            .map(|e| e.entry.data)
            .collect()
    }

    /// Remove one entry.
    ///
    /// When the entry is the only one in its list the whole list goes, so
    /// the database shrinks by the list size. Otherwise only the entry goes
    /// and the list's declared size shrinks by the entry size.
    pub fn delete_entry(
        &self,
        list_index: usize,
        entry_index: usize,
    ) -> Result<Self, DatabaseError> {
        let list = self.list(list_index)?;
        let count = list.entry_count()?;
        if entry_index >= count {
            return Err(DatabaseError::EntryNotFound {
                list: list_index,
                entry: entry_index,
                count,
            });
        }

        if count == 1 {
            return self.delete_list(list_index);
        }

        let list_start = list.offset();
        let entry_start = list_start + list.entry_offset(entry_index);
        let entry_end = entry_start + list.entry_size();

        let shrunk = SignatureListHeader {
            list_size: list.header().list_size - list.header().entry_size,
            ..*list.header()
        };

        let mut out = Vec::with_capacity(self.buf.len() - list.entry_size());
        out.extend_from_slice(&self.buf[..list_start]);
        out.extend_from_slice(&shrunk.to_bytes());
        out.extend_from_slice(
            &self.buf[list_start + SIGNATURE_LIST_HEADER_SIZE..entry_start],
        );
        out.extend_from_slice(&self.buf[entry_end..]);

        debug!(
            "Deleted entry {entry_index} of list {list_index}, database shrinks from {} to {} bytes",
            self.buf.len(),
            out.len()
        );
        Self::from_bytes(out)
    }

    /// Remove a whole list
    pub fn delete_list(
        &self,
        list_index: usize,
    ) -> Result<Self, DatabaseError> {
        let list = self.list(list_index)?;
        let start = list.offset();
        let end = start + list.list_size();

        let mut out = Vec::with_capacity(self.buf.len() - list.list_size());
        out.extend_from_slice(&self.buf[..start]);
        out.extend_from_slice(&self.buf[end..]);

        debug!(
            "Deleted list {list_index}, database shrinks from {} to {} bytes",
            self.buf.len(),
            out.len()
        );
        Self::from_bytes(out)
    }

    /// Concatenate `new_lists`, which must itself be a valid database
    pub fn append(&self, new_lists: &[u8]) -> Result<Self, DatabaseError> {
        let _ = esl::parse_database(new_lists)?;
        let mut out = Vec::with_capacity(self.buf.len() + new_lists.len());
        out.extend_from_slice(&self.buf);
        out.extend_from_slice(new_lists);
        Self::from_bytes(out)
    }

    /// Replace the whole database with `new_bytes`
    pub fn replace(&self, new_bytes: Vec<u8>) -> Result<Self, DatabaseError> {
        Self::from_bytes(new_bytes)
    }
}

/// Every X.509 entry of `db` as an owned DER certificate, in database order
pub fn extract_certificates(db: &SignatureDatabase) -> Vec<Vec<u8>> {
    db.x509_certificates()
        .into_iter()
        .map(<[u8]>::to_vec)
        .collect()
}
