// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! EFI_SIGNATURE_LIST codec.
//!
//! A signature database is a sequence of signature lists stored back to back:
//!
//! ```text
//! EFI_SIGNATURE_LIST {
//!     SignatureType:       GUID
//!     SignatureListSize:   u32    // header + signature header + entries
//!     SignatureHeaderSize: u32
//!     SignatureSize:       u32    // size of every entry, owner included
//!     SignatureHeader:     [u8; SignatureHeaderSize]
//!     Signatures:          [EFI_SIGNATURE_DATA]
//! }
//!
//! EFI_SIGNATURE_DATA {
//!     SignatureOwner: GUID
//!     SignatureData:  [u8; SignatureSize - 16]
//! }
//! ```
//!
//! Views returned here borrow from the parsed buffer and never extend past
//! the bounds of their parent.

use crate::{
    guid::{self, SignatureType, GUID_SIZE},
    time::EfiTime,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;
use uuid::Uuid;

/// Size of the fixed EFI_SIGNATURE_LIST header
pub const SIGNATURE_LIST_HEADER_SIZE: usize = 28;
/// Size of the owner GUID at the start of every entry
pub const SIGNATURE_OWNER_SIZE: usize = GUID_SIZE;
pub const SHA256_DIGEST_SIZE: usize = 32;

const_assert_eq!(SIGNATURE_LIST_HEADER_SIZE, GUID_SIZE + 3 * 4);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EslError {
    /// Fewer bytes left than a list header needs
    #[error("truncated signature list at offset {offset}: {remaining} byte(s) left, a list header needs 28")]
    TruncatedHeader { offset: usize, remaining: usize },

    /// The declared list size runs past the end of the buffer
    #[error("truncated signature list at offset {offset}: declares {declared} bytes but only {remaining} remain")]
    Truncated {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// The declared list size cannot hold the list header
    #[error("signature list at offset {offset} declares size {declared}, smaller than its own header")]
    ListTooSmall { offset: usize, declared: usize },

    /// The signature header runs past the declared list size
    #[error("signature list at offset {offset}: signature header of {header_size} bytes overruns the list")]
    HeaderOverrun { offset: usize, header_size: usize },

    /// Entry size of zero
    #[error("signature list at offset {offset} has a zero entry size")]
    ZeroEntrySize { offset: usize },

    /// Entry size cannot hold the owner GUID
    #[error("signature list at offset {offset}: entry size {entry_size} cannot hold the 16-byte owner")]
    EntryTooSmall { offset: usize, entry_size: usize },

    /// List without any entry
    #[error("signature list at offset {offset} has an empty entry region")]
    EmptyEntryRegion { offset: usize },

    /// The entry region is not a whole number of entries
    #[error("signature list at offset {offset}: entry region of {region} bytes is not a multiple of entry size {entry_size}")]
    UnevenEntries {
        offset: usize,
        region: usize,
        entry_size: usize,
    },

    /// A fixed-size type with the wrong entry size
    #[error("{kind} entries carry {expected} bytes of data, list at offset {offset} declares {actual}")]
    EntrySizeMismatch {
        offset: usize,
        kind: SignatureType,
        expected: usize,
        actual: usize,
    },

    /// Entries of different sizes added to one list
    #[error("all entries of a signature list must have the same size: expected {expected} data bytes, got {actual}")]
    MixedEntrySizes { expected: usize, actual: usize },

    /// Bytes after a list that was expected to fill the buffer
    #[error("{extra} unexpected byte(s) after the signature list ending at offset {offset}")]
    TrailingBytes { offset: usize, extra: usize },

    /// Nothing to encode
    #[error("a signature list needs at least one entry")]
    NoEntries,

    /// The encoded list does not fit the 32-bit size field
    #[error("signature list of {0} bytes does not fit a 32-bit size field")]
    TooLarge(usize),
}

/// The fixed EFI_SIGNATURE_LIST header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureListHeader {
    pub signature_type: Uuid,
    pub list_size: u32,
    pub header_size: u32,
    pub entry_size: u32,
}

impl SignatureListHeader {
    /// Decode a header from the start of `bytes`; `offset` only feeds errors
    pub fn from_bytes(bytes: &[u8], offset: usize) -> Result<Self, EslError> {
        if bytes.len() < SIGNATURE_LIST_HEADER_SIZE {
            return Err(EslError::TruncatedHeader {
                offset,
                remaining: bytes.len(),
            });
        }

        let signature_type =
            guid::from_efi_bytes(bytes).map_err(|_| EslError::TruncatedHeader {
                offset,
                remaining: bytes.len(),
            })?;
        let mut cursor =
            Cursor::new(&bytes[GUID_SIZE..SIGNATURE_LIST_HEADER_SIZE]);
        let truncated = |_| EslError::TruncatedHeader {
            offset,
            remaining: bytes.len(),
        };
        let list_size =
            cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let header_size =
            cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let entry_size =
            cursor.read_u32::<LittleEndian>().map_err(truncated)?;

        Ok(Self {
            signature_type,
            list_size,
            header_size,
            entry_size,
        })
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LIST_HEADER_SIZE] {
        let mut out = [0u8; SIGNATURE_LIST_HEADER_SIZE];
        out[..GUID_SIZE]
            .copy_from_slice(&guid::to_efi_bytes(&self.signature_type));
        let mut cursor = Cursor::new(&mut out[GUID_SIZE..]);
        // Writes into a fixed 12-byte window cannot fail
        let _ = cursor.write_u32::<LittleEndian>(self.list_size);
        let _ = cursor.write_u32::<LittleEndian>(self.header_size);
        let _ = cursor.write_u32::<LittleEndian>(self.entry_size);
        out
    }
}

/// One entry of a signature list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub owner: Uuid,
    pub data: &'a [u8],
}

/// A bounds-checked view of one signature list inside a database buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureList<'a> {
    offset: usize,
    header: SignatureListHeader,
    raw: &'a [u8],
}

impl<'a> SignatureList<'a> {
    /// Check the list header at `offset` and the list's extent in `buf`
    fn at(buf: &'a [u8], offset: usize) -> Result<Self, EslError> {
        let remaining = buf.len() - offset;
        let header = SignatureListHeader::from_bytes(&buf[offset..], offset)?;
        let declared = header.list_size as usize;

        if declared < SIGNATURE_LIST_HEADER_SIZE {
            return Err(EslError::ListTooSmall { offset, declared });
        }
        if declared > remaining {
            return Err(EslError::Truncated {
                offset,
                declared,
                remaining,
            });
        }

        Ok(Self {
            offset,
            header,
            raw: &buf[offset..offset + declared],
        })
    }

    /// Parse a buffer holding exactly one signature list
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, EslError> {
        let list = Self::at(bytes, 0)?;
        if list.raw.len() != bytes.len() {
            return Err(EslError::TrailingBytes {
                offset: list.raw.len(),
                extra: bytes.len() - list.raw.len(),
            });
        }
        Ok(list)
    }

    /// Byte offset of this list in the buffer it was parsed from
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn header(&self) -> &SignatureListHeader {
        &self.header
    }

    pub fn signature_type(&self) -> SignatureType {
        SignatureType::from_guid(&self.header.signature_type)
    }

    pub fn list_size(&self) -> usize {
        self.raw.len()
    }

    pub fn header_size(&self) -> usize {
        self.header.header_size as usize
    }

    pub fn entry_size(&self) -> usize {
        self.header.entry_size as usize
    }

    /// The whole list block, header included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    /// The optional signature header between the list header and the
    /// first entry
    pub fn signature_header(&self) -> Result<&'a [u8], EslError> {
        let end = SIGNATURE_LIST_HEADER_SIZE
            .checked_add(self.header_size())
            .filter(|end| *end <= self.raw.len())
            .ok_or(EslError::HeaderOverrun {
                offset: self.offset,
                header_size: self.header_size(),
            })?;
        Ok(&self.raw[SIGNATURE_LIST_HEADER_SIZE..end])
    }

    /// Validate the entry geometry and iterate the entries
    pub fn entries(&self) -> Result<Entries<'a>, EslError> {
        let offset = self.offset;
        let entry_size = self.entry_size();
        let start =
            SIGNATURE_LIST_HEADER_SIZE + self.signature_header()?.len();
        let region = self.raw.len() - start;

        if entry_size == 0 {
            return Err(EslError::ZeroEntrySize { offset });
        }
        if entry_size < SIGNATURE_OWNER_SIZE {
            return Err(EslError::EntryTooSmall { offset, entry_size });
        }
        if region == 0 {
            return Err(EslError::EmptyEntryRegion { offset });
        }
        if region % entry_size != 0 {
            return Err(EslError::UnevenEntries {
                offset,
                region,
                entry_size,
            });
        }

        let kind = self.signature_type();
        if let Some(expected) = kind.data_size() {
            let actual = entry_size - SIGNATURE_OWNER_SIZE;
            if actual != expected {
                return Err(EslError::EntrySizeMismatch {
                    offset,
                    kind,
                    expected,
                    actual,
                });
            }
        }

        Ok(Entries {
            region: &self.raw[start..],
            entry_size,
        })
    }

    /// Number of entries, once the geometry is known to be valid
    pub fn entry_count(&self) -> Result<usize, EslError> {
        Ok(self.entries()?.len())
    }

    /// Byte offset, inside this list, of entry `index`
    pub(crate) fn entry_offset(&self, index: usize) -> usize {
        SIGNATURE_LIST_HEADER_SIZE
            + self.header_size()
            + index * self.entry_size()
    }

    pub fn to_owned_list(&self) -> Result<OwnedSignatureList, EslError> {
        Ok(OwnedSignatureList {
            signature_type: self.header.signature_type,
            signature_header: self.signature_header()?.to_vec(),
            entries: self
                .entries()?
                .map(|e| OwnedEntry {
                    owner: e.owner,
                    data: e.data.to_vec(),
                })
                .collect(),
        })
    }
}

/// Iterator over the entries of a validated list
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    region: &'a [u8],
    entry_size: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.region.len() < self.entry_size {
            return None;
        }
        let (entry, rest) = self.region.split_at(self.entry_size);
        self.region = rest;
        let (owner, data) = entry.split_at(SIGNATURE_OWNER_SIZE);
        Some(Entry {
            owner: Uuid::from_slice_le(owner).ok()?,
            data,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.region.len() / self.entry_size;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Entries<'_> {}

/// Iterator over the lists of a database buffer.
///
/// Yields an error and stops when the remaining bytes cannot hold the next
/// list, so a truncated tail is always visible to the caller.
#[derive(Debug, Clone)]
pub struct SignatureLists<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> SignatureLists<'a> {
    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

impl<'a> Iterator for SignatureLists<'a> {
    type Item = Result<SignatureList<'a>, EslError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        match SignatureList::at(self.buf, self.offset) {
            Ok(list) => {
                self.offset += list.list_size();
                Some(Ok(list))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterate the signature lists in `buf`
pub fn parse_lists(buf: &[u8]) -> SignatureLists<'_> {
    SignatureLists {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Iterate the entries of `list`, validating its entry geometry first
pub fn parse_entries<'a>(
    list: &SignatureList<'a>,
) -> Result<Entries<'a>, EslError> {
    list.entries()
}

/// Parse and fully validate every list and entry in `buf`
pub fn parse_database(buf: &[u8]) -> Result<Vec<SignatureList<'_>>, EslError> {
    let mut lists = Vec::new();
    for list in parse_lists(buf) {
        let list = list?;
        let _ = list.entries()?;
        lists.push(list);
    }
    Ok(lists)
}

/// An owned entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedEntry {
    pub owner: Uuid,
    pub data: Vec<u8>,
}

/// An owned signature list, used to build new lists and to compare parsed
/// ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedSignatureList {
    pub signature_type: Uuid,
    pub signature_header: Vec<u8>,
    pub entries: Vec<OwnedEntry>,
}

impl OwnedSignatureList {
    pub fn new(signature_type: SignatureType) -> Self {
        Self {
            signature_type: signature_type.guid(),
            signature_header: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(
        mut self,
        owner: Uuid,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.push(owner, data);
        self
    }

    pub fn push(&mut self, owner: Uuid, data: impl Into<Vec<u8>>) {
        self.entries.push(OwnedEntry {
            owner,
            data: data.into(),
        });
    }

    /// Encode the list, checking every entry has the same size
    pub fn to_bytes(&self) -> Result<Vec<u8>, EslError> {
        let first = self.entries.first().ok_or(EslError::NoEntries)?;
        let data_size = first.data.len();

        if let Some(bad) =
            self.entries.iter().find(|e| e.data.len() != data_size)
        {
            return Err(EslError::MixedEntrySizes {
                expected: data_size,
                actual: bad.data.len(),
            });
        }

        let kind = SignatureType::from_guid(&self.signature_type);
        if let Some(expected) = kind.data_size() {
            if expected != data_size {
                return Err(EslError::EntrySizeMismatch {
                    offset: 0,
                    kind,
                    expected,
                    actual: data_size,
                });
            }
        }

        let entry_size = SIGNATURE_OWNER_SIZE + data_size;
        let total = SIGNATURE_LIST_HEADER_SIZE
            + self.signature_header.len()
            + entry_size * self.entries.len();
        let as_u32 = |n: usize| {
            u32::try_from(n).map_err(|_| EslError::TooLarge(total))
        };

        let header = SignatureListHeader {
            signature_type: self.signature_type,
            list_size: as_u32(total)?,
            header_size: as_u32(self.signature_header.len())?,
            entry_size: as_u32(entry_size)?,
        };

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.signature_header);
        for entry in &self.entries {
            out.extend_from_slice(&guid::to_efi_bytes(&entry.owner));
            out.extend_from_slice(&entry.data);
        }
        Ok(out)
    }
}

/// Single-entry SHA-256 list
pub fn build_sha256_list(
    owner: &Uuid,
    digest: &[u8; SHA256_DIGEST_SIZE],
) -> Vec<u8> {
    let header = SignatureListHeader {
        signature_type: guid::EFI_CERT_SHA256,
        list_size: (SIGNATURE_LIST_HEADER_SIZE
            + SIGNATURE_OWNER_SIZE
            + SHA256_DIGEST_SIZE) as u32,
        header_size: 0,
        entry_size: (SIGNATURE_OWNER_SIZE + SHA256_DIGEST_SIZE) as u32,
    };

    let mut out = Vec::with_capacity(header.list_size as usize);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&guid::to_efi_bytes(owner));
    out.extend_from_slice(digest);
    out
}

/// Single-entry X.509 list holding a DER certificate
pub fn build_x509_list(owner: &Uuid, der: &[u8]) -> Result<Vec<u8>, EslError> {
    OwnedSignatureList::new(SignatureType::X509)
        .with_entry(*owner, der)
        .to_bytes()
}

/// One list of `kind` holding every digest in `digests`, all owned by `owner`
pub fn build_hash_list(
    kind: SignatureType,
    owner: &Uuid,
    digests: &[Vec<u8>],
) -> Result<Vec<u8>, EslError> {
    let mut list = OwnedSignatureList::new(kind);
    for digest in digests {
        list.push(*owner, digest.clone());
    }
    list.to_bytes()
}

/// Certificate revocation by TBS digest.
///
/// `kind` must be one of the X509_SHA* types and `tbs_digest` the digest of
/// the certificate's TBSCertificate.
pub fn build_x509_hash_list(
    kind: SignatureType,
    owner: &Uuid,
    tbs_digest: &[u8],
    time_of_revocation: &EfiTime,
) -> Result<Vec<u8>, EslError> {
    let mut data = Vec::with_capacity(tbs_digest.len() + EfiTime::SIZE);
    data.extend_from_slice(tbs_digest);
    data.extend_from_slice(&time_of_revocation.to_bytes());
    OwnedSignatureList::new(kind).with_entry(*owner, data).to_bytes()
}
