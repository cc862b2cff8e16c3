// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Offline editing of the authenticated variable store inside a firmware
//! flash image.
//!
//! The store starts with a 28-byte VARIABLE_STORE_HEADER whose signature is
//! [`EFI_AUTHENTICATED_VARIABLE`], found by scanning the image in 8-byte
//! steps. Variables follow as 4-byte aligned records: a 60-byte
//! AUTHENTICATED_VARIABLE_HEADER, the null terminated UCS-2 name and the
//! data. Erased flash reads as 0xFF, so the first record without the 0x55AA
//! start marker is the beginning of free space.
//!
//! Updating a variable appends a new record and clears a bit in the state
//! byte of the old one, the same way firmware does it.

use super::{
    runtime::{from_ucs2, to_ucs2},
    StoreError, Variable, VariableStore,
};
use crate::{
    attributes::VariableAttributes,
    auth::{AuthError, AuthenticatedVariable},
    guid::{self, EFI_AUTHENTICATED_VARIABLE, GUID_SIZE},
    time::EfiTime,
};
use byteorder::{ByteOrder, LittleEndian};
use log::*;
use std::{
    fs,
    io::{self, Write},
    path::Path,
};
use thiserror::Error;
use uuid::Uuid;

pub const VARIABLE_STORE_HEADER_SIZE: usize = 28;
pub const VARIABLE_HEADER_SIZE: usize = 60;

const SCAN_STEP: usize = 8;
const HEADER_ALIGNMENT: usize = 4;
const ERASED: u8 = 0xff;

const VARIABLE_DATA: u16 = 0x55aa;
const VARIABLE_STORE_FORMATTED: u8 = 0x5a;
const VARIABLE_STORE_HEALTHY: u8 = 0xfe;
const VAR_ADDED: u8 = 0x3f;
const VAR_IN_DELETED_TRANSITION: u8 = 0xfe;
const VAR_DELETED: u8 = 0xfd;

const_assert_eq!(VARIABLE_STORE_HEADER_SIZE % HEADER_ALIGNMENT, 0);

#[derive(Error, Debug)]
pub enum FlashError {
    /// No store signature anywhere in the image
    #[error("no authenticated variable store in {0} byte image")]
    StoreNotFound(usize),

    /// The store header is unusable
    #[error("variable store at {offset:#x} is corrupt: {message}")]
    CorruptStore { offset: usize, message: String },

    /// A variable record is unusable
    #[error("variable record at {offset:#x} is corrupt: {message}")]
    CorruptVariable { offset: usize, message: String },

    /// Not enough free space for a new record
    #[error("variable store is full: {needed} bytes needed, {available} free")]
    StoreFull { needed: usize, available: usize },

    /// Image too small to hold a store header
    #[error("{0} bytes cannot hold a variable store")]
    TooSmall(usize),

    /// A time-based write carried an invalid envelope
    #[error("invalid authenticated write to {name}")]
    Envelope {
        name: String,
        source: AuthError,
    },

    /// Error reading the image
    #[error("failed to read flash image {path}")]
    Read { path: String, source: io::Error },

    /// Error writing the image
    #[error("failed to write flash image {path}")]
    Write { path: String, source: io::Error },
}

/// A record of the variable store, live or deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashVariable {
    /// Offset of the record header in the image
    pub offset: usize,
    pub state: u8,
    pub name: String,
    pub guid: Uuid,
    pub attributes: VariableAttributes,
    pub monotonic_count: u64,
    pub timestamp: EfiTime,
    pub pub_key_index: u32,
    pub data: Vec<u8>,
}

impl FlashVariable {
    pub fn is_live(&self) -> bool {
        self.state == VAR_ADDED
    }

    /// Copy whose replacement was interrupted before this one got deleted.
    /// It is still the value when no live copy exists.
    pub fn is_in_deleted_transition(&self) -> bool {
        self.state == VAR_ADDED & VAR_IN_DELETED_TRANSITION
    }

    pub fn is_valid(&self) -> bool {
        self.is_live() || self.is_in_deleted_transition()
    }

    fn is(&self, name: &str, guid: &Uuid) -> bool {
        self.name == name && self.guid == *guid
    }
}

/// The current copy of a variable: the newest live record, or failing that
/// the newest one left in deleted transition
fn current<'a>(
    records: &'a [FlashVariable],
    name: &str,
    guid: &Uuid,
) -> Option<&'a FlashVariable> {
    let mut matching = records.iter().rev().filter(|v| v.is(name, guid));
    matching
        .clone()
        .find(|v| v.is_live())
        .or_else(|| matching.find(|v| v.is_in_deleted_transition()))
}

fn align(offset: usize) -> usize {
    offset.div_ceil(HEADER_ALIGNMENT) * HEADER_ALIGNMENT
}

#[derive(Debug, Clone)]
pub struct FlashStore {
    image: Vec<u8>,
    store_offset: usize,
    store_size: usize,
}

impl FlashStore {
    pub fn open(path: &Path) -> Result<Self, FlashError> {
        let image = fs::read(path).map_err(|source| FlashError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_image(image)
    }

    /// Locate the variable store in a raw image
    pub fn from_image(image: Vec<u8>) -> Result<Self, FlashError> {
        let signature = guid::to_efi_bytes(&EFI_AUTHENTICATED_VARIABLE);
        let store_offset = (0..image.len())
            .step_by(SCAN_STEP)
            .find(|off| {
                image
                    .get(*off..*off + GUID_SIZE)
                    .is_some_and(|g| g == signature)
            })
            .ok_or(FlashError::StoreNotFound(image.len()))?;
        debug!("Variable store header found at offset {store_offset:#x}");

        let header = image
            .get(store_offset..store_offset + VARIABLE_STORE_HEADER_SIZE)
            .ok_or_else(|| FlashError::CorruptStore {
                offset: store_offset,
                message: "header is truncated".into(),
            })?;
        let store_size = LittleEndian::read_u32(&header[16..20]) as usize;
        let (format, state) = (header[20], header[21]);

        if format != VARIABLE_STORE_FORMATTED
            || state != VARIABLE_STORE_HEALTHY
        {
            return Err(FlashError::CorruptStore {
                offset: store_offset,
                message: format!(
                    "format {format:#04x} state {state:#04x}, expected formatted and healthy"
                ),
            });
        }
        if store_size < VARIABLE_STORE_HEADER_SIZE
            || store_offset + store_size > image.len()
        {
            return Err(FlashError::CorruptStore {
                offset: store_offset,
                message: format!(
                    "size {store_size:#x} does not fit in the {} byte image",
                    image.len()
                ),
            });
        }
        debug!("Variable store size is {store_size:#x}");

        Ok(Self {
            image,
            store_offset,
            store_size,
        })
    }

    /// An erased image of `size` bytes holding an empty store
    pub fn blank(size: usize) -> Result<Self, FlashError> {
        if size < VARIABLE_STORE_HEADER_SIZE {
            return Err(FlashError::TooSmall(size));
        }
        let store_size =
            u32::try_from(size).map_err(|_| FlashError::TooSmall(size))?;

        let mut image = vec![ERASED; size];
        image[..GUID_SIZE]
            .copy_from_slice(&guid::to_efi_bytes(&EFI_AUTHENTICATED_VARIABLE));
        LittleEndian::write_u32(&mut image[16..20], store_size);
        image[20] = VARIABLE_STORE_FORMATTED;
        image[21] = VARIABLE_STORE_HEALTHY;
        image[22..VARIABLE_STORE_HEADER_SIZE].fill(0);

        Ok(Self {
            image,
            store_offset: 0,
            store_size: size,
        })
    }

    pub fn store_offset(&self) -> usize {
        self.store_offset
    }

    pub fn store_size(&self) -> usize {
        self.store_size
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    fn store_end(&self) -> usize {
        self.store_offset + self.store_size
    }

    /// Every record and the offset where free space begins
    fn walk(&self) -> Result<(Vec<FlashVariable>, usize), FlashError> {
        let end = self.store_end();
        let mut offset = self.store_offset + VARIABLE_STORE_HEADER_SIZE;
        let mut records = Vec::new();

        while offset + VARIABLE_HEADER_SIZE <= end {
            let h = &self.image[offset..offset + VARIABLE_HEADER_SIZE];
            if LittleEndian::read_u16(&h[0..2]) != VARIABLE_DATA {
                break;
            }

            let corrupt = |message: &str| FlashError::CorruptVariable {
                offset,
                message: message.to_string(),
            };
            let name_size = LittleEndian::read_u32(&h[36..40]) as usize;
            let data_size = LittleEndian::read_u32(&h[40..44]) as usize;
            if name_size % 2 != 0 {
                return Err(corrupt("odd name size"));
            }

            let name_start = offset + VARIABLE_HEADER_SIZE;
            let data_start = name_start + name_size;
            let record_end = data_start
                .checked_add(data_size)
                .filter(|e| *e <= end)
                .ok_or_else(|| corrupt("runs past the end of the store"))?;

            let name: Vec<u16> = self.image[name_start..data_start]
                .chunks_exact(2)
                .map(LittleEndian::read_u16)
                .collect();
            records.push(FlashVariable {
                offset,
                state: h[2],
                name: from_ucs2(&name),
                guid: guid::from_efi_bytes(&h[44..60])
                    .map_err(|e| corrupt(&e.to_string()))?,
                attributes: VariableAttributes::from_bits(
                    LittleEndian::read_u32(&h[4..8]),
                ),
                monotonic_count: LittleEndian::read_u64(&h[8..16]),
                timestamp: EfiTime::from_bytes(&h[16..32])
                    .map_err(|e| corrupt(&e.to_string()))?,
                pub_key_index: LittleEndian::read_u32(&h[32..36]),
                data: self.image[data_start..record_end].to_vec(),
            });

            offset = self.store_offset
                + align(record_end - self.store_offset);
        }

        Ok((records, offset.min(end)))
    }

    /// All records, deleted ones included, in store order
    pub fn variables(&self) -> Result<Vec<FlashVariable>, FlashError> {
        Ok(self.walk()?.0)
    }

    /// The current copy of a variable
    pub fn find(
        &self,
        name: &str,
        guid: &Uuid,
    ) -> Result<Option<FlashVariable>, FlashError> {
        let records = self.variables()?;
        Ok(current(&records, name, guid).cloned())
    }

    /// Bytes left for new records
    pub fn free_space(&self) -> Result<usize, FlashError> {
        let (_, free) = self.walk()?;
        Ok(self.store_end() - free)
    }

    fn mark_deleted(&mut self, record: &FlashVariable) {
        self.image[record.offset + 2] &= VAR_DELETED;
        debug!(
            "Marked {} at {:#x} deleted",
            record.name, record.offset
        );
    }

    /// Mark every valid copy of a variable deleted, returning how many
    /// there were
    fn delete_copies(
        &mut self,
        records: &[FlashVariable],
        name: &str,
        guid: &Uuid,
    ) -> usize {
        let mut deleted = 0;
        for old in records.iter().filter(|v| v.is_valid() && v.is(name, guid))
        {
            self.mark_deleted(old);
            deleted += 1;
        }
        deleted
    }

    /// Remove a variable, returning whether it existed
    pub fn delete_variable(
        &mut self,
        name: &str,
        guid: &Uuid,
    ) -> Result<bool, FlashError> {
        let records = self.variables()?;
        Ok(self.delete_copies(&records, name, guid) > 0)
    }

    /// Store `data` as the new value of a variable, exactly as given.
    ///
    /// Nothing is unwrapped or verified; time-based variables take the
    /// payload without envelope and the timestamp goes in the header.
    pub fn write_variable(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        timestamp: EfiTime,
        data: &[u8],
    ) -> Result<(), FlashError> {
        let name_bytes: Vec<u8> = to_ucs2(name)
            .into_iter()
            .flat_map(u16::to_le_bytes)
            .collect();
        let needed = VARIABLE_HEADER_SIZE + name_bytes.len() + data.len();

        let (records, free) = self.walk()?;
        let available = self.store_end() - free;
        if needed > available {
            return Err(FlashError::StoreFull { needed, available });
        }
        let too_large = |_| FlashError::StoreFull { needed, available };
        let name_size = u32::try_from(name_bytes.len()).map_err(too_large)?;
        let data_size = u32::try_from(data.len()).map_err(too_large)?;

        let mut header = [0u8; VARIABLE_HEADER_SIZE];
        LittleEndian::write_u16(&mut header[0..2], VARIABLE_DATA);
        header[2] = VAR_ADDED;
        LittleEndian::write_u32(&mut header[4..8], attributes.bits());
        header[16..32].copy_from_slice(&timestamp.to_bytes());
        LittleEndian::write_u32(&mut header[36..40], name_size);
        LittleEndian::write_u32(&mut header[40..44], data_size);
        header[44..60].copy_from_slice(&guid::to_efi_bytes(guid));

        let name_start = free + VARIABLE_HEADER_SIZE;
        let data_start = name_start + name_bytes.len();
        self.image[free..name_start].copy_from_slice(&header);
        self.image[name_start..data_start].copy_from_slice(&name_bytes);
        self.image[data_start..data_start + data.len()].copy_from_slice(data);

        let _ = self.delete_copies(&records, name, guid);

        info!(
            "Wrote {} bytes to {name}-{guid} at {free:#x} with attributes {attributes}",
            data.len()
        );
        Ok(())
    }

    /// Write the image back, replacing `path` atomically
    pub fn save(&self, path: &Path) -> Result<(), FlashError> {
        let write_error = |source: io::Error| FlashError::Write {
            path: path.display().to_string(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
        tmp.write_all(&self.image).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        let _ = tmp.persist(path).map_err(|e| write_error(e.error))?;
        debug!(
            "Saved {} byte flash image to {}",
            self.image.len(),
            path.display()
        );
        Ok(())
    }
}

impl VariableStore for FlashStore {
    fn get(&self, name: &str, guid: &Uuid) -> Result<Variable, StoreError> {
        let var = self
            .find(name, guid)?
            .ok_or_else(|| StoreError::not_found(name, guid))?;
        Ok(Variable {
            attributes: var.attributes,
            data: var.data,
        })
    }

    /// Apply a write the way firmware would, minus signature checks: the
    /// envelope of a time-based write is unwrapped, APPEND_WRITE extends the
    /// current value and empty data deletes.
    fn set(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let (payload, timestamp) = if attributes.is_time_based() {
            let envelope =
                AuthenticatedVariable::parse(data).map_err(|source| {
                    FlashError::Envelope {
                        name: name.to_string(),
                        source,
                    }
                })?;
            (envelope.payload, envelope.timestamp)
        } else {
            (data.to_vec(), EfiTime::default())
        };

        let append = attributes.is_append();
        let stored_attributes =
            attributes.difference(VariableAttributes::APPEND_WRITE);

        if !append && payload.is_empty() {
            if !self.delete_variable(name, guid)? {
                return Err(StoreError::not_found(name, guid));
            }
            info!("Deleted {name}-{guid}");
            return Ok(());
        }

        let (value, timestamp) = match self.find(name, guid)? {
            Some(mut existing) if append => {
                existing.data.extend_from_slice(&payload);
                let newest = if timestamp.is_after(&existing.timestamp) {
                    timestamp
                } else {
                    existing.timestamp
                };
                (existing.data, newest)
            }
            _ => (payload, timestamp),
        };

        self.write_variable(name, guid, stored_attributes, timestamp, &value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{build_envelope, EnvelopeMode};
    use crate::esl::build_sha256_list;
    use crate::guid::{EFI_IMAGE_SECURITY_DATABASE, MOK_OWNER, SHIM_LOCK};

    const MOK: &str = "MokList";
    const DBX: Uuid = EFI_IMAGE_SECURITY_DATABASE;

    fn at(second: u8) -> EfiTime {
        EfiTime {
            year: 2024,
            month: 5,
            day: 1,
            second,
            ..EfiTime::default()
        }
    }

    fn put_mok(store: &mut FlashStore, data: &[u8]) {
        let attrs = VariableAttributes::BOOT_NON_VOLATILE;
        store
            .write_variable(MOK, &SHIM_LOCK, attrs, at(0), data)
            .unwrap(); //#[allow_ci]
    }

    fn mok_data(store: &FlashStore) -> Vec<u8> {
        store.get(MOK, &SHIM_LOCK).unwrap().data //#[allow_ci]
    }

    fn dbx_envelope(
        attrs: VariableAttributes,
        payload: &[u8],
        second: u8,
    ) -> Vec<u8> {
        let mode = EnvelopeMode::Unsigned;
        build_envelope("dbx", &DBX, attrs, payload, mode, Some(at(second)))
            .unwrap() //#[allow_ci]
            .to_bytes()
            .unwrap() //#[allow_ci]
    }

    #[test]
    fn test_blank_store_layout() {
        let store = FlashStore::blank(0x1000).unwrap(); //#[allow_ci]
        let image = store.image();
        let signature = guid::to_efi_bytes(&EFI_AUTHENTICATED_VARIABLE);
        assert_eq!(&image[..16], &signature);
        assert_eq!(LittleEndian::read_u32(&image[16..20]), 0x1000);
        assert_eq!((image[20], image[21]), (0x5a, 0xfe));
        assert!(image[28..].iter().all(|b| *b == ERASED));
        assert!(store.variables().unwrap().is_empty()); //#[allow_ci]
        assert_eq!(store.free_space().unwrap(), 0x1000 - 28); //#[allow_ci]

        assert!(matches!(
            FlashStore::blank(16),
            Err(FlashError::TooSmall(16))
        ));
    }

    #[test]
    fn test_locates_store_inside_image() {
        let store = FlashStore::blank(0x200).unwrap(); //#[allow_ci]
        let mut image = vec![0u8; 0x48];
        image.extend_from_slice(store.image());
        image.extend_from_slice(&[0u8; 0x30]);

        let found = FlashStore::from_image(image).unwrap(); //#[allow_ci]
        assert_eq!(found.store_offset(), 0x48);
        assert_eq!(found.store_size(), 0x200);

        assert!(matches!(
            FlashStore::from_image(vec![0u8; 0x100]),
            Err(FlashError::StoreNotFound(0x100))
        ));
    }

    #[test]
    fn test_rejects_unhealthy_store() {
        let mut image = FlashStore::blank(0x100).unwrap().into_image(); //#[allow_ci]
        image[21] = 0x00;
        assert!(matches!(
            FlashStore::from_image(image.clone()),
            Err(FlashError::CorruptStore { offset: 0, .. })
        ));

        image[21] = VARIABLE_STORE_HEALTHY;
        LittleEndian::write_u32(&mut image[16..20], 0x200);
        assert!(matches!(
            FlashStore::from_image(image),
            Err(FlashError::CorruptStore { .. })
        ));
    }

    #[test]
    fn test_write_and_list() {
        let mut store = FlashStore::blank(0x1000).unwrap(); //#[allow_ci]
        let db = build_sha256_list(&MOK_OWNER, &[3; 32]);
        store
            .write_variable(
                "db",
                &EFI_IMAGE_SECURITY_DATABASE,
                VariableAttributes::AUTHENTICATED_DATABASE,
                at(1),
                &db,
            )
            .unwrap(); //#[allow_ci]

        let vars = store.variables().unwrap(); //#[allow_ci]
        assert_eq!(vars.len(), 1);
        let v = &vars[0];
        assert_eq!(v.offset, 28);
        assert_eq!(v.name, "db");
        assert_eq!(v.guid, EFI_IMAGE_SECURITY_DATABASE);
        assert_eq!(v.timestamp, at(1));
        assert_eq!(v.data, db);
        assert!(v.is_live());

        // header, "db\0" and 76 bytes of data, rounded up to 4
        let next = 28 + align(60 + 6 + 76);
        assert_eq!(store.free_space().unwrap(), 0x1000 - next); //#[allow_ci]
    }

    #[test]
    fn test_rewrite_marks_old_copy_deleted() {
        let mut store = FlashStore::blank(0x1000).unwrap(); //#[allow_ci]
        put_mok(&mut store, &[1]);
        put_mok(&mut store, &[2, 2]);

        let vars = store.variables().unwrap(); //#[allow_ci]
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].state, VAR_ADDED & VAR_DELETED);
        assert!(vars[1].is_live());
        assert_eq!(mok_data(&store), vec![2, 2]);
    }

    #[test]
    fn test_interrupted_replacement() {
        let mut store = FlashStore::blank(0x1000).unwrap(); //#[allow_ci]
        put_mok(&mut store, &[1]);
        let first = store.variables().unwrap()[0].offset; //#[allow_ci]

        // Power lost after the old copy was flagged, before the new one
        // was written
        store.image[first + 2] &= VAR_IN_DELETED_TRANSITION;
        let old = store.find(MOK, &SHIM_LOCK).unwrap().unwrap(); //#[allow_ci]
        assert!(old.is_in_deleted_transition());
        assert_eq!(mok_data(&store), vec![1]);

        // A live copy wins over the one in transition
        put_mok(&mut store, &[2]);
        let vars = store.variables().unwrap(); //#[allow_ci]
        assert!(!vars[0].is_valid());
        assert!(vars[1].is_live());
        assert_eq!(mok_data(&store), vec![2]);

        assert!(store.delete_variable(MOK, &SHIM_LOCK).unwrap()); //#[allow_ci]
        assert!(store.find(MOK, &SHIM_LOCK).unwrap().is_none()); //#[allow_ci]
    }

    #[test]
    fn test_store_full() {
        let mut store = FlashStore::blank(28 + 80).unwrap(); //#[allow_ci]
        let attrs = VariableAttributes::BOOT_NON_VOLATILE;
        assert!(matches!(
            store.write_variable(MOK, &SHIM_LOCK, attrs, at(0), &[0; 64]),
            Err(FlashError::StoreFull {
                needed: 140,
                available: 80
            })
        ));
        // Nothing was written
        assert!(store.variables().unwrap().is_empty()); //#[allow_ci]
    }

    #[test]
    fn test_set_unwraps_envelope_and_appends() {
        let mut store = FlashStore::blank(0x1000).unwrap(); //#[allow_ci]
        let attrs = VariableAttributes::AUTHENTICATED_DATABASE;
        let first = build_sha256_list(&MOK_OWNER, &[1; 32]);
        let second = build_sha256_list(&MOK_OWNER, &[2; 32]);

        let env = dbx_envelope(attrs, &first, 9);
        store.set("dbx", &DBX, attrs, &env).unwrap(); //#[allow_ci]

        // The older timestamp of an append does not replace the stored one
        let append = attrs | VariableAttributes::APPEND_WRITE;
        let env = dbx_envelope(append, &second, 3);
        store.set("dbx", &DBX, append, &env).unwrap(); //#[allow_ci]

        let live = store.find("dbx", &DBX).unwrap().unwrap(); //#[allow_ci]
        assert_eq!(live.data, [first, second].concat());
        assert_eq!(live.attributes, attrs);
        assert_eq!(live.timestamp, at(9));

        assert!(matches!(
            store.set("dbx", &DBX, attrs, &[0; 8]),
            Err(StoreError::Flash(FlashError::Envelope { .. }))
        ));
    }

    #[test]
    fn test_empty_write_deletes() {
        let mut store = FlashStore::blank(0x400).unwrap(); //#[allow_ci]
        let attrs = VariableAttributes::BOOT_NON_VOLATILE;
        store.set("MokList", &SHIM_LOCK, attrs, &[5; 4]).unwrap(); //#[allow_ci]
        store.set("MokList", &SHIM_LOCK, attrs, &[]).unwrap(); //#[allow_ci]
        let err = store.get(MOK, &SHIM_LOCK).unwrap_err(); //#[allow_ci]
        assert!(err.is_not_found());
        let err = store.set(MOK, &SHIM_LOCK, attrs, &[]).unwrap_err(); //#[allow_ci]
        assert!(err.is_not_found());
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join("OVMF_VARS.fd");
        let mut store = FlashStore::blank(0x800).unwrap(); //#[allow_ci]
        put_mok(&mut store, &[7; 9]);
        store.save(&path).unwrap(); //#[allow_ci]

        let reopened = FlashStore::open(&path).unwrap(); //#[allow_ci]
        assert_eq!(reopened.image(), store.image());
        assert_eq!(mok_data(&reopened), vec![7; 9]);
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let mut store = FlashStore::blank(0x100).unwrap(); //#[allow_ci]
        put_mok(&mut store, &[1; 4]);
        let mut image = store.into_image();
        LittleEndian::write_u32(&mut image[28 + 40..28 + 44], 0x1000);
        let store = FlashStore::from_image(image).unwrap(); //#[allow_ci]
        assert!(matches!(
            store.variables(),
            Err(FlashError::CorruptVariable { offset: 28, .. })
        ));
    }
}
