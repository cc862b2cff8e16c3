// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Variables exposed by Linux through efivarfs.
//!
//! Each variable is a file named `{Name}-{guid}`. Its content is the 32-bit
//! attribute word, little-endian, followed by the data. Writing the file
//! with the same layout calls SetVariable; the kernel passes APPEND_WRITE
//! through to firmware, which performs the append itself.

use super::{StoreError, Variable, VariableStore};
use crate::attributes::VariableAttributes;
use byteorder::{ByteOrder, LittleEndian};
use libc::c_int;
use log::*;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub const DEFAULT_EFIVARFS_PATH: &str = "/sys/firmware/efi/efivars";
const MOUNTS_PATH: &str = "/proc/self/mounts";
const EFIVARFS_TYPE: &str = "efivarfs";
const ATTRIBUTES_SIZE: usize = 4;

// From linux/fs.h
const FS_IMMUTABLE_FL: c_int = 0x0000_0010;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfivarfsStore {
    root: PathBuf,
}

impl EfivarfsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the efivarfs mount point in `/proc/self/mounts`
    pub fn discover() -> Result<Self, StoreError> {
        let mounts = fs::read_to_string(MOUNTS_PATH).map_err(|source| {
            StoreError::Io {
                path: MOUNTS_PATH.to_string(),
                source,
            }
        })?;
        let root = Self::discover_from(&mounts).ok_or(StoreError::NotMounted)?;
        debug!("Found efivarfs mounted on {}", root.display());
        Ok(Self::new(root))
    }

    /// Mount point of the first efivarfs in a mounts table
    pub fn discover_from(mounts: &str) -> Option<PathBuf> {
        mounts.lines().find_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next()?;
            (fstype == EFIVARFS_TYPE).then(|| PathBuf::from(mount_point))
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn variable_path(&self, name: &str, guid: &Uuid) -> PathBuf {
        self.root.join(format!("{name}-{}", guid.hyphenated()))
    }
}

/// Clear the immutable flag efivarfs sets on most variables.
///
/// Failures are not fatal: the write that follows reports the real error.
fn clear_immutable(path: &Path) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Not clearing immutable flag on {}: {e}", path.display());
            return;
        }
    };
    let fd = file.as_raw_fd();
    let mut flags: c_int = 0;

    let ret = unsafe {
        libc::ioctl(fd, libc::FS_IOC_GETFLAGS, &mut flags as *mut c_int)
    };
    if ret != 0 {
        debug!(
            "Could not read inode flags of {}: {}",
            path.display(),
            io::Error::last_os_error()
        );
        return;
    }
    if flags & FS_IMMUTABLE_FL == 0 {
        return;
    }

    flags &= !FS_IMMUTABLE_FL;
    let ret = unsafe {
        libc::ioctl(fd, libc::FS_IOC_SETFLAGS, &mut flags as *mut c_int)
    };
    if ret != 0 {
        debug!(
            "Could not clear immutable flag of {}: {}",
            path.display(),
            io::Error::last_os_error()
        );
    }
}

impl VariableStore for EfivarfsStore {
    fn get(&self, name: &str, guid: &Uuid) -> Result<Variable, StoreError> {
        let path = self.variable_path(name, guid);
        let raw = fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StoreError::not_found(name, guid),
            _ => StoreError::Io {
                path: path.display().to_string(),
                source,
            },
        })?;

        if raw.len() < ATTRIBUTES_SIZE {
            return Err(StoreError::Corrupt {
                name: name.to_string(),
                message: format!(
                    "{} byte file cannot hold the attribute word",
                    raw.len()
                ),
            });
        }

        Ok(Variable {
            attributes: VariableAttributes::from_bits(LittleEndian::read_u32(
                &raw[..ATTRIBUTES_SIZE],
            )),
            data: raw[ATTRIBUTES_SIZE..].to_vec(),
        })
    }

    fn set(
        &mut self,
        name: &str,
        guid: &Uuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.variable_path(name, guid);
        if path.exists() {
            clear_immutable(&path);
        }

        let mut buf = Vec::with_capacity(ATTRIBUTES_SIZE + data.len());
        buf.extend_from_slice(&attributes.to_le_bytes());
        buf.extend_from_slice(data);

        let io_error = |source: io::Error| write_error(name, &path, source);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(io_error)?;

        // One write is one SetVariable call
        let written = file.write(&buf).map_err(io_error)?;
        if written != buf.len() {
            return Err(StoreError::PartialWrite {
                path: path.display().to_string(),
                written,
                expected: buf.len(),
            });
        }

        info!(
            "Wrote {} bytes to {name} with attributes {attributes}",
            data.len()
        );
        Ok(())
    }
}

/// The kernel reports a rejected SetVariable as EACCES
/// (EFI_SECURITY_VIOLATION), EROFS (EFI_WRITE_PROTECTED) or EINVAL
/// (EFI_INVALID_PARAMETER, which includes mismatched attributes)
fn write_error(name: &str, path: &Path, source: io::Error) -> StoreError {
    match source.raw_os_error() {
        Some(libc::EACCES | libc::EPERM | libc::EROFS | libc::EINVAL) => {
            StoreError::PermissionDenied {
                name: name.to_string(),
                message: format!("Cannot write to {name}: {source}"),
            }
        }
        _ => StoreError::Io {
            path: path.display().to_string(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::{EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE};

    #[test]
    fn test_discover_from_mounts() {
        let mounts = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
efivarfs /sys/firmware/efi/efivars efivarfs rw,nosuid,nodev,noexec,relatime 0 0
";
        assert_eq!(
            EfivarfsStore::discover_from(mounts),
            Some(PathBuf::from(DEFAULT_EFIVARFS_PATH))
        );
        assert_eq!(
            EfivarfsStore::discover_from("proc /proc proc rw 0 0\n"),
            None
        );
        assert_eq!(EfivarfsStore::discover_from(""), None);
    }

    #[test]
    fn test_variable_path() {
        let store = EfivarfsStore::new("/sys/firmware/efi/efivars");
        assert_eq!(
            store.variable_path("db", &EFI_IMAGE_SECURITY_DATABASE),
            PathBuf::from(
                "/sys/firmware/efi/efivars/db-d719b2cb-3d3a-4596-a3bc-dad00e67656f"
            )
        );
    }

    #[test]
    fn test_round_trip_preserves_attributes() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let mut store = EfivarfsStore::new(dir.path());
        let attrs = VariableAttributes::AUTHENTICATED_DATABASE;
        store
            .set("KEK", &EFI_GLOBAL_VARIABLE, attrs, &[1, 2, 3, 4, 5])
            .unwrap(); //#[allow_ci]

        let path = store.variable_path("KEK", &EFI_GLOBAL_VARIABLE);
        let raw = fs::read(path).unwrap(); //#[allow_ci]
        assert_eq!(raw, vec![0x27, 0, 0, 0, 1, 2, 3, 4, 5]);

        let var = store.get("KEK", &EFI_GLOBAL_VARIABLE).unwrap(); //#[allow_ci]
        assert_eq!(var.attributes, attrs);
        assert_eq!(var.data, vec![1, 2, 3, 4, 5]);

        // A shorter rewrite leaves nothing behind
        store.set("KEK", &EFI_GLOBAL_VARIABLE, attrs, &[9]).unwrap(); //#[allow_ci]
        let var = store.get("KEK", &EFI_GLOBAL_VARIABLE).unwrap(); //#[allow_ci]
        assert_eq!(var.data, vec![9]);
    }

    #[test]
    fn test_not_found_is_distinct_from_empty() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let mut store = EfivarfsStore::new(dir.path());
        assert!(matches!(
            store.get("dbx", &EFI_IMAGE_SECURITY_DATABASE),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store
            .get_optional("dbx", &EFI_IMAGE_SECURITY_DATABASE)
            .unwrap() //#[allow_ci]
            .is_none());

        store
            .set(
                "dbx",
                &EFI_IMAGE_SECURITY_DATABASE,
                VariableAttributes::AUTHENTICATED_DATABASE,
                &[],
            )
            .unwrap(); //#[allow_ci]
        let var = store.get("dbx", &EFI_IMAGE_SECURITY_DATABASE).unwrap(); //#[allow_ci]
        assert!(var.data.is_empty());
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let store = EfivarfsStore::new(dir.path());
        let path = store.variable_path("db", &EFI_IMAGE_SECURITY_DATABASE);
        fs::write(path, [7, 0]).unwrap(); //#[allow_ci]
        assert!(matches!(
            store.get("db", &EFI_IMAGE_SECURITY_DATABASE),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_rejected_writes_keep_the_os_error() {
        let path = Path::new("/sys/firmware/efi/efivars/db-x");
        for errno in [libc::EACCES, libc::EPERM, libc::EROFS, libc::EINVAL] {
            let source = io::Error::from_raw_os_error(errno);
            let text = source.to_string();
            match write_error("db", path, source) {
                StoreError::PermissionDenied { name, message } => {
                    assert_eq!(name, "db");
                    assert!(message.ends_with(&text), "{message}");
                }
                other => panic!("errno {errno} mapped to {other:?}"),
            }
        }
        let full = io::Error::from_raw_os_error(libc::ENOSPC);
        assert!(matches!(
            write_error("db", path, full),
            StoreError::Io { .. }
        ));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let mut store = EfivarfsStore::new("/nonexistent/efivars");
        assert!(matches!(
            store.set(
                "db",
                &EFI_IMAGE_SECURITY_DATABASE,
                VariableAttributes::AUTHENTICATED_DATABASE,
                &[1]
            ),
            Err(StoreError::Io { .. })
        ));
    }
}
