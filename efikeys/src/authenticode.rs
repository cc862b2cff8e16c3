// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Authenticode digest of a PE/COFF image, the value firmware looks up in
//! db and dbx when an image is not signed by a trusted certificate.
//!
//! The digest covers the headers without the checksum field and without
//! the certificate table directory entry, then every section in file
//! order, then anything after the last section that is not the attribute
//! certificate table.

use goblin::pe::{
    data_directories::SIZEOF_DATA_DIRECTORY,
    header::{SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC},
    optional_header::{
        MAGIC_32, MAGIC_64, SIZEOF_STANDARD_FIELDS_32,
        SIZEOF_STANDARD_FIELDS_64, SIZEOF_WINDOWS_FIELDS_32,
        SIZEOF_WINDOWS_FIELDS_64,
    },
    PE,
};
use log::*;
use openssl::{
    error::ErrorStack,
    hash::{Hasher, MessageDigest},
};
use thiserror::Error;

// From the start of the optional header
const CHECKSUM_OFFSET: usize = 64;
const SIZEOF_CHECKSUM: usize = 4;
// Index of the certificate table in the data directories
const CERT_TABLE_INDEX: usize = 4;

#[derive(Error, Debug)]
pub enum AuthenticodeError {
    /// goblin could not parse the image
    #[error("not a valid PE/COFF image")]
    Parse(#[from] goblin::error::Error),

    /// Images without an optional header cannot be Authenticode signed
    #[error("PE/COFF image has no optional header")]
    MissingOptionalHeader,

    /// Optional header magic other than PE32 or PE32+
    #[error("unsupported optional header magic {0:#06x}")]
    UnsupportedMagic(u16),

    /// Declared sizes or offsets are inconsistent
    #[error("malformed PE/COFF image: {0}")]
    Malformed(String),

    /// Hashing failed
    #[error("failed to hash image")]
    Hash(#[from] ErrorStack),
}

/// Byte ranges and layout facts needed to hash an image
#[derive(Debug)]
struct Layout {
    checksum: usize,
    cert_dir: usize,
    size_of_headers: usize,
    cert_table: Option<(usize, usize)>,
    /// (offset, size) of each section's raw data, sorted by offset
    sections: Vec<(usize, usize)>,
}

fn layout(image: &[u8]) -> Result<Layout, AuthenticodeError> {
    let pe = PE::parse(image)?;
    let header = pe
        .header
        .optional_header
        .ok_or(AuthenticodeError::MissingOptionalHeader)?;

    let optional = pe.header.dos_header.pe_pointer as usize
        + SIZEOF_PE_MAGIC
        + SIZEOF_COFF_HEADER;
    let fields = match header.standard_fields.magic {
        MAGIC_32 => SIZEOF_STANDARD_FIELDS_32 + SIZEOF_WINDOWS_FIELDS_32,
        MAGIC_64 => SIZEOF_STANDARD_FIELDS_64 + SIZEOF_WINDOWS_FIELDS_64,
        other => return Err(AuthenticodeError::UnsupportedMagic(other)),
    };
    let checksum = optional + CHECKSUM_OFFSET;
    let cert_dir =
        optional + fields + CERT_TABLE_INDEX * SIZEOF_DATA_DIRECTORY;
    let size_of_headers = header.windows_fields.size_of_headers as usize;

    if size_of_headers > image.len()
        || cert_dir + SIZEOF_DATA_DIRECTORY > size_of_headers
    {
        return Err(AuthenticodeError::Malformed(format!(
            "SizeOfHeaders {size_of_headers:#x} does not cover the optional header"
        )));
    }

    let cert_table = match header.data_directories.get_certificate_table() {
        Some(dd) if dd.size > 0 => {
            let offset = dd.virtual_address as usize;
            let size = dd.size as usize;
            if !offset
                .checked_add(size)
                .is_some_and(|end| end <= image.len())
            {
                return Err(AuthenticodeError::Malformed(format!(
                    "certificate table {offset:#x}+{size:#x} runs past the end of the image"
                )));
            }
            Some((offset, size))
        }
        _ => None,
    };

    let mut sections = Vec::with_capacity(pe.sections.len());
    for (i, section) in pe.sections.iter().enumerate() {
        let offset = section.pointer_to_raw_data as usize;
        let size = section.size_of_raw_data as usize;
        if size == 0 {
            continue;
        }
        if !offset
            .checked_add(size)
            .is_some_and(|end| end <= image.len())
        {
            return Err(AuthenticodeError::Malformed(format!(
                "section {i} at {offset:#x}+{size:#x} runs past the end of the image"
            )));
        }
        sections.push((offset, size));
    }
    sections.sort_unstable();

    Ok(Layout {
        checksum,
        cert_dir,
        size_of_headers,
        cert_table,
        sections,
    })
}

/// Authenticode digest of `image` with `digest`
pub fn authenticode_digest(
    image: &[u8],
    digest: MessageDigest,
) -> Result<Vec<u8>, AuthenticodeError> {
    let l = layout(image)?;
    let mut hasher = Hasher::new(digest)?;

    hasher.update(&image[..l.checksum])?;
    hasher.update(&image[l.checksum + SIZEOF_CHECKSUM..l.cert_dir])?;
    hasher.update(
        &image[l.cert_dir + SIZEOF_DATA_DIRECTORY..l.size_of_headers],
    )?;
    let mut hashed = l.size_of_headers;

    for (offset, size) in &l.sections {
        hasher.update(&image[*offset..*offset + *size])?;
        hashed += size;
    }

    let cert_size = l.cert_table.map_or(0, |(_, size)| size);
    if image.len() > hashed + cert_size {
        let extra = image.len() - hashed - cert_size;
        trace!("Hashing {extra} trailing bytes after the sections");
        let end = hashed + extra;
        hasher.update(image.get(hashed..end).ok_or_else(|| {
            AuthenticodeError::Malformed(
                "sections overlap the image end".into(),
            )
        })?)?;
    }

    let out = hasher.finish()?;
    debug!(
        "Authenticode digest of {} byte image over {} section(s)",
        image.len(),
        l.sections.len()
    );
    Ok(out.to_vec())
}

/// SHA-256 Authenticode digest, the form db and dbx entries use
pub fn authenticode_sha256(
    image: &[u8],
) -> Result<[u8; 32], AuthenticodeError> {
    let digest = authenticode_digest(image, MessageDigest::sha256())?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use openssl::sha::sha256;

    const PE_OFFSET: usize = 0x40;
    const OPT: usize = PE_OFFSET + SIZEOF_PE_MAGIC + SIZEOF_COFF_HEADER;
    const HEADERS: usize = 0x200;
    const SECTION: usize = 0x200;
    // WIN_CERTIFICATE header plus eight bytes of payload
    const CERT_TABLE: usize = 16;

    fn dirs(magic: u16) -> usize {
        match magic {
            MAGIC_32 => SIZEOF_STANDARD_FIELDS_32 + SIZEOF_WINDOWS_FIELDS_32,
            _ => SIZEOF_STANDARD_FIELDS_64 + SIZEOF_WINDOWS_FIELDS_64,
        }
    }

    fn cert_dir(magic: u16) -> usize {
        OPT + dirs(magic) + CERT_TABLE_INDEX * SIZEOF_DATA_DIRECTORY
    }

    /// A minimal image: headers, one section and a certificate table at
    /// the end
    fn image(magic: u16) -> Vec<u8> {
        let dirs = dirs(magic);
        let opt_size = dirs + 16 * SIZEOF_DATA_DIRECTORY;
        let mut img = vec![0u8; HEADERS + SECTION];
        img[..2].copy_from_slice(b"MZ");
        LittleEndian::write_u32(&mut img[0x3c..], PE_OFFSET as u32);
        img[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
        LittleEndian::write_u16(&mut img[PE_OFFSET + 4..], 0x8664);
        LittleEndian::write_u16(&mut img[PE_OFFSET + 6..], 1);
        LittleEndian::write_u16(&mut img[PE_OFFSET + 20..], opt_size as u16);
        LittleEndian::write_u16(&mut img[OPT..], magic);
        LittleEndian::write_u32(&mut img[OPT + 32..], 0x200);
        LittleEndian::write_u32(&mut img[OPT + 36..], 0x200);
        LittleEndian::write_u32(&mut img[OPT + 56..], 0x1000);
        LittleEndian::write_u32(&mut img[OPT + 60..], HEADERS as u32);
        LittleEndian::write_u32(&mut img[OPT + 64..], 0xdead_beef);
        LittleEndian::write_u32(&mut img[OPT + dirs - 4..], 16);

        let section = OPT + opt_size;
        img[section..section + 5].copy_from_slice(b".text");
        LittleEndian::write_u32(&mut img[section + 8..], SECTION as u32);
        LittleEndian::write_u32(&mut img[section + 12..], 0x1000);
        LittleEndian::write_u32(&mut img[section + 16..], SECTION as u32);
        LittleEndian::write_u32(&mut img[section + 20..], HEADERS as u32);
        for (i, b) in img[HEADERS..].iter_mut().enumerate() {
            *b = i as u8;
        }

        let dir = cert_dir(magic);
        LittleEndian::write_u32(&mut img[dir..], (HEADERS + SECTION) as u32);
        LittleEndian::write_u32(&mut img[dir + 4..], CERT_TABLE as u32);
        // WIN_CERT_REVISION_2_0, WIN_CERT_TYPE_PKCS_SIGNED_DATA
        let mut cert = vec![0u8; CERT_TABLE];
        LittleEndian::write_u32(&mut cert[..], CERT_TABLE as u32);
        LittleEndian::write_u16(&mut cert[4..], 0x0200);
        LittleEndian::write_u16(&mut cert[6..], 0x0002);
        cert[8..].fill(0xcc);
        img.extend_from_slice(&cert);
        img
    }

    #[test]
    fn test_pe32_plus_digest_ranges() {
        let img = image(MAGIC_64);
        let dir = cert_dir(MAGIC_64);
        let expected = sha256(
            &[
                &img[..OPT + 64],
                &img[OPT + 68..dir],
                &img[dir + 8..HEADERS],
                &img[HEADERS..HEADERS + SECTION],
            ]
            .concat(),
        );
        assert_eq!(authenticode_sha256(&img).unwrap(), expected); //#[allow_ci]
    }

    #[test]
    fn test_excluded_fields_do_not_matter() {
        let img = image(MAGIC_32);
        let base = authenticode_sha256(&img).unwrap(); //#[allow_ci]

        // Checksum
        let mut changed = img.clone();
        changed[OPT + 64] ^= 0xff;
        assert_eq!(authenticode_sha256(&changed).unwrap(), base); //#[allow_ci]

        // Certificate table contents
        let mut changed = img.clone();
        let last = changed.len() - 1;
        changed[last] ^= 0xff;
        assert_eq!(authenticode_sha256(&changed).unwrap(), base); //#[allow_ci]

        // Section data
        let mut changed = img;
        changed[HEADERS + 3] ^= 0xff;
        assert_ne!(authenticode_sha256(&changed).unwrap(), base); //#[allow_ci]
    }

    #[test]
    fn test_trailing_data_is_hashed() {
        let mut img = image(MAGIC_64);
        // Drop the certificate table and append unsigned trailing data
        let dir = cert_dir(MAGIC_64);
        img.truncate(HEADERS + SECTION);
        img[dir..dir + 8].fill(0);
        let without = authenticode_sha256(&img).unwrap(); //#[allow_ci]
        img.extend_from_slice(b"trailer");
        assert_ne!(authenticode_sha256(&img).unwrap(), without); //#[allow_ci]
    }

    #[test]
    fn test_rejects_non_pe() {
        assert!(matches!(
            authenticode_sha256(b"#!/bin/sh\n"),
            Err(AuthenticodeError::Parse(_))
        ));
        let img = image(MAGIC_64);
        assert!(authenticode_sha256(&img[..0x90]).is_err());
    }

    #[test]
    fn test_certificate_table_past_the_end() {
        let mut img = image(MAGIC_64);
        let dir = cert_dir(MAGIC_64);
        LittleEndian::write_u32(&mut img[dir + 4..], 0x1000);
        assert!(authenticode_sha256(&img).is_err());
    }
}
