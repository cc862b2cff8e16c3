// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
    str::FromStr,
};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid attribute word '{0}'")]
pub struct AttributesParseError(String);

/// The 32-bit attribute word attached to every UEFI variable
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct VariableAttributes(u32);

impl VariableAttributes {
    pub const NON_VOLATILE: Self = Self(0x0000_0001);
    pub const BOOTSERVICE_ACCESS: Self = Self(0x0000_0002);
    pub const RUNTIME_ACCESS: Self = Self(0x0000_0004);
    pub const HARDWARE_ERROR_RECORD: Self = Self(0x0000_0008);
    pub const AUTHENTICATED_WRITE_ACCESS: Self = Self(0x0000_0010);
    pub const TIME_BASED_AUTHENTICATED_WRITE_ACCESS: Self = Self(0x0000_0020);
    pub const APPEND_WRITE: Self = Self(0x0000_0040);

    /// NV | BS | RT | time-based authenticated write, the word used for
    /// PK, KEK, db, dbx and dbt
    pub const AUTHENTICATED_DATABASE: Self = Self(0x0000_0027);
    /// NV | BS, used by shim for MokList
    pub const BOOT_NON_VOLATILE: Self = Self(0x0000_0003);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_time_based(self) -> bool {
        self.contains(Self::TIME_BASED_AUTHENTICATED_WRITE_ACCESS)
    }

    pub const fn is_append(self) -> bool {
        self.contains(Self::APPEND_WRITE)
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl BitOr for VariableAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for VariableAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for VariableAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(VariableAttributes, &str); 7] = [
            (VariableAttributes::NON_VOLATILE, "NV"),
            (VariableAttributes::BOOTSERVICE_ACCESS, "BS"),
            (VariableAttributes::RUNTIME_ACCESS, "RT"),
            (VariableAttributes::HARDWARE_ERROR_RECORD, "HR"),
            (VariableAttributes::AUTHENTICATED_WRITE_ACCESS, "AW"),
            (VariableAttributes::TIME_BASED_AUTHENTICATED_WRITE_ACCESS, "AT"),
            (VariableAttributes::APPEND_WRITE, "AP"),
        ];

        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        write!(f, "{:#010x}", self.0)?;
        if !names.is_empty() {
            write!(f, " ({})", names.join("|"))?;
        }
        Ok(())
    }
}

impl FromStr for VariableAttributes {
    type Err = AttributesParseError;

    /// Accepts a decimal or `0x` prefixed hexadecimal word
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let parsed = match t.strip_prefix("0x").or(t.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => t.parse::<u32>(),
        };
        parsed
            .map(Self)
            .map_err(|_| AttributesParseError(s.to_string()))
    }
}
