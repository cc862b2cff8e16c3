// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

pub mod attributes;
pub mod auth;
pub mod authenticode;
pub mod crypto;
pub mod database;
pub mod error;
pub mod esl;
pub mod guid;
pub mod status;
pub mod store;
pub mod time;
pub mod update;
pub mod variables;

#[macro_use]
extern crate static_assertions;
