// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet metadata for a packet processing runtime.
//!
//! Packets live in preallocated [`pool`] blocks. Each one carries a
//! descriptor of what the [`engine::parse`] pass found in its frame,
//! computed on first access. The [`runtime`] module brings the
//! subsystems up in a fixed order and tears them down again.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

pub use pktmeta_api as api;

pub mod config;
pub mod engine;
pub mod pool;
pub mod print;
pub mod runtime;
