// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the packet metadata library, its admin tool,
//! and anything consuming parsed packets.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

use core::fmt;
use core::fmt::Display;
use core::num::NonZeroU32;
use serde::Deserialize;
use serde::Serialize;

pub mod flags;
pub mod stage;

pub use flags::*;
pub use stage::*;

/// The overall version of the API. Bump this whenever a type in this
/// crate changes shape, as the descriptor layout is shared with
/// consumers that may be built separately.
pub const API_VERSION: u64 = 1;

/// Identifier of a buffer pool within one runtime instance.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
    PartialOrd, Serialize,
)]
pub struct PoolId(pub u16);

impl Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pool{}", self.0)
    }
}

/// Opaque handle of the ingress interface that produced a frame.
///
/// The value zero is reserved, which lets `Option<PktioId>` occupy
/// the same four bytes as the handle itself.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct PktioId(NonZeroU32);

impl PktioId {
    pub const fn new(val: u32) -> Option<Self> {
        match NonZeroU32::new(val) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl Display for PktioId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pktio{}", self.0)
    }
}
