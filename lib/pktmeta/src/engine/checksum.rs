// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The internet checksum (RFC 1071).
//!
//! The parser itself only uses this for the opt-in IPv4 header check.
//! It is public so that callers applying their own L4 checksum policy
//! can reuse it against the offsets and lengths the parser records.
//!
//! Words are summed in native byte order. The bytes being summed are
//! in network order, and a sum written back with `to_ne_bytes()` lands
//! in network order again, so no byte swapping is ever needed (RFC
//! 1071 §1.B).

/// A rolling one's complement sum, with carries folded only when the
/// sum is finalized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a sum over `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut csum = Self::new();
        csum.add_bytes(bytes);
        csum
    }

    /// Add `bytes` to the sum.
    ///
    /// An odd trailing byte is padded with a zero byte, so only the
    /// final call on a given buffer may pass an odd length.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.add_word(u16::from_ne_bytes([w[0], w[1]]));
        }

        if let [last] = words.remainder() {
            self.add_word(u16::from_ne_bytes([*last, 0]));
        }
    }

    #[inline]
    fn add_word(&mut self, word: u16) {
        // Fold early so long buffers can never overflow the u32.
        if self.inner > 0xFFFF_0000 {
            self.fold();
        }
        self.inner += u32::from(word);
    }

    fn fold(&mut self) {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }
    }

    /// Fold all carries and return the 16-bit one's complement sum.
    pub fn finalize(&mut self) -> u16 {
        self.fold();
        self.inner as u16
    }

    /// The bytes to store in a header checksum field.
    pub fn header_bytes(mut self) -> [u8; 2] {
        (!self.finalize()).to_ne_bytes()
    }
}
