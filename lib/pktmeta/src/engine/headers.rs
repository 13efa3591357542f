// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Bounds-checked access to the header bytes of a frame.
//!
//! Every header the parser looks at goes through a [`PacketReader`],
//! which hands out slices of the frame only when they fit entirely
//! inside the declared length. Raw header types are overlaid on those
//! slices with `zerocopy`, so no header byte is ever copied.

use core::mem;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadErr {
    /// The bytes could not be viewed as the requested header type.
    BadLayout,
    /// The reader is already positioned at the end of the frame.
    EndOfPacket,
    /// Fewer bytes remain than were asked for.
    NotEnoughBytes,
    /// A seek went past the end of the frame.
    OutOfRange,
}

pub type ReadResult<T> = core::result::Result<T, ReadErr>;

/// A wire header that may be overlaid directly on frame bytes.
///
/// All implementors are `#[repr(C)]` and made only of byte arrays, so
/// any alignment and any bit pattern is acceptable.
pub trait RawHeader:
    FromBytes + KnownLayout + Immutable + Unaligned + Sized
{
    const SIZE: usize = mem::size_of::<Self>();

    /// View `src` as this header. `src` must be exactly `SIZE` bytes.
    #[inline]
    fn raw_zc(src: &[u8]) -> ReadResult<&Self> {
        debug_assert_eq!(src.len(), Self::SIZE);
        Self::ref_from_bytes(src).map_err(|_| ReadErr::BadLayout)
    }
}

/// A forward-only cursor over the first `len` bytes of a frame.
#[derive(Debug)]
pub struct PacketReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current position, relative to the start of the frame.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Move forward by `amount` bytes.
    ///
    /// # Errors
    ///
    /// [`ReadErr::OutOfRange`] if the new position would be past the
    /// end of the frame. The position is unchanged on error.
    pub fn seek(&mut self, amount: usize) -> ReadResult<()> {
        match self.pos.checked_add(amount) {
            Some(p) if p <= self.bytes.len() => {
                self.pos = p;
                Ok(())
            }
            _ => Err(ReadErr::OutOfRange),
        }
    }

    /// Return the next `len` bytes and advance past them.
    pub fn slice(&mut self, len: usize) -> ReadResult<&'a [u8]> {
        if self.pos == self.bytes.len() && len > 0 {
            return Err(ReadErr::EndOfPacket);
        }

        if len > self.remaining() {
            return Err(ReadErr::NotEnoughBytes);
        }

        let ret = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(ret)
    }

    /// Return the next `len` bytes without advancing.
    pub fn peek(&self, len: usize) -> ReadResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(ReadErr::NotEnoughBytes);
        }

        Ok(&self.bytes[self.pos..self.pos + len])
    }

    /// Read the next header of type `H` and advance past it.
    #[inline]
    pub fn hdr<H: RawHeader>(&mut self) -> ReadResult<&'a H> {
        let start = self.pos;
        let src = self.slice(H::SIZE)?;
        H::raw_zc(src).inspect_err(|_| self.pos = start)
    }

    /// A reader limited to `[pos, pos + len)` of this one, positioned
    /// at its start. Positions reported by the sub-reader remain
    /// frame relative.
    pub fn window(&self, len: usize) -> ReadResult<PacketReader<'a>> {
        let end = self.pos.checked_add(len).ok_or(ReadErr::OutOfRange)?;
        if end > self.bytes.len() {
            return Err(ReadErr::OutOfRange);
        }

        Ok(PacketReader { bytes: &self.bytes[..end], pos: self.pos })
    }
}
