// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP (RFC 9293).

use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPPROTO_TCP: u8 = 6;

pub const TCP_HDR_SZ: usize = TcpHdrRaw::SIZE;
pub const TCP_HDR_OFFSET_MASK: u8 = 0xF0;
pub const TCP_HDR_OFFSET_SHIFT: u8 = 4;
/// Minimum data offset, in 32-bit words.
pub const TCP_DOFF_MIN: u8 = 5;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub window_size: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl RawHeader for TcpHdrRaw {}

impl TcpHdrRaw {
    /// The data offset field, in 32-bit words.
    pub fn doff(&self) -> u8 {
        (self.offset & TCP_HDR_OFFSET_MASK) >> TCP_HDR_OFFSET_SHIFT
    }

    /// Header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.doff()) * 4
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }
}
