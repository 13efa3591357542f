// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv6 (RFC 8200) and the extension headers the parser walks.

use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV6_HDR_SZ: usize = Ipv6HdrRaw::SIZE;
pub const IPV6_VERSION: u8 = 6;

pub const IPPROTO_HOPOPTS: u8 = 0;
pub const IPPROTO_ROUTING: u8 = 43;
pub const IPPROTO_FRAGMENT: u8 = 44;
pub const IPPROTO_NONXT: u8 = 59;
pub const IPPROTO_DSTOPTS: u8 = 60;

/// The smallest extension header, and the granularity of their length
/// field.
pub const IPV6_EXT_HDR_UNIT: usize = 8;
pub const IPV6_FRAG_HDR_SZ: usize = Ipv6FragHdrRaw::SIZE;

pub const IPV6_FRAG_OFF_MASK: u16 = 0xFFF8;
pub const IPV6_FRAG_OFF_SHIFT: u16 = 3;
pub const IPV6_FRAG_MF: u16 = 0x0001;

/// Is `proto` one of the extension headers walked before the upper
/// layer header?
pub const fn is_ext_hdr(proto: u8) -> bool {
    matches!(
        proto,
        IPPROTO_HOPOPTS | IPPROTO_ROUTING | IPPROTO_FRAGMENT | IPPROTO_DSTOPTS
    )
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vsn_class_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl RawHeader for Ipv6HdrRaw {}

impl Ipv6HdrRaw {
    pub fn version(&self) -> u8 {
        self.vsn_class_flow[0] >> 4
    }

    pub fn payload_len(&self) -> u16 {
        u16::from_be_bytes(self.payload_len)
    }
}

/// The two leading bytes common to Hop-by-Hop, Routing and
/// Destination Options headers.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv6ExtHdrRaw {
    pub next_hdr: u8,
    pub hdr_ext_len: u8,
}

impl RawHeader for Ipv6ExtHdrRaw {}

impl Ipv6ExtHdrRaw {
    /// Length of the whole extension header in bytes.
    pub fn len(&self) -> usize {
        IPV6_EXT_HDR_UNIT * (usize::from(self.hdr_ext_len) + 1)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv6FragHdrRaw {
    pub next_hdr: u8,
    pub reserved: u8,
    pub frag_off_m: [u8; 2],
    pub ident: [u8; 4],
}

impl RawHeader for Ipv6FragHdrRaw {}

impl Ipv6FragHdrRaw {
    /// Fragment offset in 8-byte units.
    pub fn frag_offset(&self) -> u16 {
        (u16::from_be_bytes(self.frag_off_m) & IPV6_FRAG_OFF_MASK)
            >> IPV6_FRAG_OFF_SHIFT
    }

    pub fn more_frags(&self) -> bool {
        u16::from_be_bytes(self.frag_off_m) & IPV6_FRAG_MF != 0
    }
}
