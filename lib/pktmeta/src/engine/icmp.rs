// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ICMP and ICMPv6.
//!
//! Both share the same leading layout; the parser treats the first
//! eight bytes as the header.

use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_ICMPV6: u8 = 58;
pub const ICMP_HDR_SZ: usize = IcmpHdrRaw::SIZE;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct IcmpHdrRaw {
    pub msg_type: u8,
    pub msg_code: u8,
    pub csum: [u8; 2],
    pub rest: [u8; 4],
}

impl RawHeader for IcmpHdrRaw {}
