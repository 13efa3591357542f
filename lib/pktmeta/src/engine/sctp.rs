// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! SCTP common header (RFC 9260).

use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPPROTO_SCTP: u8 = 132;
pub const SCTP_HDR_SZ: usize = SctpHdrRaw::SIZE;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct SctpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub vtag: [u8; 4],
    pub csum: [u8; 4],
}

impl RawHeader for SctpHdrRaw {}
