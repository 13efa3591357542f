// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The three 32-bit flag records carried by every packet descriptor.
//!
//! Each record is a `bitflags` type: the named constants give the
//! per-fact view and [`InputFlags::bits`] (and friends) give the raw
//! word used for bulk compare, copy and reset. Bit positions are part
//! of the descriptor layout but carry no wire meaning.

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
/// Facts detected while parsing a frame.
///
/// Before a parse has run, [`InputFlags::UNPARSED`] is the only bit
/// with meaning; every other bit must be treated as garbage.
pub struct InputFlags: u32 {
    /// The parser has not run since construction or the last reset.
    const UNPARSED  = 1 << 0;
    /// An L2 header is present; `l2_offset` is valid.
    const L2        = 1 << 1;
    /// An L3 header is present; `l3_offset` is valid.
    const L3        = 1 << 2;
    /// An L4 header is present; `l4_offset` is valid.
    const L4        = 1 << 3;

    const ETH       = 1 << 4;
    /// Frame is longer than a standard untagged Ethernet frame.
    const JUMBO     = 1 << 5;
    /// At least one VLAN tag.
    const VLAN      = 1 << 6;
    /// Stacked (S-tag + C-tag) VLAN tagging.
    const VLAN_QINQ = 1 << 7;
    /// IEEE 802.3 length frame, possibly with an LLC/SNAP header.
    const SNAP      = 1 << 8;
    const ARP       = 1 << 9;

    const IPV4      = 1 << 10;
    const IPV6      = 1 << 11;
    /// IPv4 fragment, or IPv6 fragment extension header.
    const IPFRAG    = 1 << 12;
    /// IPv4 header options, or IPv6 extension headers.
    const IPOPT     = 1 << 13;
    /// AH or ESP follows the IP header.
    const IPSEC     = 1 << 14;

    const UDP       = 1 << 15;
    const TCP       = 1 << 16;
    const TCPOPT    = 1 << 17;
    const SCTP      = 1 << 18;
    const ICMP      = 1 << 19;
}
}

impl InputFlags {
    /// Return true when the parser has not yet run.
    pub const fn is_unparsed(&self) -> bool {
        self.contains(Self::UNPARSED)
    }
}

bitflags! {
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
/// Validation failures. These are sticky: only a full re-parse clears
/// them.
pub struct ErrorFlags: u32 {
    /// Error raised by the application rather than the parser.
    const APP_ERROR = 1 << 0;
    /// A header ran past the frame's declared length.
    const FRAME_LEN = 1 << 1;
    /// An 802.3 length field exceeds the bytes present.
    const SNAP_LEN  = 1 << 2;
    const L2_CHKSUM = 1 << 3;
    const IP_ERR    = 1 << 4;
    const TCP_ERR   = 1 << 5;
    const UDP_ERR   = 1 << 6;
}
}

bitflags! {
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
/// Egress checksum override intent, consumed by the transmit path.
///
/// The receive side never reads these bits.
pub struct OutputFlags: u32 {
    /// `L3_CHKSUM` holds a caller decision.
    const L3_CHKSUM_SET = 1 << 0;
    /// Insert (set) or skip (clear) the L3 checksum.
    const L3_CHKSUM     = 1 << 1;
    /// `L4_CHKSUM` holds a caller decision.
    const L4_CHKSUM_SET = 1 << 2;
    /// Insert (set) or skip (clear) the L4 checksum.
    const L4_CHKSUM     = 1 << 3;
}
}

impl OutputFlags {
    /// Record whether the transmit path should insert the L3 checksum.
    pub fn set_l3_chksum(&mut self, insert: bool) {
        self.insert(Self::L3_CHKSUM_SET);
        self.set(Self::L3_CHKSUM, insert);
    }

    /// Record whether the transmit path should insert the L4 checksum.
    pub fn set_l4_chksum(&mut self, insert: bool) {
        self.insert(Self::L4_CHKSUM_SET);
        self.set(Self::L4_CHKSUM, insert);
    }

    /// The L3 override, if one was set.
    pub fn l3_chksum(&self) -> Option<bool> {
        self.contains(Self::L3_CHKSUM_SET)
            .then(|| self.contains(Self::L3_CHKSUM))
    }

    /// The L4 override, if one was set.
    pub fn l4_chksum(&self) -> Option<bool> {
        self.contains(Self::L4_CHKSUM_SET)
            .then(|| self.contains(Self::L4_CHKSUM))
    }
}
