// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ARP (RFC 826).

use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// Size of the fixed part, before the variable length addresses.
pub const ARP_HDR_SZ: usize = ArpHdrRaw::SIZE;

/// Size of an Ethernet/IPv4 ARP message.
pub const ARP_ETH_IPV4_SZ: usize = 28;

pub const ARP_HTYPE_ETHERNET: u16 = 1;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct ArpHdrRaw {
    pub htype: [u8; 2],
    pub ptype: [u8; 2],
    pub hlen: u8,
    pub plen: u8,
    pub op: [u8; 2],
}

impl RawHeader for ArpHdrRaw {}

impl ArpHdrRaw {
    pub fn htype(&self) -> u16 {
        u16::from_be_bytes(self.htype)
    }

    pub fn ptype(&self) -> u16 {
        u16::from_be_bytes(self.ptype)
    }

    pub fn op(&self) -> u16 {
        u16::from_be_bytes(self.op)
    }

    /// Total message length: the fixed part plus sender and target
    /// hardware and protocol addresses.
    pub fn msg_len(&self) -> usize {
        ARP_HDR_SZ + 2 * (usize::from(self.hlen) + usize::from(self.plen))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eth_ipv4_len() {
        let arp = ArpHdrRaw {
            htype: ARP_HTYPE_ETHERNET.to_be_bytes(),
            ptype: [0x08, 0x00],
            hlen: 6,
            plen: 4,
            op: [0, 1],
        };
        assert_eq!(arp.msg_len(), ARP_ETH_IPV4_SZ);
        assert_eq!(arp.op(), 1);
    }
}
