// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ethernet II, 802.1Q/802.1ad tags and 802.2 LLC/SNAP.

use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const ETHER_ADDR_LEN: usize = 6;
pub const ETHER_HDR_SZ: usize = EtherHdrRaw::SIZE;

/// Largest untagged frame, header included, FCS excluded.
pub const ETHER_MAX_LEN: usize = 1514;

/// Type/length values below this are 802.3 lengths, not ethertypes.
pub const ETHER_TYPE_MIN: u16 = 0x0600;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
/// 802.1Q customer tag.
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
/// 802.1ad service tag.
pub const ETHER_TYPE_QINQ: u16 = 0x88A8;
/// Pre-standard service tag still emitted by some switches.
pub const ETHER_TYPE_QINQ_OLD: u16 = 0x9100;

pub const VLAN_TAG_SZ: usize = VlanTagRaw::SIZE;
pub const VLAN_MAX_TAGS: usize = 2;

pub const LLC_SNAP_SZ: usize = LlcSnapRaw::SIZE;
/// DSAP, SSAP and control: the 802.2 header without SNAP.
pub const LLC_HDR_SZ: usize = 3;
pub const LLC_SAP_SNAP: u8 = 0xAA;
pub const LLC_CTRL_UI: u8 = 0x03;

#[inline]
pub const fn is_vlan_tpid(ether_type: u16) -> bool {
    matches!(ether_type, ETHER_TYPE_VLAN | ETHER_TYPE_QINQ | ETHER_TYPE_QINQ_OLD)
}

/// Does this TPID denote a service (outer) tag?
#[inline]
pub const fn is_service_tpid(ether_type: u16) -> bool {
    matches!(ether_type, ETHER_TYPE_QINQ | ETHER_TYPE_QINQ_OLD)
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct EtherHdrRaw {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub ether_type: [u8; 2],
}

impl RawHeader for EtherHdrRaw {}

impl EtherHdrRaw {
    /// The type/length field: an ethertype, or an 802.3 length when
    /// less than [`ETHER_TYPE_MIN`].
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// The four bytes that follow a VLAN TPID: the tag control
/// information and the encapsulated type/length.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct VlanTagRaw {
    pub tci: [u8; 2],
    pub ether_type: [u8; 2],
}

impl RawHeader for VlanTagRaw {}

impl VlanTagRaw {
    pub fn tci(&self) -> u16 {
        u16::from_be_bytes(self.tci)
    }

    pub fn vid(&self) -> u16 {
        self.tci() & 0x0FFF
    }

    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// An 802.2 LLC header followed by a SNAP extension.
/// Does this 802.2 header announce a SNAP extension?
#[inline]
pub fn is_snap_llc(llc: &[u8]) -> bool {
    llc.starts_with(&[LLC_SAP_SNAP, LLC_SAP_SNAP, LLC_CTRL_UI])
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct LlcSnapRaw {
    pub dsap: u8,
    pub ssap: u8,
    pub ctrl: u8,
    pub oui: [u8; 3],
    pub ether_type: [u8; 2],
}

impl RawHeader for LlcSnapRaw {}

impl LlcSnapRaw {
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}
