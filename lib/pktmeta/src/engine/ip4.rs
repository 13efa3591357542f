// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 (RFC 791).

use super::checksum::Checksum;
use super::headers::RawHeader;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_SZ: usize = Ipv4HdrRaw::SIZE;
pub const IPV4_VERSION: u8 = 4;
pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_MASK: u8 = 0xF0;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
/// Minimum value of the IHL field, in 32-bit words.
pub const IPV4_IHL_MIN: u8 = 5;

pub const IPV4_FLAG_DF: u16 = 0x4000;
pub const IPV4_FLAG_MF: u16 = 0x2000;
pub const IPV4_FRAG_OFF_MASK: u16 = 0x1FFF;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl RawHeader for Ipv4HdrRaw {}

impl Ipv4HdrRaw {
    pub fn version(&self) -> u8 {
        (self.ver_hdr_len & IPV4_HDR_VER_MASK) >> IPV4_HDR_VER_SHIFT
    }

    /// The IHL field, in 32-bit words.
    pub fn ihl(&self) -> u8 {
        self.ver_hdr_len & IPV4_HDR_LEN_MASK
    }

    /// Header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ihl()) * 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.total_len)
    }

    fn frag_and_flags(&self) -> u16 {
        u16::from_be_bytes(self.frag_and_flags)
    }

    pub fn more_frags(&self) -> bool {
        self.frag_and_flags() & IPV4_FLAG_MF != 0
    }

    /// Fragment offset in 8-byte units.
    pub fn frag_offset(&self) -> u16 {
        self.frag_and_flags() & IPV4_FRAG_OFF_MASK
    }

    pub fn is_fragment(&self) -> bool {
        self.more_frags() || self.frag_offset() != 0
    }
}

/// Verify the header checksum over the full header, options
/// included.
///
/// Summing a header with its checksum field in place yields all ones
/// when the checksum is correct.
pub fn hdr_csum_ok(hdr: &[u8]) -> bool {
    Checksum::compute(hdr).finalize() == 0xFFFF
}

#[cfg(test)]
mod test {
    use super::*;

    // A captured header from a DNS query.
    const HDR: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8,
        0x61, 0xc0, 0xa8, 0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn fields() {
        let ip = Ipv4HdrRaw::raw_zc(&HDR).unwrap();
        assert_eq!(ip.version(), 4);
        assert_eq!(ip.ihl(), 5);
        assert_eq!(ip.hdr_len(), 20);
        assert_eq!(ip.total_len(), 0x73);
        assert_eq!(ip.proto, 17);
        assert!(!ip.is_fragment());
    }

    #[test]
    fn csum() {
        assert!(hdr_csum_ok(&HDR));
        let mut bad = HDR;
        bad[8] = 0x3F;
        assert!(!hdr_csum_ok(&bad));
    }

    #[test]
    fn frag_bits() {
        let mut hdr = HDR;
        hdr[6] = 0x20;
        hdr[7] = 0x00;
        let ip = Ipv4HdrRaw::raw_zc(&hdr).unwrap();
        assert!(ip.more_frags());
        assert_eq!(ip.frag_offset(), 0);
        assert!(ip.is_fragment());

        hdr[6] = 0x00;
        hdr[7] = 0xB9;
        let ip = Ipv4HdrRaw::raw_zc(&hdr).unwrap();
        assert!(!ip.more_frags());
        assert_eq!(ip.frag_offset(), 0xB9);
        assert!(ip.is_fragment());
    }
}
