// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Build well-formed frames, with correct checksums, for tests.
//!
//! Headers come from the engine's raw header layouts; checksums are
//! filled in by smoltcp so they are computed independently of the
//! engine's own checksum code.

use pktmeta::engine::ether::ETHER_TYPE_IPV4;
use pktmeta::engine::ether::ETHER_TYPE_IPV6;
use pktmeta::engine::ether::EtherHdrRaw;
use pktmeta::engine::ether::VlanTagRaw;
use pktmeta::engine::headers::RawHeader;
use pktmeta::engine::icmp::IPPROTO_ICMP;
use pktmeta::engine::icmp::IPPROTO_ICMPV6;
use pktmeta::engine::icmp::IcmpHdrRaw;
use pktmeta::engine::ip6::IPPROTO_FRAGMENT;
use pktmeta::engine::sctp::IPPROTO_SCTP;
use pktmeta::engine::sctp::SctpHdrRaw;
use pktmeta::engine::tcp::IPPROTO_TCP;
use pktmeta::engine::tcp::TcpHdrRaw;
use pktmeta::engine::udp::IPPROTO_UDP;
use pktmeta::engine::udp::UdpHdrRaw;
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv4Repr;
use smoltcp::wire::Ipv6Address;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::Ipv6Repr;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::UdpPacket;
use zerocopy::IntoBytes;

pub const SRC_MAC: [u8; 6] = [0xa8, 0x40, 0x25, 0x00, 0x00, 0x01];
pub const DST_MAC: [u8; 6] = [0xa8, 0x40, 0x25, 0x00, 0x00, 0x02];
pub const SRC_IP4: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
pub const DST_IP4: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
pub const SRC_IP6: Ipv6Address =
    Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);
pub const DST_IP6: Ipv6Address =
    Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 2);

/// The upper layer of a built frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum L4 {
    Udp { src: u16, dst: u16 },
    /// `opts` bytes of NOP options, a multiple of 4.
    Tcp { src: u16, dst: u16, opts: usize },
    Icmp,
    Sctp,
    /// No L4 header; the payload follows L3 under this protocol.
    Raw(u8),
}

impl L4 {
    fn proto(&self, v6: bool) -> u8 {
        match self {
            Self::Udp { .. } => IPPROTO_UDP,
            Self::Tcp { .. } => IPPROTO_TCP,
            Self::Icmp if v6 => IPPROTO_ICMPV6,
            Self::Icmp => IPPROTO_ICMP,
            Self::Sctp => IPPROTO_SCTP,
            Self::Raw(p) => *p,
        }
    }

    /// Length of the L4 header this produces.
    pub fn hdr_len(&self) -> usize {
        match self {
            Self::Udp { .. } => UdpHdrRaw::SIZE,
            Self::Tcp { opts, .. } => TcpHdrRaw::SIZE + opts,
            Self::Icmp => IcmpHdrRaw::SIZE,
            Self::Sctp => SctpHdrRaw::SIZE,
            Self::Raw(_) => 0,
        }
    }
}

/// An IPv6 extension header to insert between the fixed header and
/// the upper layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ipv6Ext {
    /// Hop-by-Hop, Routing or Destination Options, `units` 8-byte
    /// units long.
    Opts { proto: u8, units: u8 },
    /// A fragment header at the given offset, in 8-byte units.
    Frag { offset: u16, more: bool },
}

impl Ipv6Ext {
    fn proto(&self) -> u8 {
        match self {
            Self::Opts { proto, .. } => *proto,
            Self::Frag { .. } => IPPROTO_FRAGMENT,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Opts { units, .. } => 8 * usize::from(*units),
            Self::Frag { .. } => 8,
        }
    }

    fn emit(&self, next: u8, out: &mut Vec<u8>) {
        match self {
            Self::Opts { units, .. } => {
                let start = out.len();
                out.push(next);
                out.push(units - 1);
                // PadN filling the rest of the header.
                let pad = self.len() - 2;
                out.push(1);
                out.push((pad - 2) as u8);
                out.resize(start + self.len(), 0);
            }
            Self::Frag { offset, more } => {
                out.push(next);
                out.push(0);
                let off_m = (offset << 3) | u16::from(*more);
                out.extend_from_slice(&off_m.to_be_bytes());
                out.extend_from_slice(&0x1234_5678u32.to_be_bytes());
            }
        }
    }
}

#[derive(Clone, Debug)]
enum L3 {
    V4,
    V6 { exts: Vec<Ipv6Ext> },
}

/// Builds Ethernet frames layer by layer.
#[derive(Clone, Debug)]
pub struct FrameBuilder {
    tags: Vec<(u16, u16)>,
    l3: L3,
    l4: L4,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn ipv4(l4: L4) -> Self {
        Self { tags: vec![], l3: L3::V4, l4, payload: vec![] }
    }

    pub fn ipv6(l4: L4) -> Self {
        Self { tags: vec![], l3: L3::V6 { exts: vec![] }, l4, payload: vec![] }
    }

    pub fn udp4() -> Self {
        Self::ipv4(L4::Udp { src: 49152, dst: 53 })
    }

    pub fn tcp4() -> Self {
        Self::ipv4(L4::Tcp { src: 49152, dst: 80, opts: 0 })
    }

    pub fn udp6() -> Self {
        Self::ipv6(L4::Udp { src: 49152, dst: 53 })
    }

    /// Add a VLAN tag. Tags are emitted outermost first.
    pub fn vlan(mut self, tpid: u16, tci: u16) -> Self {
        self.tags.push((tpid, tci));
        self
    }

    /// Append an IPv6 extension header. Ignored for IPv4.
    pub fn ext(mut self, ext: Ipv6Ext) -> Self {
        if let L3::V6 { exts } = &mut self.l3 {
            exts.push(ext);
        }
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Bytes of L2 header, tags included.
    pub fn l2_len(&self) -> usize {
        EtherHdrRaw::SIZE + self.tags.len() * VlanTagRaw::SIZE
    }

    /// Bytes of L3 header, extension headers included.
    pub fn l3_hdr_len(&self) -> usize {
        match &self.l3 {
            L3::V4 => 20,
            L3::V6 { exts } => 40 + exts.iter().map(|e| e.len()).sum::<usize>(),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let v6 = matches!(self.l3, L3::V6 { .. });
        let (src, dst) = if v6 {
            (IpAddress::Ipv6(SRC_IP6), IpAddress::Ipv6(DST_IP6))
        } else {
            (IpAddress::Ipv4(SRC_IP4), IpAddress::Ipv4(DST_IP4))
        };

        let l4 = self.build_l4(&src, &dst);
        let mut frame = self.build_l2();

        match &self.l3 {
            L3::V4 => {
                let repr = Ipv4Repr {
                    src_addr: SRC_IP4,
                    dst_addr: DST_IP4,
                    next_header: IpProtocol::from(self.l4.proto(false)),
                    payload_len: l4.len(),
                    hop_limit: 64,
                };
                let mut hdr = vec![0u8; repr.buffer_len()];
                repr.emit(
                    &mut Ipv4Packet::new_unchecked(&mut hdr[..]),
                    &ChecksumCapabilities::default(),
                );
                frame.extend(hdr);
            }

            L3::V6 { exts } => {
                let mut ext_bytes = vec![];
                for (i, ext) in exts.iter().enumerate() {
                    let next = exts
                        .get(i + 1)
                        .map(Ipv6Ext::proto)
                        .unwrap_or(self.l4.proto(true));
                    ext.emit(next, &mut ext_bytes);
                }

                let first =
                    exts.first().map(Ipv6Ext::proto).unwrap_or(self.l4.proto(true));
                let repr = Ipv6Repr {
                    src_addr: SRC_IP6,
                    dst_addr: DST_IP6,
                    next_header: IpProtocol::from(first),
                    payload_len: ext_bytes.len() + l4.len(),
                    hop_limit: 64,
                };
                let mut hdr = vec![0u8; repr.buffer_len()];
                repr.emit(&mut Ipv6Packet::new_unchecked(&mut hdr[..]));
                frame.extend(hdr);
                frame.extend(ext_bytes);
            }
        }

        frame.extend(l4);
        frame
    }

    fn build_l2(&self) -> Vec<u8> {
        let inner = match self.l3 {
            L3::V4 => ETHER_TYPE_IPV4,
            L3::V6 { .. } => ETHER_TYPE_IPV6,
        };
        let first = self.tags.first().map(|t| t.0).unwrap_or(inner);

        let eth = EtherHdrRaw {
            dst: DST_MAC,
            src: SRC_MAC,
            ether_type: first.to_be_bytes(),
        };
        let mut out = eth.as_bytes().to_vec();

        for (i, (_, tci)) in self.tags.iter().enumerate() {
            let next = self.tags.get(i + 1).map(|t| t.0).unwrap_or(inner);
            let tag =
                VlanTagRaw { tci: tci.to_be_bytes(), ether_type: next.to_be_bytes() };
            out.extend_from_slice(tag.as_bytes());
        }
        out
    }

    fn build_l4(&self, src: &IpAddress, dst: &IpAddress) -> Vec<u8> {
        let body = &self.payload;
        match &self.l4 {
            L4::Udp { src: sport, dst: dport } => {
                let len = (UdpHdrRaw::SIZE + body.len()) as u16;
                let udp = UdpHdrRaw {
                    src_port: sport.to_be_bytes(),
                    dst_port: dport.to_be_bytes(),
                    length: len.to_be_bytes(),
                    csum: [0; 2],
                };
                let mut out = udp.as_bytes().to_vec();
                out.extend_from_slice(body);
                UdpPacket::new_unchecked(&mut out[..]).fill_checksum(src, dst);
                out
            }

            L4::Tcp { src: sport, dst: dport, opts } => {
                assert_eq!(opts % 4, 0, "TCP options must be word aligned");
                let doff = ((TcpHdrRaw::SIZE + opts) / 4) as u8;
                let tcp = TcpHdrRaw {
                    src_port: sport.to_be_bytes(),
                    dst_port: dport.to_be_bytes(),
                    seq: 1u32.to_be_bytes(),
                    ack: 0u32.to_be_bytes(),
                    offset: doff << 4,
                    // SYN
                    flags: 0x02,
                    window_size: 64240u16.to_be_bytes(),
                    csum: [0; 2],
                    urg: [0; 2],
                };
                let mut out = tcp.as_bytes().to_vec();
                out.resize(out.len() + opts, 0x01);
                out.extend_from_slice(body);
                TcpPacket::new_unchecked(&mut out[..]).fill_checksum(src, dst);
                out
            }

            L4::Icmp => {
                // Echo request.
                let msg_type =
                    if matches!(src, IpAddress::Ipv6(_)) { 128 } else { 8 };
                let icmp = IcmpHdrRaw {
                    msg_type,
                    msg_code: 0,
                    csum: [0; 2],
                    rest: [0, 1, 0, 1],
                };
                let mut out = icmp.as_bytes().to_vec();
                out.extend_from_slice(body);
                out
            }

            L4::Sctp => {
                let sctp = SctpHdrRaw {
                    src_port: 5000u16.to_be_bytes(),
                    dst_port: 5001u16.to_be_bytes(),
                    vtag: [0; 4],
                    csum: [0; 4],
                };
                let mut out = sctp.as_bytes().to_vec();
                out.extend_from_slice(body);
                out
            }

            L4::Raw(_) => body.clone(),
        }
    }
}
