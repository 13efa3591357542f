// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The protocol parser.
//!
//! Parsing walks a frame once, L2 to L4, and records what it finds in
//! the packet's [`PacketMd`]. Malformed input never produces a Rust
//! error: the matching error bit is set, parsing of that layer stops,
//! and everything derived from earlier layers stays valid. Every read
//! goes through a [`PacketReader`] limited to the declared length, so
//! no layer can look past it.
//!
//! Checksums are not verified unless [`ParseOptions`] asks for the
//! IPv4 header check. The offsets, lengths and protocol numbers the
//! parser records are what a caller needs to apply its own L4 policy.

use super::IPPROTO_AH;
use super::IPPROTO_ESP;
use super::arp::ArpHdrRaw;
use super::ether::ETHER_MAX_LEN;
use super::ether::ETHER_TYPE_ARP;
use super::ether::ETHER_TYPE_IPV4;
use super::ether::ETHER_TYPE_IPV6;
use super::ether::ETHER_TYPE_MIN;
use super::ether::EtherHdrRaw;
use super::ether::LLC_HDR_SZ;
use super::ether::LLC_SNAP_SZ;
use super::ether::LlcSnapRaw;
use super::ether::VLAN_MAX_TAGS;
use super::ether::VLAN_TAG_SZ;
use super::ether::VlanTagRaw;
use super::ether::is_service_tpid;
use super::ether::is_snap_llc;
use super::ether::is_vlan_tpid;
use super::headers::PacketReader;
use super::headers::RawHeader;
use super::icmp::ICMP_HDR_SZ;
use super::icmp::IPPROTO_ICMP;
use super::icmp::IPPROTO_ICMPV6;
use super::ip4;
use super::ip4::IPV4_HDR_SZ;
use super::ip4::IPV4_IHL_MIN;
use super::ip4::IPV4_VERSION;
use super::ip4::Ipv4HdrRaw;
use super::ip6::IPPROTO_FRAGMENT;
use super::ip6::IPPROTO_NONXT;
use super::ip6::IPV6_HDR_SZ;
use super::ip6::IPV6_VERSION;
use super::ip6::Ipv6ExtHdrRaw;
use super::ip6::Ipv6FragHdrRaw;
use super::ip6::Ipv6HdrRaw;
use super::ip6::is_ext_hdr;
use super::packet::Packet;
use super::packet::PacketMd;
use super::sctp::IPPROTO_SCTP;
use super::sctp::SCTP_HDR_SZ;
use super::tcp::IPPROTO_TCP;
use super::tcp::TCP_DOFF_MIN;
use super::tcp::TCP_HDR_SZ;
use super::tcp::TcpHdrRaw;
use super::udp::IPPROTO_UDP;
use super::udp::UDP_HDR_SZ;
use super::udp::UdpHdrRaw;
use pktmeta_api::ErrorFlags;
use pktmeta_api::InputFlags;
use serde::Deserialize;
use serde::Serialize;

/// Default bound on the IPv6 extension header walk.
pub const IPV6_EXT_HDR_LIMIT: u8 = 8;

/// Parser policy knobs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseOptions {
    /// Recompute the IPv4 header checksum and set `IP_ERR` on a
    /// mismatch.
    pub verify_ipv4_checksum: bool,
    /// Most IPv6 extension headers walked before the chain is
    /// declared malformed.
    pub max_ipv6_ext_hdrs: u8,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            verify_ipv4_checksum: false,
            max_ipv6_ext_hdrs: IPV6_EXT_HDR_LIMIT,
        }
    }
}

/// Parse the first `len` bytes of `pkt`'s frame, the L2 header
/// starting at `l2_offset`. Returns true when no error bit was set.
///
/// Calling this again on unmodified bytes produces identical
/// metadata.
pub fn parse(pkt: &mut Packet, len: usize, l2_offset: usize) -> bool {
    pkt.parse(len, l2_offset)
}

/// Parse `frame` into `md`.
///
/// Input and error flags and every parsed scalar are derived from
/// scratch. Output flags, the frame offset, `input` and the user area
/// size are left as they are.
pub fn parse_frame(
    md: &mut PacketMd,
    frame: &[u8],
    len: usize,
    l2_offset: usize,
    opts: &ParseOptions,
) -> bool {
    md.clear_parsed();

    // When nothing can be parsed the payload starts at the L2 start,
    // clamped to the bytes that are actually readable.
    let unparsed = clamp_u32(l2_offset.min(len.min(frame.len())));
    if len > frame.len() {
        md.error_flags |= ErrorFlags::FRAME_LEN;
        md.payload_offset = unparsed;
        return false;
    }

    let mut rdr = PacketReader::new(&frame[..len]);
    if rdr.seek(l2_offset).is_err() {
        md.error_flags |= ErrorFlags::FRAME_LEN;
        md.payload_offset = unparsed;
        return false;
    }

    let mut p = Parser { md: &mut *md, opts };
    p.md.payload_offset = clamp_u32(l2_offset);
    p.run(rdr);
    md.error_flags.is_empty()
}

// Frames come from pool blocks, whose size is a u32.
#[inline]
fn clamp_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

struct Parser<'m> {
    md: &'m mut PacketMd,
    opts: &'m ParseOptions,
}

impl Parser<'_> {
    fn run(&mut self, mut rdr: PacketReader<'_>) {
        let Some(ether_type) = self.parse_l2(&mut rdr) else {
            return;
        };

        let l4 = match ether_type {
            ETHER_TYPE_IPV4 => self.parse_ipv4(&mut rdr),
            ETHER_TYPE_IPV6 => self.parse_ipv6(&mut rdr),
            ETHER_TYPE_ARP => {
                self.parse_arp(&mut rdr);
                None
            }
            _ => None,
        };

        if let Some((proto, l4_rdr)) = l4 {
            self.parse_l4(proto, l4_rdr);
        }
    }

    #[inline]
    fn flag(&mut self, f: InputFlags) {
        self.md.input_flags |= f;
    }

    #[inline]
    fn err(&mut self, e: ErrorFlags) {
        self.md.error_flags |= e;
    }

    #[inline]
    fn payload_at(&mut self, pos: usize) {
        self.md.payload_offset = clamp_u32(pos);
    }

    /// Parse Ethernet, any VLAN tags and LLC/SNAP. Returns the type of
    /// the L3 header, if there is one we can identify.
    fn parse_l2(&mut self, rdr: &mut PacketReader<'_>) -> Option<u16> {
        let l2_start = rdr.pos();
        let Ok(eth) = rdr.hdr::<EtherHdrRaw>() else {
            self.err(ErrorFlags::FRAME_LEN);
            return None;
        };

        self.flag(InputFlags::L2 | InputFlags::ETH);
        self.md.l2_offset = clamp_u32(l2_start);
        self.payload_at(rdr.pos());
        let mut ether_type = eth.ether_type();

        let mut ntags = 0;
        while is_vlan_tpid(ether_type) && ntags < VLAN_MAX_TAGS {
            let Ok(tag) = rdr.hdr::<VlanTagRaw>() else {
                self.err(ErrorFlags::FRAME_LEN);
                return None;
            };

            let tci = u32::from(tag.tci());
            self.flag(InputFlags::VLAN);
            if ntags == 0 && is_service_tpid(ether_type) {
                self.flag(InputFlags::VLAN_QINQ);
                self.md.vlan_s_tag = tci;
            } else if ntags == 0 {
                self.md.vlan_c_tag = tci;
            } else {
                // Second tag: the first one was the outer tag whatever
                // its TPID said.
                if !self.md.input_flags.contains(InputFlags::VLAN_QINQ) {
                    self.md.vlan_s_tag = self.md.vlan_c_tag;
                    self.flag(InputFlags::VLAN_QINQ);
                }
                self.md.vlan_c_tag = tci;
            }

            ether_type = tag.ether_type();
            ntags += 1;
            self.payload_at(rdr.pos());
        }

        if rdr.len() - l2_start > ETHER_MAX_LEN + ntags * VLAN_TAG_SZ {
            self.flag(InputFlags::JUMBO);
        }

        if ether_type < ETHER_TYPE_MIN {
            self.flag(InputFlags::SNAP);
            ether_type = self.parse_llc(rdr, usize::from(ether_type))?;
        }

        self.md.l3_offset = clamp_u32(rdr.pos());
        self.md.l3_protocol = u32::from(ether_type);
        Some(ether_type)
    }

    /// Parse the 802.2 LLC header of an 802.3 frame whose length field
    /// says `pdu_len`. Returns the ethertype carried by a SNAP
    /// extension, leaving `rdr` past it.
    fn parse_llc(
        &mut self,
        rdr: &mut PacketReader<'_>,
        pdu_len: usize,
    ) -> Option<u16> {
        let Ok(mut pdu) = rdr.window(pdu_len) else {
            self.err(ErrorFlags::SNAP_LEN);
            return None;
        };

        let Ok(llc) = pdu.peek(LLC_HDR_SZ) else {
            self.err(ErrorFlags::FRAME_LEN);
            return None;
        };

        // Plain 802.2 LLC carries nothing we can parse further.
        if !is_snap_llc(llc) {
            return None;
        }

        let Ok(snap) = pdu.hdr::<LlcSnapRaw>() else {
            self.err(ErrorFlags::FRAME_LEN);
            return None;
        };

        if rdr.seek(LLC_SNAP_SZ).is_err() {
            self.err(ErrorFlags::FRAME_LEN);
            return None;
        }

        self.payload_at(rdr.pos());
        Some(snap.ether_type())
    }

    fn parse_arp(&mut self, rdr: &mut PacketReader<'_>) {
        let start = rdr.pos();
        self.flag(InputFlags::ARP);

        let Ok(arp) = rdr.peek(ArpHdrRaw::SIZE).and_then(ArpHdrRaw::raw_zc)
        else {
            self.err(ErrorFlags::FRAME_LEN);
            return;
        };

        let msg_len = arp.msg_len();
        if rdr.seek(msg_len).is_err() {
            self.err(ErrorFlags::FRAME_LEN);
            return;
        }

        self.flag(InputFlags::L3);
        self.md.l3_len = clamp_u32(msg_len);
        self.payload_at(start + msg_len);
    }

    /// Parse an IPv4 header. Returns the L4 protocol along with a
    /// reader limited to the datagram's payload, unless there is no
    /// L4 header to parse.
    fn parse_ipv4<'a>(
        &mut self,
        rdr: &mut PacketReader<'a>,
    ) -> Option<(u8, PacketReader<'a>)> {
        let start = rdr.pos();
        let remaining = rdr.remaining();
        self.flag(InputFlags::IPV4);

        let Ok(ip) = rdr.peek(IPV4_HDR_SZ).and_then(Ipv4HdrRaw::raw_zc) else {
            self.err(ErrorFlags::IP_ERR);
            return None;
        };

        let hdr_len = ip.hdr_len();
        let total_len = usize::from(ip.total_len());
        if ip.version() != IPV4_VERSION
            || ip.ihl() < IPV4_IHL_MIN
            || hdr_len > remaining
            || total_len < hdr_len
            || total_len > remaining
        {
            self.err(ErrorFlags::IP_ERR);
            return None;
        }

        let Ok(hdr) = rdr.slice(hdr_len) else {
            self.err(ErrorFlags::IP_ERR);
            return None;
        };

        self.flag(InputFlags::L3);
        self.md.l3_len = clamp_u32(total_len);
        self.md.l4_protocol = u32::from(ip.proto);
        self.payload_at(rdr.pos());

        if hdr_len > IPV4_HDR_SZ {
            self.flag(InputFlags::IPOPT);
        }

        if ip.is_fragment() {
            self.flag(InputFlags::IPFRAG);
        }

        if self.opts.verify_ipv4_checksum && !ip4::hdr_csum_ok(hdr) {
            self.err(ErrorFlags::IP_ERR);
        }

        // Only the first fragment carries the L4 header.
        if ip.frag_offset() != 0 {
            return None;
        }

        let body = rdr.window(total_len - hdr_len).ok()?;
        debug_assert_eq!(body.pos(), start + hdr_len);
        Some((ip.proto, body))
    }

    fn parse_ipv6<'a>(
        &mut self,
        rdr: &mut PacketReader<'a>,
    ) -> Option<(u8, PacketReader<'a>)> {
        let remaining = rdr.remaining();
        self.flag(InputFlags::IPV6);

        let Ok(ip) = rdr.peek(IPV6_HDR_SZ).and_then(Ipv6HdrRaw::raw_zc) else {
            self.err(ErrorFlags::IP_ERR);
            return None;
        };

        let payload_len = usize::from(ip.payload_len());
        if ip.version() != IPV6_VERSION || IPV6_HDR_SZ + payload_len > remaining
        {
            self.err(ErrorFlags::IP_ERR);
            return None;
        }

        rdr.seek(IPV6_HDR_SZ).ok()?;
        self.flag(InputFlags::L3);
        self.md.l3_len = clamp_u32(IPV6_HDR_SZ + payload_len);
        self.payload_at(rdr.pos());

        let mut body = rdr.window(payload_len).ok()?;
        let mut next_hdr = ip.next_hdr;
        let mut count = 0;
        let mut later_frag = false;

        while is_ext_hdr(next_hdr) {
            count += 1;
            if count > self.opts.max_ipv6_ext_hdrs {
                self.bad_ipv6_ext();
                return None;
            }

            self.flag(InputFlags::IPOPT);
            if next_hdr == IPPROTO_FRAGMENT {
                let Ok(frag) = body.hdr::<Ipv6FragHdrRaw>() else {
                    self.bad_ipv6_ext();
                    return None;
                };

                self.flag(InputFlags::IPFRAG);
                later_frag |= frag.frag_offset() != 0;
                next_hdr = frag.next_hdr;
            } else {
                let Ok(ext) =
                    body.peek(Ipv6ExtHdrRaw::SIZE).and_then(Ipv6ExtHdrRaw::raw_zc)
                else {
                    self.bad_ipv6_ext();
                    return None;
                };

                if body.seek(ext.len()).is_err() {
                    self.bad_ipv6_ext();
                    return None;
                }
                next_hdr = ext.next_hdr;
            }

            self.payload_at(body.pos());
        }

        self.md.l4_protocol = u32::from(next_hdr);
        if later_frag || next_hdr == IPPROTO_NONXT {
            return None;
        }

        Some((next_hdr, body))
    }

    /// A malformed extension header chain leaves the L4 header
    /// unlocatable, which makes the whole L3 layer unusable.
    fn bad_ipv6_ext(&mut self) {
        self.err(ErrorFlags::IP_ERR);
        self.md.input_flags.remove(InputFlags::L3);
    }

    fn parse_l4(&mut self, proto: u8, mut rdr: PacketReader<'_>) {
        let start = rdr.pos();
        let remaining = rdr.remaining();

        match proto {
            IPPROTO_TCP => {
                self.flag(InputFlags::TCP);
                let Ok(tcp) = rdr.hdr::<TcpHdrRaw>() else {
                    self.err(ErrorFlags::TCP_ERR);
                    return;
                };

                let hdr_len = tcp.hdr_len();
                if tcp.doff() < TCP_DOFF_MIN || hdr_len > remaining {
                    self.err(ErrorFlags::TCP_ERR);
                    return;
                }

                if hdr_len > TCP_HDR_SZ {
                    self.flag(InputFlags::TCPOPT);
                }
                self.found_l4(start, remaining, start + hdr_len);
            }

            IPPROTO_UDP => {
                self.flag(InputFlags::UDP);
                let Ok(udp) = rdr.hdr::<UdpHdrRaw>() else {
                    self.err(ErrorFlags::UDP_ERR);
                    return;
                };

                let udp_len = usize::from(udp.len());
                if udp_len < UDP_HDR_SZ || udp_len > remaining {
                    self.err(ErrorFlags::UDP_ERR);
                    self.found_l4(start, remaining, start + UDP_HDR_SZ);
                } else {
                    self.found_l4(start, udp_len, start + UDP_HDR_SZ);
                }
            }

            IPPROTO_SCTP => {
                self.flag(InputFlags::SCTP);
                if rdr.seek(SCTP_HDR_SZ).is_err() {
                    self.err(ErrorFlags::FRAME_LEN);
                    return;
                }
                self.found_l4(start, remaining, start + SCTP_HDR_SZ);
            }

            IPPROTO_ICMP | IPPROTO_ICMPV6 => {
                self.flag(InputFlags::ICMP);
                if rdr.seek(ICMP_HDR_SZ).is_err() {
                    self.err(ErrorFlags::FRAME_LEN);
                    return;
                }
                self.found_l4(start, remaining, start + ICMP_HDR_SZ);
            }

            // The IPsec header is located but not interpreted.
            IPPROTO_AH | IPPROTO_ESP => {
                self.flag(InputFlags::IPSEC);
                self.found_l4(start, remaining, start);
            }

            _ => (),
        }
    }

    fn found_l4(&mut self, start: usize, l4_len: usize, payload: usize) {
        self.flag(InputFlags::L4);
        self.md.l4_offset = clamp_u32(start);
        self.md.l4_len = clamp_u32(l4_len);
        self.payload_at(payload);
    }
}
