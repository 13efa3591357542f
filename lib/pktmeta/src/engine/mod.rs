// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet engine: descriptors, raw header layouts and the parser.
pub mod arp;
pub mod checksum;
pub mod ether;
pub mod headers;
pub mod icmp;
pub mod ip4;
pub mod ip6;
pub mod packet;
pub mod parse;
pub mod sctp;
pub mod tcp;
pub mod udp;

pub use packet::Packet;
pub use packet::PacketError;
pub use packet::PacketMd;
pub use parse::ParseOptions;

/// IPsec Encapsulating Security Payload (RFC 4303).
pub const IPPROTO_ESP: u8 = 50;
/// IPsec Authentication Header (RFC 4302).
pub const IPPROTO_AH: u8 = 51;
