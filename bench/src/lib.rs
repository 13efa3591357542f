// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use criterion::measurement::Measurement;
use criterion::measurement::WallTime;
use pktmeta::engine::ether::ETHER_TYPE_QINQ;
use pktmeta::engine::ether::ETHER_TYPE_VLAN;
use pktmeta::engine::ip6::IPPROTO_DSTOPTS;
use pktmeta::engine::ip6::IPPROTO_HOPOPTS;
use pktmeta::engine::ip6::IPPROTO_ROUTING;
use pktmeta_test_utils::FrameBuilder;
use pktmeta_test_utils::Ipv6Ext;
use pktmeta_test_utils::L4;

#[cfg(feature = "alloc")]
pub mod alloc;

/// Additional labelling information for [`Measurement`]s for
/// pretty-printing and grouping.
pub trait MeasurementInfo: Measurement {
    fn label() -> &'static str;
}

impl MeasurementInfo for WallTime {
    fn label() -> &'static str {
        "wallclock"
    }
}

/// The frame classes each benchmark is run over.
pub fn frame_classes() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("eth-ipv4-udp", FrameBuilder::udp4().payload(&[0; 64]).build()),
        (
            "eth-ipv4-tcp-opts",
            FrameBuilder::ipv4(L4::Tcp { src: 443, dst: 50000, opts: 20 })
                .payload(&[0; 64])
                .build(),
        ),
        (
            "qinq-ipv4-udp",
            FrameBuilder::udp4()
                .vlan(ETHER_TYPE_QINQ, 10)
                .vlan(ETHER_TYPE_VLAN, 20)
                .build(),
        ),
        ("eth-ipv6-udp", FrameBuilder::udp6().payload(&[0; 64]).build()),
        (
            "eth-ipv6-ext3-udp",
            FrameBuilder::udp6()
                .ext(Ipv6Ext::Opts { proto: IPPROTO_HOPOPTS, units: 1 })
                .ext(Ipv6Ext::Opts { proto: IPPROTO_ROUTING, units: 2 })
                .ext(Ipv6Ext::Opts { proto: IPPROTO_DSTOPTS, units: 1 })
                .build(),
        ),
        ("truncated-ipv4", FrameBuilder::tcp4().build()[..30].to_vec()),
    ]
}
