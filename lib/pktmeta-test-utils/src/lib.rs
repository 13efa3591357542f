// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Shared resources for testing pktmeta: frame builders, pcap
//! helpers, and a subsystem that records its lifecycle calls.

pub mod frame;
pub mod pcap;
pub mod subsystem;

use pktmeta::config::RuntimeConfig;
use pktmeta::engine::packet::Packet;
use pktmeta::pool::BufferPool;
use pktmeta::pool::PoolParams;
use pktmeta::runtime::RuntimeCtx;
use pktmeta_api::PoolId;

pub use frame::FrameBuilder;
pub use frame::Ipv6Ext;
pub use frame::L4;
pub use pcap::PcapBuilder;
pub use subsystem::Call;
pub use subsystem::Journal;
pub use subsystem::Recorder;

/// A runtime context with default configuration and no log output.
pub fn test_ctx() -> RuntimeCtx {
    RuntimeCtx::discard(RuntimeConfig::default())
}

/// A standalone pool for tests that do not need a full runtime.
pub fn test_pool(num_blocks: u32, block_len: u32) -> BufferPool {
    BufferPool::create(
        &test_ctx(),
        PoolId(0),
        &PoolParams::new("test", num_blocks, block_len),
    )
    .unwrap()
}

/// Copy `frame` into a fresh packet from `pool`.
pub fn packet(pool: &BufferPool, frame: &[u8]) -> Packet {
    Packet::copy_from(pool, frame).unwrap()
}
