// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Behavioral guarantees of packets, the parser and the lifecycle,
//! checked end to end through a runtime.

use pktmeta::config::RuntimeConfig;
use pktmeta::engine::ether::ETHER_TYPE_QINQ;
use pktmeta::engine::ether::ETHER_TYPE_VLAN;
use pktmeta::engine::packet::Packet;
use pktmeta::engine::packet::PacketError;
use pktmeta::engine::packet::copy_md_to_packet;
use pktmeta::engine::packet::copy_to_packet;
use pktmeta::engine::parse;
use pktmeta::pool::Buffer;
use pktmeta::pool::PoolParams;
use pktmeta::runtime::InitError;
use pktmeta::runtime::Runtime;
use pktmeta::runtime::RuntimeCtx;
use pktmeta::runtime::StageStatus;
use pktmeta_api::ErrorFlags;
use pktmeta_api::InputFlags;
use pktmeta_api::PktioId;
use pktmeta_api::Stage;
use pktmeta_api::ThreadType;
use pktmeta_test_utils::Call;
use pktmeta_test_utils::FrameBuilder;
use pktmeta_test_utils::Journal;
use pktmeta_test_utils::L4;
use pktmeta_test_utils::Recorder;
use pktmeta_test_utils::packet;
use pktmeta_test_utils::test_pool;
use std::sync::Arc;

fn runtime() -> Runtime {
    let mut cfg = RuntimeConfig::default();
    cfg.pools = vec![
        PoolParams::new("rx", 32, 2048).with_uarea(16),
        PoolParams::new("tx", 8, 9216),
    ];
    let mut rt = Runtime::new(RuntimeCtx::discard(cfg)).unwrap();
    rt.init().unwrap();
    rt
}

#[test]
fn fresh_packet_only_unparsed() {
    let rt = runtime();
    let pool = rt.pool("rx").unwrap();
    let frame = FrameBuilder::udp4().payload(&[7; 32]).build();
    let pkt = packet(&pool, &frame);

    let md = pkt.md();
    assert_eq!(md.input_flags(), InputFlags::UNPARSED);
    assert!(md.error_flags().is_empty());
    assert_eq!(md.output_flags().bits(), 0);
    assert_eq!(md.frame_offset() as usize, pool.headroom());
    assert_eq!(md.l2_offset(), None);
    assert_eq!(md.l3_offset(), None);
    assert_eq!(md.l4_offset(), None);
    assert_eq!(md.payload_offset(), None);
    assert_eq!(md.uarea_size(), 16);
}

#[test]
fn eth_ipv4_udp() {
    let rt = runtime();
    let pool = rt.pool("rx").unwrap();

    for plen in [0, 1, 18, 64, 1472] {
        let frame = FrameBuilder::udp4().payload(&vec![0x5a; plen]).build();
        let len = frame.len();
        let mut pkt = packet(&pool, &frame);

        assert!(parse::parse(&mut pkt, len, 0));
        let md = pkt.md();
        for f in [
            InputFlags::L2,
            InputFlags::L3,
            InputFlags::L4,
            InputFlags::ETH,
            InputFlags::IPV4,
            InputFlags::UDP,
        ] {
            assert!(md.has(f), "missing {f:?} for payload {plen}");
        }
        assert!(!md.is_unparsed());

        let l4 = md.l4_offset().unwrap() as usize;
        assert!(l4 + 8 <= len);
        assert_eq!(md.payload_offset().unwrap() as usize, l4 + 8);
        assert_eq!(md.l4_len() as usize, 8 + plen);
    }
}

#[test]
fn truncated_ipv4() {
    let pool = test_pool(4, 2048);
    let frame = FrameBuilder::tcp4().payload(b"data").build();

    for cut in 14..34 {
        let mut pkt = packet(&pool, &frame[..cut]);
        assert!(!pkt.parse(cut, 0));
        let md = pkt.md();
        assert!(md.error_flags().contains(ErrorFlags::IP_ERR), "cut {cut}");
        assert!(md.has(InputFlags::IPV4));
        assert!(!md.has(InputFlags::L3));
        assert!(!md.has(InputFlags::L4));
        assert!(!md.has(InputFlags::TCP));
        assert!(!md.has(InputFlags::TCPOPT));
        assert_eq!(md.l2_offset(), Some(0));
    }
}

#[test]
fn reset_then_parse_is_identical() {
    let pool = test_pool(4, 2048);
    let frames = [
        FrameBuilder::udp4().build(),
        FrameBuilder::ipv4(L4::Tcp { src: 1, dst: 2, opts: 12 })
            .payload(b"x")
            .build(),
        FrameBuilder::udp6().vlan(ETHER_TYPE_VLAN, 100).build(),
        FrameBuilder::tcp4().build()[..40].to_vec(),
    ];

    for frame in frames {
        let mut pkt = packet(&pool, &frame);
        pkt.parse(frame.len(), 0);
        let first = pkt.md().clone();

        pkt.reset_parse();
        assert!(pkt.has_unparsed());
        // Offsets survive a reset until the next parse.
        assert_eq!(pkt.md().raw_offsets(), first.raw_offsets());
        assert_eq!(pkt.md().error_flags(), first.error_flags());

        pkt.parse(frame.len(), 0);
        assert_eq!(pkt.md(), &first);

        // The lazy path gets to the same place.
        pkt.reset_parse();
        assert_eq!(pkt.meta(), &first);
    }
}

#[test]
fn cross_pool_copy() {
    let rt = runtime();
    let rx = rt.pool("rx").unwrap();
    let tx = rt.pool("tx").unwrap();

    let src_bytes: Vec<u8> = (0..1500u32).map(|i| (i * 7) as u8).collect();
    let src = packet(&rx, &src_bytes);
    let mut dst = Packet::alloc(&tx, 4000).unwrap();

    for (soff, doff, len) in [(0, 0, 1500), (100, 2500, 1), (1499, 0, 1), (7, 3001, 999)] {
        copy_to_packet(&src, soff, &mut dst, doff, len).unwrap();
        assert_eq!(&dst.frame()[doff..doff + len], &src_bytes[soff..soff + len]);
    }

    assert!(matches!(
        copy_to_packet(&src, 1, &mut dst, 0, 1500),
        Err(PacketError::OutOfRange { .. })
    ));
    assert!(matches!(
        copy_to_packet(&src, 0, &mut dst, 3000, 1001),
        Err(PacketError::OutOfRange { .. })
    ));
    // Failed copies touch nothing.
    assert_eq!(&dst.frame()[3000..4000], {
        let mut want = vec![0u8; 1000];
        want[1..].copy_from_slice(&src_bytes[7..1006]);
        want
    });
}

#[test]
fn qinq_tags() {
    let pool = test_pool(4, 2048);
    let frame = FrameBuilder::udp4()
        .vlan(ETHER_TYPE_QINQ, 0x3123)
        .vlan(ETHER_TYPE_VLAN, 0xe456)
        .build();
    let mut pkt = packet(&pool, &frame);

    let md = pkt.meta();
    assert!(md.is_clean());
    assert!(md.has(InputFlags::VLAN));
    assert!(md.has(InputFlags::VLAN_QINQ));
    assert_eq!(md.vlan_s_tag(), Some(0x3123));
    assert_eq!(md.vlan_c_tag(), Some(0xe456));
    assert_eq!(md.l3_offset(), Some(22));
    assert_eq!(md.l4_offset(), Some(42));

    // Only a service tag on the wire.
    let frame = FrameBuilder::udp4().vlan(ETHER_TYPE_QINQ, 0x0123).build();
    let mut pkt = packet(&pool, &frame);
    let md = pkt.meta();
    assert!(md.is_clean());
    assert!(md.has(InputFlags::VLAN_QINQ));
    assert_eq!(md.vlan_s_tag(), Some(0x0123));
    assert_eq!(md.vlan_c_tag(), None);
    assert_eq!(md.l3_offset(), Some(18));
}

#[test]
fn errors_are_delivered_with_metadata() {
    let pool = test_pool(4, 2048);
    let mut frame = FrameBuilder::udp4().payload(&[1; 10]).build();
    // Corrupt the UDP length.
    frame[38..40].copy_from_slice(&0xffffu16.to_be_bytes());

    let mut pkt = packet(&pool, &frame);
    let md = pkt.meta();
    assert_eq!(md.error_flags(), ErrorFlags::UDP_ERR);
    assert_eq!(md.l3_offset(), Some(14));
    assert_eq!(md.l4_offset(), Some(34));
}

#[test]
fn app_error_until_reparse() {
    let pool = test_pool(4, 2048);
    let frame = FrameBuilder::udp4().build();
    let mut pkt = packet(&pool, &frame);
    pkt.meta();

    pkt.set_app_error();
    pkt.reset_parse();
    assert!(pkt.md().error_flags().contains(ErrorFlags::APP_ERROR));
    assert!(pkt.meta().is_clean());
}

#[test]
fn metadata_copy() {
    let rt = runtime();
    let rx = rt.pool("rx").unwrap();
    let tx = rt.pool("tx").unwrap();

    let frame = FrameBuilder::tcp4().payload(b"abc").build();
    let mut src = packet(&rx, &frame);
    src.set_input(PktioId::new(3));
    src.output_flags_mut().set_l4_chksum(false);
    src.meta();

    let mut dst = Packet::alloc(&tx, 10).unwrap();
    copy_md_to_packet(&src, &mut dst);

    let (s, d) = (src.md(), dst.md());
    assert_eq!(d.input_flags(), s.input_flags());
    assert_eq!(d.l4_offset(), s.l4_offset());
    assert_eq!(d.input(), PktioId::new(3));
    assert_eq!(d.output_flags().l4_chksum(), Some(false));
    // Block-owned fields stay with the destination.
    assert_eq!(d.uarea_size(), 0);
    assert_eq!(s.uarea_size(), 16);
    // Bytes are untouched.
    assert!(dst.frame().iter().all(|b| *b == 0));
}

#[test]
fn aliasing() {
    let pool = test_pool(2, 256);
    let frame = FrameBuilder::udp4().build();
    let pkt = packet(&pool, &frame);
    let id = pkt.id();

    let buf: Buffer = pkt.into();
    assert!(buf.is_packet());
    assert_eq!(buf.id(), id);

    let pkt = Packet::try_from(buf).unwrap();
    assert_eq!(pkt.id(), id);
    assert_eq!(pkt.frame(), &frame[..]);

    let raw = pool.claim_block(100).unwrap();
    let err = Packet::try_from(raw).unwrap_err();
    let raw = err.buf;
    assert!(!raw.is_packet());
    pool.release_block(raw).unwrap();

    drop(pkt);
    assert_eq!(pool.outstanding(), 0);
}

fn recorded_runtime(
    journal: &Arc<Journal>,
    failing: Option<Stage>,
) -> Runtime {
    let mut rt = Runtime::new(pktmeta_test_utils::test_ctx()).unwrap();
    for stage in Stage::ALL {
        if stage == Stage::Pool {
            continue;
        }
        let mut rec = Recorder::new(stage, journal);
        if Some(stage) == failing {
            rec = rec.fail_init();
        }
        rt.register(stage, Arc::new(rec)).unwrap();
    }
    rt
}

#[test]
fn failed_stage_unwinds_in_reverse() {
    for k in [Stage::CpuMask, Stage::Thread, Stage::Queue, Stage::NameTable] {
        let journal = Journal::new();
        let mut rt = recorded_runtime(&journal, Some(k));

        match rt.init().unwrap_err() {
            InitError::StageFailed { stage, rollback, .. } => {
                assert_eq!(stage, k);
                assert!(rollback.is_empty());
            }
            e => panic!("unexpected error: {e}"),
        }

        let before: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| *s < k && *s != Stage::Pool)
            .collect();
        let mut want: Vec<Call> = before.iter().map(|s| Call::Init(*s)).collect();
        want.push(Call::Init(k));
        want.extend(before.iter().rev().map(|s| Call::Term(*s)));
        assert_eq!(journal.take(), want);

        let seq = rt.sequencer();
        for stage in Stage::ALL {
            let want = if stage < k { StageStatus::Down } else { StageStatus::NotRun };
            assert_eq!(seq.status(stage), want, "{stage}");
        }
        assert_eq!(seq.reached(), None);
    }
}

#[test]
fn pools_follow_lifecycle() {
    let journal = Journal::new();
    let mut rt = recorded_runtime(&journal, None);
    assert!(rt.pool("pkt").is_err());

    rt.init().unwrap();
    let pool = rt.pool("pkt").unwrap();

    let guard = rt.init_local(ThreadType::Control).unwrap();
    let pkt = Packet::alloc(&pool, 60).unwrap();
    drop(pkt);
    rt.term_local(guard).unwrap();

    journal.take();
    rt.term().unwrap();
    let terms = journal.take();
    assert_eq!(terms.first(), Some(&Call::Term(Stage::NameTable)));
    assert_eq!(terms.last(), Some(&Call::Term(Stage::CpuMask)));
    assert!(rt.pool("pkt").is_err());
}
