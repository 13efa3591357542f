#![no_main]

use libfuzzer_sys::fuzz_target;
use pktmeta::engine::packet::Packet;
use pktmeta::engine::packet::PacketMd;
use pktmeta::engine::parse::ParseOptions;
use pktmeta::engine::parse::parse_frame;
use pktmeta::pool::BufferPool;
use pktmeta_api::InputFlags;
use pktmeta_test_utils::test_pool;
use std::sync::LazyLock;

static POOL: LazyLock<BufferPool> = LazyLock::new(|| test_pool(2, 9216));

fuzz_target!(|data: &[u8]| {
    let Some((&ctl, frame)) = data.split_first() else {
        return;
    };

    // The control byte picks the L2 offset and the checksum policy.
    let l2_offset = usize::from(ctl & 0x3f);
    let opts = ParseOptions {
        verify_ipv4_checksum: ctl & 0x80 != 0,
        ..Default::default()
    };

    let mut md = PacketMd::new(0, 0);
    parse_frame(&mut md, frame, frame.len(), l2_offset, &opts);

    let len = frame.len() as u32;
    let offsets = [
        md.l2_offset(),
        md.l3_offset(),
        md.l4_offset(),
        md.payload_offset(),
    ];
    for off in offsets.into_iter().flatten() {
        assert!(off <= len);
    }
    assert!(!md.input_flags().contains(InputFlags::UNPARSED));

    // The packet path must agree with the raw one.
    if let Ok(mut pkt) = Packet::copy_from(&POOL, frame) {
        if pkt.parse_with(frame.len(), l2_offset, &opts) {
            assert!(md.is_clean());
        }
        assert_eq!(pkt.md().raw_offsets(), md.raw_offsets());
        assert_eq!(pkt.md().input_flags(), md.input_flags());
    }
});
