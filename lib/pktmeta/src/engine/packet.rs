// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet descriptor.
//!
//! A [`Packet`] is a typed view of one pool block. The block's header
//! is followed by a [`PacketMd`]: the flags, offsets and scalars the
//! parser derives from the frame bytes. The metadata lives in the
//! block itself, so a packet has no storage of its own.
//!
//! # Buffer and packet handles
//!
//! A claimed block is first a generic [`Buffer`]. Constructing a
//! packet over it tags the block as a packet. Going from [`Packet`] to
//! [`Buffer`] is always allowed; going back is checked against that
//! tag and fails with [`NotAPacket`] for blocks that were never
//! constructed as packets. Both conversions move the same handle and
//! allocate nothing.
//!
//! # Offsets
//!
//! `frame_offset` is relative to the start of the block's data room
//! and is valid from construction on. Every other offset is relative
//! to the start of the frame, and is only meaningful while the
//! matching presence bit (`L2`, `L3`, `L4`) is set. The accessors on
//! [`PacketMd`] return `None` otherwise.

use super::parse;
use super::parse::ParseOptions;
use crate::pool::BlockId;
use crate::pool::Buffer;
use crate::pool::BufferHdr;
use crate::pool::BufferKind;
use crate::pool::BufferPool;
use crate::pool::PoolError;
use core::fmt;
use core::mem;
use core::ops::Range;
use pktmeta_api::ErrorFlags;
use pktmeta_api::InputFlags;
use pktmeta_api::OutputFlags;
use pktmeta_api::PktioId;
use thiserror::Error;

/// Size of a cache line on every platform we build for.
pub const CACHE_LINE_SIZE: usize = 64;

/// Per-packet metadata: exactly one cache line.
#[repr(C, align(64))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketMd {
    pub(crate) input_flags: InputFlags,
    pub(crate) error_flags: ErrorFlags,
    pub(crate) output_flags: OutputFlags,

    pub(crate) frame_offset: u32,
    pub(crate) l2_offset: u32,
    pub(crate) l3_offset: u32,
    pub(crate) l4_offset: u32,
    pub(crate) payload_offset: u32,

    pub(crate) vlan_s_tag: u32,
    pub(crate) vlan_c_tag: u32,
    pub(crate) l3_protocol: u32,
    pub(crate) l3_len: u32,
    pub(crate) l4_protocol: u32,
    pub(crate) l4_len: u32,

    pub(crate) input: Option<PktioId>,
    pub(crate) uarea_size: u32,
}

// Stored in place of a customer tag when the frame carries none. Tag
// control information is 16 bits wide, so no TCI collides with it.
const NO_TCI: u32 = u32::MAX;

const _: () = assert!(mem::size_of::<PacketMd>() == CACHE_LINE_SIZE);
const _: () = assert!(mem::align_of::<PacketMd>() == CACHE_LINE_SIZE);

impl PacketMd {
    /// Fresh metadata for a frame starting at `frame_offset`: only the
    /// unparsed sentinel is set.
    pub fn new(frame_offset: u32, uarea_size: u32) -> Self {
        Self {
            input_flags: InputFlags::UNPARSED,
            error_flags: ErrorFlags::empty(),
            output_flags: OutputFlags::empty(),
            frame_offset,
            l2_offset: 0,
            l3_offset: 0,
            l4_offset: 0,
            payload_offset: 0,
            vlan_s_tag: 0,
            vlan_c_tag: NO_TCI,
            l3_protocol: 0,
            l3_len: 0,
            l4_protocol: 0,
            l4_len: 0,
            input: None,
            uarea_size,
        }
    }

    pub fn input_flags(&self) -> InputFlags {
        self.input_flags
    }

    pub fn error_flags(&self) -> ErrorFlags {
        self.error_flags
    }

    pub fn output_flags(&self) -> OutputFlags {
        self.output_flags
    }

    pub fn is_unparsed(&self) -> bool {
        self.input_flags.is_unparsed()
    }

    /// Parsed, and no error bit set.
    pub fn is_clean(&self) -> bool {
        !self.is_unparsed() && self.error_flags.is_empty()
    }

    /// Is `flag` set? Always false before a parse.
    pub fn has(&self, flag: InputFlags) -> bool {
        !self.is_unparsed() && self.input_flags.contains(flag)
    }

    /// Start of the frame within the block's data room.
    pub fn frame_offset(&self) -> u32 {
        self.frame_offset
    }

    pub fn l2_offset(&self) -> Option<u32> {
        self.has(InputFlags::L2).then_some(self.l2_offset)
    }

    pub fn l3_offset(&self) -> Option<u32> {
        self.has(InputFlags::L3).then_some(self.l3_offset)
    }

    pub fn l4_offset(&self) -> Option<u32> {
        self.has(InputFlags::L4).then_some(self.l4_offset)
    }

    /// First byte past the last header the parser understood.
    pub fn payload_offset(&self) -> Option<u32> {
        (!self.is_unparsed()).then_some(self.payload_offset)
    }

    /// Outer (service) tag control information.
    pub fn vlan_s_tag(&self) -> Option<u32> {
        self.has(InputFlags::VLAN_QINQ).then_some(self.vlan_s_tag)
    }

    /// Inner (customer) tag control information. `None` for a frame
    /// carrying only a service tag.
    pub fn vlan_c_tag(&self) -> Option<u32> {
        (self.has(InputFlags::VLAN) && self.vlan_c_tag != NO_TCI)
            .then_some(self.vlan_c_tag)
    }

    /// The ethertype carrying the L3 header.
    pub fn l3_protocol(&self) -> u32 {
        self.l3_protocol
    }

    pub fn l3_len(&self) -> u32 {
        self.l3_len
    }

    /// The IP protocol number of the L4 header.
    pub fn l4_protocol(&self) -> u32 {
        self.l4_protocol
    }

    pub fn l4_len(&self) -> u32 {
        self.l4_len
    }

    pub fn input(&self) -> Option<PktioId> {
        self.input
    }

    pub fn uarea_size(&self) -> u32 {
        self.uarea_size
    }

    /// Clear everything the parser derives, ahead of a full parse.
    /// Output flags, `input`, the frame offset and the user area size
    /// are not derived from the bytes and are left alone.
    pub(crate) fn clear_parsed(&mut self) {
        self.input_flags = InputFlags::empty();
        self.error_flags = ErrorFlags::empty();
        self.l2_offset = 0;
        self.l3_offset = 0;
        self.l4_offset = 0;
        self.payload_offset = 0;
        self.vlan_s_tag = 0;
        self.vlan_c_tag = NO_TCI;
        self.l3_protocol = 0;
        self.l3_len = 0;
        self.l4_protocol = 0;
        self.l4_len = 0;
    }
}

#[cfg(any(feature = "test-help", test))]
impl PacketMd {
    /// The stored `l2`, `l3`, `l4` and payload offsets, whatever the
    /// presence bits say.
    pub fn raw_offsets(&self) -> [u32; 4] {
        [self.l2_offset, self.l3_offset, self.l4_offset, self.payload_offset]
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PacketError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("range {offset}+{len} exceeds frame length {frame_len}")]
    OutOfRange { offset: usize, len: usize, frame_len: usize },

    #[error("frame of {len} bytes at offset {offset} exceeds room {room}")]
    TooLarge { len: usize, offset: usize, room: usize },

    #[error("cannot move frame start by {requested}, {available} available")]
    NoHeadroom { requested: usize, available: usize },
}

/// A block that was never constructed as a packet. Carries the
/// buffer back to the caller.
#[derive(Debug, Error)]
#[error("block {} is not a packet", .buf.id())]
pub struct NotAPacket {
    pub buf: Buffer,
}

/// A typed handle to a pool block holding a frame.
pub struct Packet {
    buf: Buffer,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("md", self.md())
            .finish()
    }
}

impl Packet {
    /// Claim a block from `pool` and construct a packet of `len`
    /// zeroed-or-stale bytes over it.
    pub fn alloc(pool: &BufferPool, len: usize) -> Result<Self, PacketError> {
        let buf = pool.claim_block(len)?;
        Self::init(buf, len)
    }

    /// Claim a block and copy `bytes` in as the frame.
    pub fn copy_from(
        pool: &BufferPool,
        bytes: &[u8],
    ) -> Result<Self, PacketError> {
        let mut pkt = Self::alloc(pool, bytes.len())?;
        pkt.frame_mut().copy_from_slice(bytes);
        Ok(pkt)
    }

    /// Construct a packet of `len` bytes over an already claimed
    /// block. The frame starts at the pool's configured headroom and
    /// nothing is parsed.
    pub fn init(mut buf: Buffer, len: usize) -> Result<Self, PacketError> {
        let headroom = buf.pool().headroom();
        let room = buf.hdr().room();
        if headroom + len > room {
            return Err(PacketError::TooLarge { len, offset: headroom, room });
        }

        let blk = buf.block_mut();
        let uarea_size = blk.uarea.len() as u32;
        blk.hdr.kind = BufferKind::Packet;
        blk.hdr.size = len as u32;
        blk.md = PacketMd::new(headroom as u32, uarea_size);
        Ok(Self { buf })
    }

    /// Give up the packet view, keeping the block.
    pub fn into_buffer(self) -> Buffer {
        self.buf
    }

    pub fn id(&self) -> BlockId {
        self.buf.id()
    }

    pub fn buffer_hdr(&self) -> &BufferHdr {
        self.buf.hdr()
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.buf.hdr().size()
    }

    fn frame_range(&self) -> Range<usize> {
        let start = self.md().frame_offset as usize;
        start..start + self.len()
    }

    pub fn frame(&self) -> &[u8] {
        let r = self.frame_range();
        &self.buf.block().data[r]
    }

    /// Write access to the frame. Callers that change header bytes
    /// must [`Packet::reset_parse`] afterwards.
    pub fn frame_mut(&mut self) -> &mut [u8] {
        let r = self.frame_range();
        &mut self.buf.block_mut().data[r]
    }

    /// Bytes available in front of the frame.
    pub fn headroom(&self) -> usize {
        self.md().frame_offset as usize
    }

    /// The metadata as it stands, without triggering a parse.
    pub fn md(&self) -> &PacketMd {
        &self.buf.block().md
    }

    /// The metadata, parsing the whole frame first if it has not been
    /// parsed since construction or the last reset.
    pub fn meta(&mut self) -> &PacketMd {
        if self.has_unparsed() {
            let l2 = self.md().l2_offset as usize;
            let len = self.len();
            self.parse(len, l2);
        }
        self.md()
    }

    pub fn has_unparsed(&self) -> bool {
        self.md().is_unparsed()
    }

    /// Mark every derived field stale. Error flags, output flags and
    /// the offsets keep their values until the next full parse.
    pub fn reset_parse(&mut self) {
        self.buf.block_mut().md.input_flags = InputFlags::UNPARSED;
    }

    /// Parse the first `len` bytes of the frame, starting the L2
    /// header at `l2_offset`, with the pool's parse options. Returns
    /// true when no error bit was set.
    pub fn parse(&mut self, len: usize, l2_offset: usize) -> bool {
        let opts = self.buf.pool().parse_opts().clone();
        self.parse_with(len, l2_offset, &opts)
    }

    pub fn parse_with(
        &mut self,
        len: usize,
        l2_offset: usize,
        opts: &ParseOptions,
    ) -> bool {
        let r = self.frame_range();
        let blk = self.buf.block_mut();
        parse::parse_frame(&mut blk.md, &blk.data[r], len, l2_offset, opts)
    }

    /// Flag the packet as bad on behalf of the application.
    pub fn set_app_error(&mut self) {
        self.buf.block_mut().md.error_flags |= ErrorFlags::APP_ERROR;
    }

    pub fn set_input(&mut self, input: Option<PktioId>) {
        self.buf.block_mut().md.input = input;
    }

    /// Transmit-side access to the checksum override bits.
    pub fn output_flags_mut(&mut self) -> &mut OutputFlags {
        &mut self.buf.block_mut().md.output_flags
    }

    pub fn uarea(&self) -> &[u8] {
        &self.buf.block().uarea
    }

    pub fn uarea_mut(&mut self) -> &mut [u8] {
        &mut self.buf.block_mut().uarea
    }

    /// Grow the frame by `n` bytes at the front, into the headroom.
    /// The new bytes hold whatever the block last held there.
    pub fn push_head(&mut self, n: usize) -> Result<(), PacketError> {
        let available = self.headroom();
        if n > available {
            return Err(PacketError::NoHeadroom { requested: n, available });
        }

        // The stored L2 start is frame relative: keep it on the same
        // byte for the next lazy parse.
        let blk = self.buf.block_mut();
        blk.md.frame_offset -= n as u32;
        blk.md.l2_offset = blk.md.l2_offset.saturating_add(n as u32);
        blk.hdr.size += n as u32;
        self.reset_parse();
        Ok(())
    }

    /// Drop `n` bytes from the front of the frame.
    pub fn pull_head(&mut self, n: usize) -> Result<(), PacketError> {
        let frame_len = self.len();
        if n > frame_len {
            return Err(PacketError::OutOfRange {
                offset: 0,
                len: n,
                frame_len,
            });
        }

        let blk = self.buf.block_mut();
        blk.md.frame_offset += n as u32;
        blk.md.l2_offset = blk.md.l2_offset.saturating_sub(n as u32);
        blk.hdr.size -= n as u32;
        self.reset_parse();
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), PacketError> {
        let frame_len = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= frame_len => Ok(()),
            _ => Err(PacketError::OutOfRange { offset, len, frame_len }),
        }
    }

    /// Copy `[src, src + len)` to `[dst, dst + len)` within this
    /// frame. Overlapping ranges are allowed: the result is as if the
    /// source were first copied to a temporary buffer.
    pub fn copy_within(
        &mut self,
        src: usize,
        dst: usize,
        len: usize,
    ) -> Result<(), PacketError> {
        self.check_range(src, len)?;
        self.check_range(dst, len)?;
        self.frame_mut().copy_within(src..src + len, dst);
        Ok(())
    }
}

impl TryFrom<Buffer> for Packet {
    type Error = NotAPacket;

    fn try_from(buf: Buffer) -> Result<Self, Self::Error> {
        if buf.hdr().kind() != BufferKind::Packet {
            return Err(NotAPacket { buf });
        }

        Ok(Self { buf })
    }
}

/// Copy `len` bytes from `src` at `srcoff` into `dst` at `dstoff`.
///
/// The two packets may live in different blocks of different pools;
/// no assumption is made about where either block sits in memory.
/// Neither packet's metadata is touched. For a copy inside a single
/// packet use [`Packet::copy_within`].
pub fn copy_to_packet(
    src: &Packet,
    srcoff: usize,
    dst: &mut Packet,
    dstoff: usize,
    len: usize,
) -> Result<(), PacketError> {
    src.check_range(srcoff, len)?;
    dst.check_range(dstoff, len)?;
    dst.frame_mut()[dstoff..dstoff + len]
        .copy_from_slice(&src.frame()[srcoff..srcoff + len]);
    Ok(())
}

/// Copy the descriptor fields of `src` (flags, layer offsets, parsed
/// scalars and `input`) to `dst`.
///
/// Neither packet's bytes or block header are touched. `dst` keeps
/// its own frame offset and user area size: both describe its block,
/// not its frame.
pub fn copy_md_to_packet(src: &Packet, dst: &mut Packet) {
    let md = &mut dst.buf.block_mut().md;
    let frame_offset = md.frame_offset;
    let uarea_size = md.uarea_size;
    *md = src.md().clone();
    md.frame_offset = frame_offset;
    md.uarea_size = uarea_size;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::pool::PoolParams;
    use crate::runtime::RuntimeCtx;
    use pktmeta_api::PoolId;

    fn pool(blocks: u32) -> BufferPool {
        let ctx = RuntimeCtx::discard(RuntimeConfig::default());
        BufferPool::create(&ctx, PoolId(0), &PoolParams::new("t", blocks, 256))
            .unwrap()
    }

    #[test]
    fn layout() {
        assert_eq!(mem::size_of::<PacketMd>(), 64);
        assert_eq!(mem::align_of::<PacketMd>(), 64);
    }

    #[test]
    fn fresh_packet_is_unparsed() {
        let pool = pool(1);
        let pkt = Packet::alloc(&pool, 60).unwrap();
        let md = pkt.md();
        assert_eq!(md.input_flags(), InputFlags::UNPARSED);
        assert!(md.error_flags().is_empty());
        assert!(md.output_flags().is_empty());
        assert_eq!(md.frame_offset() as usize, pool.headroom());
        assert_eq!(md.l2_offset(), None);
        assert_eq!(md.payload_offset(), None);
        assert_eq!(pkt.len(), 60);
        assert_eq!(pkt.frame().len(), 60);
    }

    #[test]
    fn buffer_packet_aliasing() {
        let pool = pool(2);
        let raw = pool.claim_block(32).unwrap();
        let raw = match Packet::try_from(raw) {
            Err(NotAPacket { buf }) => buf,
            Ok(_) => panic!("raw block accepted as packet"),
        };

        let mut pkt = Packet::init(raw, 32).unwrap();
        pkt.frame_mut()[0] = 0xAB;
        let id = pkt.id();

        let buf = Buffer::from(pkt);
        assert_eq!(buf.id(), id);
        assert!(buf.is_packet());

        let pkt = Packet::try_from(buf).unwrap();
        assert_eq!(pkt.id(), id);
        assert_eq!(pkt.frame()[0], 0xAB);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn reset_parse_only_touches_input() {
        let pool = pool(1);
        let mut pkt = Packet::alloc(&pool, 20).unwrap();
        pkt.parse(20, 0);
        pkt.set_app_error();
        pkt.output_flags_mut().set_l4_chksum(true);
        let before = pkt.md().clone();

        pkt.reset_parse();
        let md = pkt.md();
        assert_eq!(md.input_flags(), InputFlags::UNPARSED);
        assert_eq!(md.error_flags(), before.error_flags());
        assert_eq!(md.output_flags(), before.output_flags());
        assert_eq!(md.payload_offset, before.payload_offset);
    }

    #[test]
    fn copy_range_checks() {
        let pool = pool(2);
        let src = Packet::copy_from(&pool, &[1, 2, 3, 4, 5, 6]).unwrap();
        let mut dst = Packet::alloc(&pool, 4).unwrap();

        assert_eq!(
            copy_to_packet(&src, 4, &mut dst, 0, 3),
            Err(PacketError::OutOfRange { offset: 4, len: 3, frame_len: 6 })
        );
        assert_eq!(
            copy_to_packet(&src, 0, &mut dst, 2, 3),
            Err(PacketError::OutOfRange { offset: 2, len: 3, frame_len: 4 })
        );
        assert!(copy_to_packet(&src, usize::MAX, &mut dst, 0, 2).is_err());

        copy_to_packet(&src, 2, &mut dst, 1, 3).unwrap();
        assert_eq!(&dst.frame()[1..4], &[3, 4, 5]);
        copy_to_packet(&src, 0, &mut dst, 4, 0).unwrap();
    }

    #[test]
    fn copy_within_overlap() {
        let pool = pool(1);
        let mut pkt = Packet::copy_from(&pool, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();

        // Forward overlap.
        pkt.copy_within(0, 2, 5).unwrap();
        assert_eq!(pkt.frame(), &[0, 1, 0, 1, 2, 3, 4, 7]);

        // Backward overlap.
        pkt.copy_within(2, 0, 6).unwrap();
        assert_eq!(pkt.frame(), &[0, 1, 2, 3, 4, 7, 4, 7]);

        assert!(pkt.copy_within(4, 0, 5).is_err());
    }

    #[test]
    fn md_copy_keeps_block_fields() {
        let ctx = RuntimeCtx::discard(RuntimeConfig::default());
        let a = BufferPool::create(&ctx, PoolId(0), &PoolParams::new("a", 1, 256))
            .unwrap();
        let b = BufferPool::create(
            &ctx,
            PoolId(1),
            &PoolParams::new("b", 1, 256).with_uarea(16),
        )
        .unwrap();

        let mut src = Packet::alloc(&a, 64).unwrap();
        src.parse(64, 0);
        src.set_input(PktioId::new(9));
        src.output_flags_mut().set_l3_chksum(false);

        let mut dst = Packet::alloc(&b, 64).unwrap();
        dst.push_head(4).unwrap();
        let dst_off = dst.md().frame_offset();
        dst.frame_mut()[0] = 0xEE;

        copy_md_to_packet(&src, &mut dst);
        let (s, d) = (src.md(), dst.md());
        assert_eq!(d.input_flags(), s.input_flags());
        assert_eq!(d.error_flags(), s.error_flags());
        assert_eq!(d.output_flags(), s.output_flags());
        assert_eq!(d.payload_offset(), s.payload_offset());
        assert_eq!(d.input(), PktioId::new(9));
        assert_eq!(d.frame_offset(), dst_off);
        assert_eq!(d.uarea_size(), 16);
        assert_eq!(dst.frame()[0], 0xEE);
        assert_eq!(dst.len(), 68);
    }

    #[test]
    fn head_adjust() {
        let pool = pool(1);
        let mut pkt = Packet::alloc(&pool, 10).unwrap();
        let room = pkt.headroom();
        pkt.parse(10, 0);
        assert!(!pkt.has_unparsed());

        pkt.push_head(room).unwrap();
        assert!(pkt.has_unparsed());
        assert_eq!(pkt.headroom(), 0);
        assert_eq!(pkt.len(), 10 + room);
        assert_eq!(
            pkt.push_head(1),
            Err(PacketError::NoHeadroom { requested: 1, available: 0 })
        );

        pkt.pull_head(room + 4).unwrap();
        assert_eq!(pkt.len(), 6);
        assert!(pkt.pull_head(7).is_err());
    }

    #[test]
    fn lazy_parse_follows_head_adjust() {
        let pool = pool(1);
        // Six bytes of outer encapsulation ahead of an ARP request.
        let mut f = vec![0xEE; 6];
        f.extend_from_slice(&[0x02, 0, 0, 0, 0, 1, 0x02, 0, 0, 0, 0, 2]);
        f.extend_from_slice(&[0x08, 0x06]);
        f.extend_from_slice(&[0, 1, 8, 0, 6, 4, 0, 1]);
        f.extend_from_slice(&[0; 20]);
        let mut pkt = Packet::copy_from(&pool, &f).unwrap();
        assert!(pkt.parse(f.len(), 6));
        assert!(pkt.md().has(InputFlags::ARP | InputFlags::L3));

        pkt.pull_head(6).unwrap();
        let md = pkt.meta();
        assert!(md.is_clean());
        assert_eq!(md.l2_offset(), Some(0));
        assert_eq!(md.l3_offset(), Some(14));
        assert!(md.has(InputFlags::ARP | InputFlags::L3));

        pkt.push_head(4).unwrap();
        let md = pkt.meta();
        assert!(md.is_clean());
        assert_eq!(md.l2_offset(), Some(4));
        assert_eq!(md.l3_offset(), Some(18));
        assert!(md.has(InputFlags::ARP));

        // Pulling past the stored L2 start leaves it at the new front.
        pkt.pull_head(10).unwrap();
        assert_eq!(pkt.meta().l2_offset(), Some(0));
    }

    #[test]
    fn uarea() {
        let ctx = RuntimeCtx::discard(RuntimeConfig::default());
        let pool = BufferPool::create(
            &ctx,
            PoolId(0),
            &PoolParams::new("u", 1, 64).with_uarea(8),
        )
        .unwrap();
        let mut pkt = Packet::alloc(&pool, 1).unwrap();
        assert_eq!(pkt.md().uarea_size(), 8);
        pkt.uarea_mut().copy_from_slice(&[7; 8]);
        pkt.parse(1, 0);
        assert_eq!(pkt.uarea(), &[7; 8]);
    }
}
