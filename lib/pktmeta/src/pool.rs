// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Fixed-size block pools.
//!
//! A [`BufferPool`] preallocates every block it will ever hand out.
//! Claiming a block pops it off a free list and releasing it pushes
//! it back, so the receive path performs no allocation.
//!
//! Each block carries, in order: a [`BufferHdr`] owned by the pool,
//! the packet descriptor, an optional user area, and a data room of
//! [`POOL_HEADROOM`] plus the configured block length. Frames always
//! start inside the headroom and nothing is reserved after them.
//!
//! Ownership of a claimed block is unique: exactly one [`Buffer`] (or
//! [`Packet`]) handle exists for it, and the block goes back to its
//! pool when that handle is released or dropped. A block therefore
//! cannot be released twice, and cannot outlive its pool's memory.

use crate::engine::packet::Packet;
use crate::engine::packet::PacketMd;
use crate::engine::parse::ParseOptions;
use crate::runtime::RuntimeCtx;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::mem::ManuallyDrop;
use pktmeta_api::PoolId;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog::error;
use slog::info;
use std::sync::Mutex;
use std::sync::MutexGuard;
use thiserror::Error;

/// Bytes every block reserves in front of the frame start.
///
/// Whatever headroom the packet layer is configured with must fit in
/// this reservation.
pub const POOL_HEADROOM: usize = 128;

/// Bytes every block reserves after the frame. Always zero.
pub const POOL_TAILROOM: usize = 0;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PoolError {
    #[error(
        "required headroom {required} exceeds pool reservation {available}"
    )]
    InsufficientHeadroom { required: usize, available: usize },

    #[error("tailroom reservation of {0} bytes is not supported")]
    TailroomUnsupported(usize),

    #[error("requested {requested} bytes but blocks hold {max}")]
    BlockTooLarge { requested: usize, max: usize },

    #[error("pool {name} has no free blocks")]
    Exhausted { name: String },

    #[error("block {block} does not belong to {pool}")]
    ForeignBlock { pool: PoolId, block: BlockId },

    #[error("invalid pool parameters: {0}")]
    InvalidParams(String),

    #[error("pool {name} still has {outstanding} blocks outstanding")]
    Busy { name: String, outstanding: usize },

    #[error("pool {name} has been destroyed")]
    Destroyed { name: String },
}

/// Parameters of one pool, as they appear in the runtime
/// configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolParams {
    pub name: String,
    pub num_blocks: u32,
    /// Largest frame a block can hold.
    pub block_len: u32,
    #[serde(default)]
    pub uarea_size: u32,
}

impl PoolParams {
    pub fn new(name: &str, num_blocks: u32, block_len: u32) -> Self {
        Self { name: name.into(), num_blocks, block_len, uarea_size: 0 }
    }

    pub fn with_uarea(mut self, uarea_size: u32) -> Self {
        self.uarea_size = uarea_size;
        self
    }
}

impl Default for PoolParams {
    fn default() -> Self {
        Self::new("pkt", 512, 2048)
    }
}

/// Identity of a block: its pool and its index within that pool.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockId {
    pub pool: PoolId,
    pub index: u32,
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.pool, self.index)
    }
}

/// What a block was last constructed as.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferKind {
    Raw,
    Packet,
}

/// The generic block header. Owned by the pool; the packet layer only
/// writes the fields the pool delegates to it (`kind` and `size`).
#[derive(Clone, Debug)]
pub struct BufferHdr {
    id: BlockId,
    pub(crate) kind: BufferKind,
    /// Bytes in use, starting at the frame offset for packets.
    pub(crate) size: u32,
    room: u32,
}

impl BufferHdr {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Capacity of the data room, headroom included.
    pub fn room(&self) -> usize {
        self.room as usize
    }
}

#[repr(C)]
pub(crate) struct Block {
    pub(crate) hdr: BufferHdr,
    pub(crate) md: PacketMd,
    pub(crate) uarea: Box<[u8]>,
    pub(crate) data: Box<[u8]>,
}

impl Block {
    fn new(pool: PoolId, index: u32, params: &PoolParams) -> Box<Self> {
        let room = POOL_HEADROOM + params.block_len as usize;
        Box::new(Self {
            hdr: BufferHdr {
                id: BlockId { pool, index },
                kind: BufferKind::Raw,
                size: 0,
                room: room as u32,
            },
            md: PacketMd::new(0, params.uarea_size),
            uarea: vec![0u8; params.uarea_size as usize].into_boxed_slice(),
            data: vec![0u8; room].into_boxed_slice(),
        })
    }
}

struct FreeList {
    blocks: Vec<Box<Block>>,
    // Indexed by block index; true while a handle exists.
    claimed: Vec<bool>,
    outstanding: usize,
    destroyed: bool,
}

pub(crate) struct PoolInner {
    id: PoolId,
    params: PoolParams,
    headroom: usize,
    parse_opts: ParseOptions,
    log: Logger,
    free: Mutex<FreeList>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, FreeList> {
        // A panic while holding the lock cannot leave the free list
        // half updated, so a poisoned lock is still usable.
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn headroom(&self) -> usize {
        self.headroom
    }

    pub(crate) fn parse_opts(&self) -> &ParseOptions {
        &self.parse_opts
    }

    fn put(&self, block: Box<Block>) {
        let mut fl = self.lock();
        let idx = block.hdr.id.index as usize;
        if !fl.claimed[idx] {
            // Unique handles make this unreachable; keep the pool
            // consistent rather than pushing a duplicate.
            error!(self.log, "block returned while not claimed";
                "block" => %block.hdr.id);
            return;
        }
        fl.claimed[idx] = false;
        fl.outstanding -= 1;
        fl.blocks.push(block);
    }
}

/// A pool of preallocated blocks. Cloning the pool clones a handle to
/// the same blocks.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.params.name)
            .field("available", &self.available())
            .finish()
    }
}

impl BufferPool {
    /// Create a pool, taking the packet headroom, tailroom and parse
    /// options from the runtime configuration.
    pub fn create(
        ctx: &RuntimeCtx,
        id: PoolId,
        params: &PoolParams,
    ) -> Result<Self, PoolError> {
        let cfg = ctx.config();
        let headroom = usize::from(cfg.packet.headroom);
        let tailroom = usize::from(cfg.packet.tailroom);

        if headroom > POOL_HEADROOM {
            return Err(PoolError::InsufficientHeadroom {
                required: headroom,
                available: POOL_HEADROOM,
            });
        }

        if tailroom != POOL_TAILROOM {
            return Err(PoolError::TailroomUnsupported(tailroom));
        }

        if params.num_blocks == 0 || params.block_len == 0 {
            return Err(PoolError::InvalidParams(format!(
                "{}: num_blocks and block_len must be non-zero",
                params.name
            )));
        }

        let log = ctx.log().new(slog::o!(
            "pool" => params.name.clone(),
            "pool_id" => id.0,
        ));

        let blocks = (0..params.num_blocks)
            .rev()
            .map(|i| Block::new(id, i, params))
            .collect::<Vec<_>>();
        let claimed = vec![false; params.num_blocks as usize];

        info!(log, "pool created";
            "num_blocks" => params.num_blocks,
            "block_len" => params.block_len,
            "uarea_size" => params.uarea_size,
            "headroom" => headroom,
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                params: params.clone(),
                headroom,
                parse_opts: cfg.parser.clone(),
                log,
                free: Mutex::new(FreeList {
                    blocks,
                    claimed,
                    outstanding: 0,
                    destroyed: false,
                }),
            }),
        })
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.params.name
    }

    pub fn params(&self) -> &PoolParams {
        &self.inner.params
    }

    /// Headroom packets built from this pool start their frame at.
    pub fn headroom(&self) -> usize {
        self.inner.headroom
    }

    /// Claim a block able to hold `size` bytes.
    pub fn claim_block(&self, size: usize) -> Result<Buffer, PoolError> {
        let max = self.inner.params.block_len as usize;
        if size > max {
            return Err(PoolError::BlockTooLarge { requested: size, max });
        }

        let mut fl = self.inner.lock();
        if fl.destroyed {
            return Err(PoolError::Destroyed { name: self.name().into() });
        }

        let Some(mut block) = fl.blocks.pop() else {
            return Err(PoolError::Exhausted { name: self.name().into() });
        };
        fl.claimed[block.hdr.id.index as usize] = true;
        fl.outstanding += 1;
        drop(fl);

        block.hdr.kind = BufferKind::Raw;
        block.hdr.size = size as u32;
        Ok(Buffer { block: ManuallyDrop::new(block), pool: self.inner.clone() })
    }

    /// Return a block to this pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::ForeignBlock`] if `buf` was claimed from another
    /// pool. The block is still returned, to the pool it came from.
    pub fn release_block(&self, buf: Buffer) -> Result<(), PoolError> {
        let id = buf.id();
        if !Arc::ptr_eq(&buf.pool, &self.inner) {
            return Err(PoolError::ForeignBlock { pool: self.id(), block: id });
        }

        drop(buf);
        Ok(())
    }

    /// Blocks currently held by handles.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Blocks currently free.
    pub fn available(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Free the pool's blocks. Fails while any block is outstanding;
    /// after success every claim fails with [`PoolError::Destroyed`].
    pub fn destroy(&self) -> Result<(), PoolError> {
        let mut fl = self.inner.lock();
        if fl.destroyed {
            return Ok(());
        }

        let outstanding = fl.outstanding;
        if outstanding != 0 {
            error!(self.inner.log, "pool destroy with blocks outstanding";
                "outstanding" => outstanding);
            return Err(PoolError::Busy {
                name: self.name().into(),
                outstanding,
            });
        }

        fl.blocks = Vec::new();
        fl.destroyed = true;
        info!(self.inner.log, "pool destroyed");
        Ok(())
    }
}

/// A unique handle to a claimed block.
///
/// The block goes back to its pool when the handle is dropped.
pub struct Buffer {
    block: ManuallyDrop<Box<Block>>,
    pool: Arc<PoolInner>,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.block.hdr.id)
            .field("kind", &self.block.hdr.kind)
            .field("size", &self.block.hdr.size)
            .finish()
    }
}

impl Buffer {
    pub fn id(&self) -> BlockId {
        self.block.hdr.id
    }

    pub fn hdr(&self) -> &BufferHdr {
        &self.block.hdr
    }

    /// Bytes in use.
    pub fn len(&self) -> usize {
        self.block.hdr.size()
    }

    /// The whole data room.
    pub fn data(&self) -> &[u8] {
        &self.block.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.block.data
    }

    pub(crate) fn block(&self) -> &Block {
        &self.block
    }

    pub(crate) fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }

    pub(crate) fn pool(&self) -> &PoolInner {
        &self.pool
    }

    /// Is this block currently constructed as a packet?
    pub fn is_packet(&self) -> bool {
        self.block.hdr.kind == BufferKind::Packet
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Safety: `block` is never touched again after this point.
        let block = unsafe { ManuallyDrop::take(&mut self.block) };
        self.pool.put(block);
    }
}

impl From<Packet> for Buffer {
    /// Reinterpret a packet as its block. The block keeps its packet
    /// tag, so converting back with [`Packet::try_from`] succeeds.
    fn from(pkt: Packet) -> Self {
        pkt.into_buffer()
    }
}
