// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The runtime context and the built-in pool subsystem.
//!
//! There is no process-wide state: a [`RuntimeCtx`] is built once and
//! handed to everything that needs configuration or logging, so any
//! number of independent runtimes may exist side by side.

pub mod lifecycle;

use crate::config::RuntimeConfig;
use crate::pool::BufferPool;
use crate::pool::PoolError;
use crate::pool::PoolParams;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
pub use lifecycle::InitError;
pub use lifecycle::LocalCtx;
pub use lifecycle::LocalGuard;
pub use lifecycle::Sequencer;
pub use lifecycle::StageStatus;
pub use lifecycle::Subsystem;
pub use lifecycle::SubsystemError;
pub use lifecycle::TermError;
use pktmeta_api::PoolId;
use pktmeta_api::Stage;
use pktmeta_api::ThreadType;
use slog::Logger;
use slog::o;
use std::sync::Mutex;
use std::sync::MutexGuard;
use thiserror::Error;

/// What every subsystem is given: the configuration and a logger.
#[derive(Clone, Debug)]
pub struct RuntimeCtx {
    config: Arc<RuntimeConfig>,
    log: Logger,
}

impl RuntimeCtx {
    pub fn new(config: RuntimeConfig, log: Logger) -> Self {
        Self { config: Arc::new(config), log }
    }

    /// A context whose log output goes nowhere.
    pub fn discard(config: RuntimeConfig) -> Self {
        Self::new(config, Logger::root(slog::Discard, o!()))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("stage {0} is not up")]
    NotReady(Stage),

    #[error("no pool named {0}")]
    UnknownPool(String),

    #[error("a pool named {0} already exists")]
    DuplicatePool(String),

    #[error("pool table is full")]
    TooManyPools,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// The pools of one runtime, brought up at [`Stage::Pool`] from the
/// configured pool list.
#[derive(Debug, Default)]
pub struct PoolTable {
    pools: Mutex<Vec<BufferPool>>,
}

impl PoolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<BufferPool>> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<BufferPool> {
        self.lock().iter().find(|p| p.name() == name).cloned()
    }

    pub fn all(&self) -> Vec<BufferPool> {
        self.lock().clone()
    }

    fn create(
        &self,
        ctx: &RuntimeCtx,
        params: &PoolParams,
    ) -> Result<BufferPool, RuntimeError> {
        let mut pools = self.lock();
        if pools.iter().any(|p| p.name() == params.name) {
            return Err(RuntimeError::DuplicatePool(params.name.clone()));
        }

        let id = u16::try_from(pools.len())
            .map(PoolId)
            .map_err(|_| RuntimeError::TooManyPools)?;
        let pool = BufferPool::create(ctx, id, params)?;
        pools.push(pool.clone());
        Ok(pool)
    }

    /// Destroy every pool, newest first. Pools that still have blocks
    /// out are dropped from the table all the same; their memory goes
    /// away with the last handle.
    fn destroy_all(&self) -> Vec<PoolError> {
        let pools = core::mem::take(&mut *self.lock());
        pools.iter().rev().filter_map(|p| p.destroy().err()).collect()
    }
}

impl Subsystem for PoolTable {
    fn init_global(&self, ctx: &RuntimeCtx) -> Result<(), SubsystemError> {
        for params in &ctx.config().pools {
            if let Err(e) = self.create(ctx, params) {
                let _ = self.destroy_all();
                return Err(SubsystemError::new(format!(
                    "pool {}: {e}",
                    params.name
                )));
            }
        }
        Ok(())
    }

    fn term_global(&self, _ctx: &RuntimeCtx) -> Result<(), SubsystemError> {
        let errs = self.destroy_all();
        if errs.is_empty() {
            return Ok(());
        }

        let msg = errs.iter().map(|e| e.to_string()).collect::<Vec<_>>();
        Err(SubsystemError::new(msg.join("; ")))
    }
}

/// A sequencer with the built-in subsystems registered.
#[derive(Debug)]
pub struct Runtime {
    seq: Sequencer,
    pools: Arc<PoolTable>,
}

impl Runtime {
    pub fn new(ctx: RuntimeCtx) -> Result<Self, InitError> {
        let pools = Arc::new(PoolTable::new());
        let mut seq = Sequencer::new(ctx);
        seq.register(Stage::Pool, pools.clone())?;
        Ok(Self { seq, pools })
    }

    pub fn ctx(&self) -> &RuntimeCtx {
        self.seq.ctx()
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    /// Register a subsystem. [`Stage::Pool`] is taken by the pool
    /// table.
    pub fn register(
        &mut self,
        stage: Stage,
        sub: Arc<dyn Subsystem>,
    ) -> Result<(), InitError> {
        self.seq.register(stage, sub)
    }

    pub fn init(&mut self) -> Result<(), InitError> {
        self.seq.init_global()
    }

    pub fn term(&mut self) -> Result<(), TermError> {
        self.seq.term_global()
    }

    pub fn init_local(
        &self,
        thread_type: ThreadType,
    ) -> Result<LocalGuard<'_>, InitError> {
        self.seq.init_local(thread_type)
    }

    pub fn term_local(&self, guard: LocalGuard<'_>) -> Result<(), TermError> {
        self.seq.term_local(guard)
    }

    fn pools_ready(&self) -> Result<&PoolTable, RuntimeError> {
        if !self.seq.is_up(Stage::Pool) {
            return Err(RuntimeError::NotReady(Stage::Pool));
        }
        Ok(&self.pools)
    }

    /// Look up a configured pool. Fails until the pool stage is up.
    pub fn pool(&self, name: &str) -> Result<BufferPool, RuntimeError> {
        self.pools_ready()?
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownPool(name.into()))
    }

    pub fn pools(&self) -> Result<Vec<BufferPool>, RuntimeError> {
        Ok(self.pools_ready()?.all())
    }

    /// Create a pool beyond those configured. It is destroyed with the
    /// others when the pool stage terminates.
    pub fn create_pool(
        &self,
        params: &PoolParams,
    ) -> Result<BufferPool, RuntimeError> {
        self.pools_ready()?.create(self.ctx(), params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::packet::Packet;

    fn runtime(cfg: RuntimeConfig) -> Runtime {
        Runtime::new(RuntimeCtx::discard(cfg)).unwrap()
    }

    #[test]
    fn pools_need_stage() {
        let mut rt = runtime(RuntimeConfig::default());
        assert!(matches!(
            rt.pool("pkt"),
            Err(RuntimeError::NotReady(Stage::Pool))
        ));
        assert!(matches!(
            rt.create_pool(&PoolParams::new("x", 1, 64)),
            Err(RuntimeError::NotReady(Stage::Pool))
        ));

        rt.init().unwrap();
        let pool = rt.pool("pkt").unwrap();
        assert_eq!(pool.id(), PoolId(0));
        assert!(matches!(rt.pool("nope"), Err(RuntimeError::UnknownPool(_))));

        rt.term().unwrap();
        assert!(matches!(
            rt.pool("pkt"),
            Err(RuntimeError::NotReady(Stage::Pool))
        ));
        assert!(matches!(
            pool.claim_block(64),
            Err(PoolError::Destroyed { .. })
        ));
    }

    #[test]
    fn pool_stage_is_reserved() {
        struct Nop;
        impl Subsystem for Nop {
            fn init_global(&self, _: &RuntimeCtx) -> Result<(), SubsystemError> {
                Ok(())
            }
            fn term_global(&self, _: &RuntimeCtx) -> Result<(), SubsystemError> {
                Ok(())
            }
        }

        let mut rt = runtime(RuntimeConfig::default());
        assert!(matches!(
            rt.register(Stage::Pool, Arc::new(Nop)),
            Err(InitError::DuplicateStage(Stage::Pool))
        ));
        rt.register(Stage::Queue, Arc::new(Nop)).unwrap();
    }

    #[test]
    fn extra_pools() {
        let mut rt = runtime(RuntimeConfig::default());
        rt.init().unwrap();
        let p = rt.create_pool(&PoolParams::new("jumbo", 4, 9216)).unwrap();
        assert_eq!(p.id(), PoolId(1));
        assert!(matches!(
            rt.create_pool(&PoolParams::new("jumbo", 4, 9216)),
            Err(RuntimeError::DuplicatePool(_))
        ));
        assert_eq!(rt.pools().unwrap().len(), 2);
        rt.term().unwrap();
    }

    #[test]
    fn bad_pool_fails_stage() {
        let mut cfg = RuntimeConfig::default();
        cfg.pools.push(PoolParams::new("empty", 0, 64));
        let mut rt = runtime(cfg);

        match rt.init().unwrap_err() {
            InitError::StageFailed { stage, .. } => {
                assert_eq!(stage, Stage::Pool)
            }
            e => panic!("unexpected error: {e}"),
        }
        assert_eq!(rt.sequencer().status(Stage::Pool), StageStatus::NotRun);
        assert_eq!(rt.sequencer().status(Stage::Thread), StageStatus::Down);
    }

    #[test]
    fn term_reports_busy_pool() {
        let mut rt = runtime(RuntimeConfig::default());
        rt.init().unwrap();
        let pool = rt.pool("pkt").unwrap();
        let pkt = Packet::alloc(&pool, 60).unwrap();

        let err = rt.term().unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, Stage::Pool);
        assert_eq!(rt.sequencer().reached(), None);

        // The block still goes home once released.
        drop(pkt);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn local_pool_stage() {
        let mut rt = runtime(RuntimeConfig::default());
        rt.init().unwrap();
        let guard = rt.init_local(ThreadType::Worker).unwrap();
        assert!(guard.stages().contains(&Stage::Pool));
        rt.term_local(guard).unwrap();
        rt.term().unwrap();
    }
}
