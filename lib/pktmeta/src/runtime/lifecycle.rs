// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ordered bring-up and tear-down of the runtime's subsystems.
//!
//! Every subsystem registers at one fixed [`Stage`]. Global init runs
//! the stages in order; if stage *k* fails, the stages before it are
//! terminated in reverse and the failure names *k*. Stage *k* itself
//! is never terminated: a failing init must clean up after itself.
//!
//! Tear-down runs every stage that came up, in reverse, even when some
//! of them fail, and reports the failures once the unwind completes.
//!
//! Stages with a per-thread variant are run by each participating
//! thread through [`Sequencer::init_local`], which hands back a
//! [`LocalGuard`]. The guard borrows the sequencer, so global
//! tear-down, which needs it mutably, cannot start while any thread
//! still holds local state.

use super::RuntimeCtx;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use pktmeta_api::Stage;
use pktmeta_api::ThreadType;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use thiserror::Error;

/// Number of stages with a per-thread variant.
pub const LOCAL_STAGES: usize = {
    let mut n = 0;
    let mut i = 0;
    while i < Stage::COUNT {
        if Stage::ALL[i].has_local() {
            n += 1;
        }
        i += 1;
    }
    n
};

/// The failure a stage function reports. Stage functions succeed or
/// fail as a whole.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{msg}")]
pub struct SubsystemError {
    msg: String,
}

impl SubsystemError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self { msg: msg.into() }
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }
}

/// Per-thread context for local stage functions.
#[derive(Clone, Copy, Debug)]
pub struct LocalCtx {
    pub thread_type: ThreadType,
}

/// A runtime subsystem as seen by the sequencer.
pub trait Subsystem: Send + Sync {
    fn init_global(&self, ctx: &RuntimeCtx) -> Result<(), SubsystemError>;

    /// Undo `init_global`. Must be safe to call whatever state a
    /// previous init left behind.
    fn term_global(&self, ctx: &RuntimeCtx) -> Result<(), SubsystemError>;

    fn init_local(
        &self,
        _ctx: &RuntimeCtx,
        _lctx: &LocalCtx,
    ) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn term_local(
        &self,
        _ctx: &RuntimeCtx,
        _lctx: &LocalCtx,
    ) -> Result<(), SubsystemError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum StageStatus {
    #[default]
    NotRun,
    Up,
    /// Was up and has been terminated.
    Down,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::NotRun => "not run",
            Self::Up => "up",
            Self::Down => "down",
        };
        write!(f, "{s}")
    }
}

/// Every term failure from one unwind, in the order they happened.
#[derive(Clone, Debug, Default, Eq, PartialEq, Error)]
#[error("{} stage(s) failed to terminate: {}", .failures.len(), list_failures(.failures))]
pub struct TermError {
    pub failures: Vec<(Stage, SubsystemError)>,
}

fn list_failures(failures: &[(Stage, SubsystemError)]) -> String {
    failures
        .iter()
        .map(|(stage, err)| format!("{stage}: {err}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl TermError {
    fn into_result(self) -> Result<(), Self> {
        if self.failures.is_empty() { Ok(()) } else { Err(self) }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("stage {stage} failed to initialize")]
    StageFailed {
        stage: Stage,
        #[source]
        source: SubsystemError,
        /// Term failures hit while unwinding the stages before it.
        rollback: Vec<(Stage, SubsystemError)>,
    },

    #[error("runtime already initialized up to stage {reached}")]
    AlreadyInitialized { reached: Stage },

    #[error("a subsystem is already registered at stage {0}")]
    DuplicateStage(Stage),

    #[error("global stage {0} is not up")]
    NotReady(Stage),

    #[error("local stage {stage} failed to initialize")]
    LocalStageFailed {
        stage: Stage,
        #[source]
        source: SubsystemError,
        rollback: Vec<(Stage, SubsystemError)>,
    },
}

pub struct Sequencer {
    ctx: RuntimeCtx,
    slots: [Option<Arc<dyn Subsystem>>; Stage::COUNT],
    status: [StageStatus; Stage::COUNT],
    reached: Option<Stage>,
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("status", &self.status)
            .field("reached", &self.reached)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    pub fn new(ctx: RuntimeCtx) -> Self {
        Self {
            ctx,
            slots: core::array::from_fn(|_| None),
            status: [StageStatus::NotRun; Stage::COUNT],
            reached: None,
        }
    }

    pub fn ctx(&self) -> &RuntimeCtx {
        &self.ctx
    }

    /// Register `sub` at `stage`. Each stage holds at most one
    /// subsystem; a stage nobody registers at succeeds trivially.
    pub fn register(
        &mut self,
        stage: Stage,
        sub: Arc<dyn Subsystem>,
    ) -> Result<(), InitError> {
        if let Some(reached) = self.reached {
            return Err(InitError::AlreadyInitialized { reached });
        }

        let slot = &mut self.slots[stage.index()];
        if slot.is_some() {
            return Err(InitError::DuplicateStage(stage));
        }

        *slot = Some(sub);
        Ok(())
    }

    pub fn is_registered(&self, stage: Stage) -> bool {
        self.slots[stage.index()].is_some()
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.status[stage.index()]
    }

    /// The highest stage brought up by global init, if any.
    pub fn reached(&self) -> Option<Stage> {
        self.reached
    }

    pub fn is_up(&self, stage: Stage) -> bool {
        self.status(stage) == StageStatus::Up
    }

    /// Bring every stage up, in order.
    pub fn init_global(&mut self) -> Result<(), InitError> {
        if let Some(reached) = self.reached {
            return Err(InitError::AlreadyInitialized { reached });
        }

        for stage in Stage::ALL {
            let res = match &self.slots[stage.index()] {
                Some(sub) => {
                    debug!(self.ctx.log(), "init stage"; "stage" => %stage);
                    sub.init_global(&self.ctx)
                }
                None => Ok(()),
            };

            if let Err(source) = res {
                error!(self.ctx.log(), "stage init failed";
                    "stage" => %stage,
                    "error" => %source,
                );

                let rollback = self.unwind_global();
                if !rollback.failures.is_empty() {
                    warn!(self.ctx.log(), "rollback incomplete";
                        "stage" => %stage,
                        "error" => %rollback,
                    );
                }

                return Err(InitError::StageFailed {
                    stage,
                    source,
                    rollback: rollback.failures,
                });
            }

            self.status[stage.index()] = StageStatus::Up;
            self.reached = Some(stage);
        }

        info!(self.ctx.log(), "runtime initialized");
        Ok(())
    }

    /// Terminate every stage that is up, in reverse order.
    ///
    /// All stages are attempted; their failures are returned together
    /// once the unwind is complete.
    pub fn term_global(&mut self) -> Result<(), TermError> {
        if self.reached.is_none() {
            return Ok(());
        }

        let res = self.unwind_global();
        if res.failures.is_empty() {
            info!(self.ctx.log(), "runtime terminated");
        } else {
            error!(self.ctx.log(), "runtime terminated with errors";
                "error" => %res,
            );
        }
        res.into_result()
    }

    fn unwind_global(&mut self) -> TermError {
        let mut res = TermError::default();

        for stage in Stage::ALL.into_iter().rev() {
            if self.status[stage.index()] != StageStatus::Up {
                continue;
            }

            if let Some(sub) = &self.slots[stage.index()] {
                debug!(self.ctx.log(), "term stage"; "stage" => %stage);
                if let Err(e) = sub.term_global(&self.ctx) {
                    error!(self.ctx.log(), "stage term failed";
                        "stage" => %stage,
                        "error" => %e,
                    );
                    res.failures.push((stage, e));
                }
            }

            self.status[stage.index()] = StageStatus::Down;
        }

        self.reached = None;
        res
    }

    /// Run the local variant of every stage that has one, for the
    /// calling thread.
    ///
    /// Each local stage requires its global stage to be up. On
    /// failure the local stages this call completed are terminated in
    /// reverse.
    pub fn init_local(
        &self,
        thread_type: ThreadType,
    ) -> Result<LocalGuard<'_>, InitError> {
        let mut guard = LocalGuard {
            seq: self,
            lctx: LocalCtx { thread_type },
            done: heapless::Vec::new(),
        };

        for stage in Stage::ALL.into_iter().filter(|s| s.has_local()) {
            if !self.is_up(stage) {
                // Guard drop unwinds anything done so far.
                return Err(InitError::NotReady(stage));
            }

            let Some(sub) = &self.slots[stage.index()] else {
                continue;
            };

            if let Err(source) = sub.init_local(&self.ctx, &guard.lctx) {
                error!(self.ctx.log(), "local stage init failed";
                    "stage" => %stage,
                    "thread_type" => %thread_type,
                    "error" => %source,
                );
                let rollback = guard.unwind();
                return Err(InitError::LocalStageFailed {
                    stage,
                    source,
                    rollback: rollback.failures,
                });
            }

            // Sized to hold every stage with a local variant.
            let _ = guard.done.push(stage);
        }

        Ok(guard)
    }

    /// Terminate the calling thread's local stages.
    pub fn term_local(&self, mut guard: LocalGuard<'_>) -> Result<(), TermError> {
        guard.unwind().into_result()
    }
}

/// The local stages one thread has brought up. Dropping the guard
/// terminates them; [`Sequencer::term_local`] does the same and
/// reports failures.
pub struct LocalGuard<'a> {
    seq: &'a Sequencer,
    lctx: LocalCtx,
    done: heapless::Vec<Stage, LOCAL_STAGES>,
}

impl LocalGuard<'_> {
    pub fn thread_type(&self) -> ThreadType {
        self.lctx.thread_type
    }

    /// The local stages that are up for this thread, in init order.
    pub fn stages(&self) -> &[Stage] {
        &self.done
    }

    fn unwind(&mut self) -> TermError {
        let seq = self.seq;
        let mut res = TermError::default();

        while let Some(stage) = self.done.pop() {
            let Some(sub) = &seq.slots[stage.index()] else {
                continue;
            };

            if let Err(e) = sub.term_local(&seq.ctx, &self.lctx) {
                error!(seq.ctx.log(), "local stage term failed";
                    "stage" => %stage,
                    "thread_type" => %self.lctx.thread_type,
                    "error" => %e,
                );
                res.failures.push((stage, e));
            }
        }

        res
    }
}

impl fmt::Debug for LocalGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LocalGuard")
            .field("lctx", &self.lctx)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Drop for LocalGuard<'_> {
    fn drop(&mut self) {
        let _ = self.unwind();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn local_stage_count() {
        assert_eq!(LOCAL_STAGES, 4);
    }

    #[test]
    fn nothing_registered() {
        let mut seq =
            Sequencer::new(RuntimeCtx::discard(RuntimeConfig::default()));
        seq.init_global().unwrap();
        assert_eq!(seq.reached(), Some(Stage::NameTable));
        assert!(Stage::ALL.iter().all(|s| seq.is_up(*s)));

        let guard = seq.init_local(ThreadType::Worker).unwrap();
        assert!(guard.stages().is_empty());
        seq.term_local(guard).unwrap();

        seq.term_global().unwrap();
        assert_eq!(seq.reached(), None);
        assert!(Stage::ALL.iter().all(|s| seq.status(*s) == StageStatus::Down));
    }
}
