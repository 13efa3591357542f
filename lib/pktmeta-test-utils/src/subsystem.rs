// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A subsystem that records every lifecycle call made to it.

use pktmeta::runtime::LocalCtx;
use pktmeta::runtime::RuntimeCtx;
use pktmeta::runtime::Subsystem;
use pktmeta::runtime::SubsystemError;
use pktmeta_api::Stage;
use pktmeta_api::ThreadType;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Call {
    Init(Stage),
    Term(Stage),
    InitLocal(Stage, ThreadType),
    TermLocal(Stage, ThreadType),
}

/// A shared, ordered log of calls across many recorders.
#[derive(Debug, Default)]
pub struct Journal {
    calls: Mutex<Vec<Call>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Drain the calls recorded so far.
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

/// Records its calls into a [`Journal`], failing where told to.
#[derive(Debug)]
pub struct Recorder {
    stage: Stage,
    journal: Arc<Journal>,
    fail_init: bool,
    fail_term: bool,
    fail_local: bool,
    fail_term_local: bool,
}

impl Recorder {
    pub fn new(stage: Stage, journal: &Arc<Journal>) -> Self {
        Self {
            stage,
            journal: journal.clone(),
            fail_init: false,
            fail_term: false,
            fail_local: false,
            fail_term_local: false,
        }
    }

    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn fail_term(mut self) -> Self {
        self.fail_term = true;
        self
    }

    pub fn fail_local(mut self) -> Self {
        self.fail_local = true;
        self
    }

    pub fn fail_term_local(mut self) -> Self {
        self.fail_term_local = true;
        self
    }

    fn outcome(&self, fail: bool, what: &str) -> Result<(), SubsystemError> {
        if fail {
            Err(SubsystemError::new(format!("{} {what} failed", self.stage)))
        } else {
            Ok(())
        }
    }
}

impl Subsystem for Recorder {
    fn init_global(&self, _ctx: &RuntimeCtx) -> Result<(), SubsystemError> {
        self.journal.push(Call::Init(self.stage));
        self.outcome(self.fail_init, "init")
    }

    fn term_global(&self, _ctx: &RuntimeCtx) -> Result<(), SubsystemError> {
        self.journal.push(Call::Term(self.stage));
        self.outcome(self.fail_term, "term")
    }

    fn init_local(
        &self,
        _ctx: &RuntimeCtx,
        lctx: &LocalCtx,
    ) -> Result<(), SubsystemError> {
        self.journal.push(Call::InitLocal(self.stage, lctx.thread_type));
        self.outcome(self.fail_local, "local init")
    }

    fn term_local(
        &self,
        _ctx: &RuntimeCtx,
        lctx: &LocalCtx,
    ) -> Result<(), SubsystemError> {
        self.journal.push(Call::TermLocal(self.stage, lctx.thread_type));
        self.outcome(self.fail_term_local, "local term")
    }
}
