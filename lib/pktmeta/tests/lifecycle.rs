// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Stage ordering, rollback and per-thread state of the sequencer,
//! driven through recording subsystems.

use pktmeta::config::RuntimeConfig;
use pktmeta::runtime::InitError;
use pktmeta::runtime::RuntimeCtx;
use pktmeta::runtime::Sequencer;
use pktmeta::runtime::StageStatus;
use pktmeta::runtime::lifecycle::LOCAL_STAGES;
use pktmeta_api::Stage;
use pktmeta_api::ThreadType;
use pktmeta_test_utils::Call;
use pktmeta_test_utils::Journal;
use pktmeta_test_utils::Recorder;
use std::sync::Arc;

fn sequencer() -> Sequencer {
    Sequencer::new(RuntimeCtx::discard(RuntimeConfig::default()))
}

/// A sequencer with a recorder at every stage, each passed through
/// `adjust` before registration.
fn recorded<F>(adjust: F) -> (Sequencer, Arc<Journal>)
where
    F: Fn(Stage, Recorder) -> Recorder,
{
    let journal = Journal::new();
    let mut seq = sequencer();
    for stage in Stage::ALL {
        let rec = adjust(stage, Recorder::new(stage, &journal));
        seq.register(stage, Arc::new(rec)).unwrap();
    }
    (seq, journal)
}

fn plain(_: Stage, rec: Recorder) -> Recorder {
    rec
}

const LOCAL: [Stage; LOCAL_STAGES] =
    [Stage::Ishm, Stage::Thread, Stage::Pool, Stage::PktIo];

#[test]
fn full_cycle() {
    let (mut seq, journal) = recorded(plain);
    seq.init_global().unwrap();
    assert_eq!(seq.reached(), Some(Stage::NameTable));
    let inits: Vec<_> = Stage::ALL.iter().map(|s| Call::Init(*s)).collect();
    assert_eq!(journal.take(), inits);

    seq.term_global().unwrap();
    let terms: Vec<_> =
        Stage::ALL.iter().rev().map(|s| Call::Term(*s)).collect();
    assert_eq!(journal.take(), terms);
    assert_eq!(seq.reached(), None);
    assert!(Stage::ALL.iter().all(|s| seq.status(*s) == StageStatus::Down));

    // A second term is a no-op.
    seq.term_global().unwrap();
    assert!(journal.take().is_empty());
}

#[test]
fn failure_rolls_back_prior_stages() {
    let (mut seq, journal) = recorded(|stage, rec| {
        if stage == Stage::Queue { rec.fail_init() } else { rec }
    });

    match seq.init_global().unwrap_err() {
        InitError::StageFailed { stage, rollback, .. } => {
            assert_eq!(stage, Stage::Queue);
            assert!(rollback.is_empty());
        }
        e => panic!("unexpected error: {e}"),
    }

    let k = Stage::Queue.index();
    let mut want: Vec<_> =
        Stage::ALL[..=k].iter().map(|s| Call::Init(*s)).collect();
    want.extend(Stage::ALL[..k].iter().rev().map(|s| Call::Term(*s)));
    assert_eq!(journal.take(), want);

    for stage in &Stage::ALL[..k] {
        assert_eq!(seq.status(*stage), StageStatus::Down);
    }
    for stage in &Stage::ALL[k..] {
        assert_eq!(seq.status(*stage), StageStatus::NotRun);
    }
    assert_eq!(seq.reached(), None);
}

#[test]
fn first_stage_failure_terms_nothing() {
    let (mut seq, journal) = recorded(|stage, rec| {
        if stage == Stage::CpuMask { rec.fail_init() } else { rec }
    });
    assert!(seq.init_global().is_err());
    assert_eq!(journal.take(), vec![Call::Init(Stage::CpuMask)]);
}

#[test]
fn rollback_failures_are_reported() {
    let (mut seq, _) = recorded(|stage, rec| match stage {
        Stage::Sched => rec.fail_init(),
        Stage::Ishm | Stage::Time => rec.fail_term(),
        _ => rec,
    });

    match seq.init_global().unwrap_err() {
        InitError::StageFailed { stage, source, rollback } => {
            assert_eq!(stage, Stage::Sched);
            assert!(source.msg().contains("init"));
            let failed: Vec<_> = rollback.iter().map(|(s, _)| *s).collect();
            assert_eq!(failed, vec![Stage::Ishm, Stage::Time]);
        }
        e => panic!("unexpected error: {e}"),
    }
}

#[test]
fn term_continues_past_failures() {
    let (mut seq, journal) = recorded(|stage, rec| match stage {
        Stage::Pool | Stage::Crypto => rec.fail_term(),
        _ => rec,
    });
    seq.init_global().unwrap();
    journal.take();

    let err = seq.term_global().unwrap_err();
    let failed: Vec<_> = err.failures.iter().map(|(s, _)| *s).collect();
    assert_eq!(failed, vec![Stage::Crypto, Stage::Pool]);
    assert_eq!(journal.take().len(), Stage::COUNT);
    assert_eq!(seq.reached(), None);
}

#[test]
fn empty_slots_are_trivial() {
    let journal = Journal::new();
    let mut seq = sequencer();
    seq.register(Stage::Pool, Arc::new(Recorder::new(Stage::Pool, &journal)))
        .unwrap();
    seq.init_global().unwrap();
    assert!(seq.is_up(Stage::CpuMask));
    assert!(!seq.is_registered(Stage::CpuMask));
    assert_eq!(journal.take(), vec![Call::Init(Stage::Pool)]);
}

#[test]
fn registration_rules() {
    let journal = Journal::new();
    let mut seq = sequencer();
    let rec = || Arc::new(Recorder::new(Stage::Timer, &journal));
    seq.register(Stage::Timer, rec()).unwrap();
    assert!(matches!(
        seq.register(Stage::Timer, rec()),
        Err(InitError::DuplicateStage(Stage::Timer))
    ));

    seq.init_global().unwrap();
    assert!(matches!(
        seq.init_global(),
        Err(InitError::AlreadyInitialized { reached: Stage::NameTable })
    ));
    assert!(matches!(
        seq.register(Stage::Crypto, rec()),
        Err(InitError::AlreadyInitialized { .. })
    ));
}

#[test]
fn local_requires_global() {
    let (seq, journal) = recorded(plain);
    assert!(matches!(
        seq.init_local(ThreadType::Worker),
        Err(InitError::NotReady(Stage::Ishm))
    ));
    assert!(journal.take().is_empty());
}

#[test]
fn local_cycle() {
    let (mut seq, journal) = recorded(plain);
    seq.init_global().unwrap();
    journal.take();

    let tt = ThreadType::Worker;
    let guard = seq.init_local(tt).unwrap();
    assert_eq!(guard.stages(), &LOCAL);
    assert_eq!(guard.thread_type(), tt);
    seq.term_local(guard).unwrap();

    let mut want: Vec<_> = LOCAL.iter().map(|s| Call::InitLocal(*s, tt)).collect();
    want.extend(LOCAL.iter().rev().map(|s| Call::TermLocal(*s, tt)));
    assert_eq!(journal.take(), want);

    // Dropping a guard unwinds too.
    drop(seq.init_local(ThreadType::Control).unwrap());
    let calls = journal.take();
    assert_eq!(calls.len(), 2 * LOCAL_STAGES);
    assert_eq!(
        calls.last(),
        Some(&Call::TermLocal(Stage::Ishm, ThreadType::Control))
    );

    // Local state never moves the global marker.
    assert_eq!(seq.reached(), Some(Stage::NameTable));
    seq.term_global().unwrap();
}

#[test]
fn local_failure_rolls_back() {
    let (mut seq, journal) = recorded(|stage, rec| {
        if stage == Stage::Pool { rec.fail_local() } else { rec }
    });
    seq.init_global().unwrap();
    journal.take();

    let tt = ThreadType::Worker;
    match seq.init_local(tt).unwrap_err() {
        InitError::LocalStageFailed { stage, rollback, .. } => {
            assert_eq!(stage, Stage::Pool);
            assert!(rollback.is_empty());
        }
        e => panic!("unexpected error: {e}"),
    }

    assert_eq!(
        journal.take(),
        vec![
            Call::InitLocal(Stage::Ishm, tt),
            Call::InitLocal(Stage::Thread, tt),
            Call::InitLocal(Stage::Pool, tt),
            Call::TermLocal(Stage::Thread, tt),
            Call::TermLocal(Stage::Ishm, tt),
        ]
    );
}

#[test]
fn local_term_reports_every_failure() {
    let (mut seq, journal) = recorded(|stage, rec| match stage {
        Stage::Thread | Stage::PktIo => rec.fail_term_local(),
        _ => rec,
    });
    seq.init_global().unwrap();
    journal.take();

    let guard = seq.init_local(ThreadType::Control).unwrap();
    let err = seq.term_local(guard).unwrap_err();
    let failed: Vec<_> = err.failures.iter().map(|(s, _)| *s).collect();
    assert_eq!(failed, vec![Stage::PktIo, Stage::Thread]);
    assert_eq!(journal.take().len(), 2 * LOCAL_STAGES);
    seq.term_global().unwrap();
}

#[test]
fn workers_in_parallel() {
    let (mut seq, journal) = recorded(plain);
    seq.init_global().unwrap();
    journal.take();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let guard = seq.init_local(ThreadType::Worker).unwrap();
                seq.term_local(guard).unwrap();
            });
        }
    });

    let calls = journal.take();
    assert_eq!(calls.len(), 4 * 2 * LOCAL_STAGES);
    assert!(calls.iter().all(|c| matches!(
        c,
        Call::InitLocal(_, ThreadType::Worker)
            | Call::TermLocal(_, ThreadType::Worker)
    )));
    seq.term_global().unwrap();
}
