// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A counting global allocator, exposed to `criterion` as a pair of
//! measurements. Parsing and copying packets should never allocate;
//! these measurements show it.

use super::MeasurementInfo;
use criterion::Criterion;
use criterion::Throughput;
use criterion::measurement::Measurement;
use criterion::measurement::ValueFormatter;
use std::alloc::GlobalAlloc;
use std::alloc::Layout;
use std::alloc::System;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[global_allocator]
static COUNTER: CountingAlloc = CountingAlloc {
    allocs: AtomicU64::new(0),
    bytes: AtomicU64::new(0),
};

// Counts are process wide: only one benchmark may run at a time.
struct CountingAlloc {
    allocs: AtomicU64,
    bytes: AtomicU64,
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(layout.size() as u64, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Allocations made while running `f`.
pub fn allocs_during<R>(f: impl FnOnce() -> R) -> (u64, R) {
    let before = COUNTER.allocs.load(Ordering::Relaxed);
    let r = f();
    (COUNTER.allocs.load(Ordering::Relaxed) - before, r)
}

/// Report raw counts, unscaled.
struct Unit(&'static str);

impl ValueFormatter for Unit {
    fn scale_values(&self, _typical: f64, _values: &mut [f64]) -> &'static str {
        self.0
    }

    fn scale_throughputs(
        &self,
        _typical: f64,
        _throughput: &Throughput,
        _values: &mut [f64],
    ) -> &'static str {
        self.0
    }

    fn scale_for_machines(&self, _values: &mut [f64]) -> &'static str {
        self.0
    }
}

static COUNT_UNIT: Unit = Unit("");
static BYTES_UNIT: Unit = Unit("B");

/// A measurement over one of the allocation counters.
pub struct Allocs<const BYTES: bool>;

impl<const BYTES: bool> Allocs<BYTES> {
    fn read() -> u64 {
        if BYTES {
            COUNTER.bytes.load(Ordering::Relaxed)
        } else {
            COUNTER.allocs.load(Ordering::Relaxed)
        }
    }
}

impl<const BYTES: bool> Measurement for Allocs<BYTES> {
    type Intermediate = u64;
    type Value = u64;

    fn start(&self) -> Self::Intermediate {
        Self::read()
    }

    fn end(&self, i: Self::Intermediate) -> Self::Value {
        Self::read() - i
    }

    fn add(&self, v1: &Self::Value, v2: &Self::Value) -> Self::Value {
        v1 + v2
    }

    fn zero(&self) -> Self::Value {
        0
    }

    fn to_f64(&self, value: &Self::Value) -> f64 {
        *value as f64
    }

    fn formatter(&self) -> &dyn ValueFormatter {
        if BYTES { &BYTES_UNIT } else { &COUNT_UNIT }
    }
}

impl<const BYTES: bool> MeasurementInfo for Allocs<BYTES> {
    fn label() -> &'static str {
        if BYTES { "alloc_sz" } else { "alloc_ct" }
    }
}

/// A [`Criterion`] tuned for allocation counts: every sample of a
/// non-allocating path reads the same zero, so statistics are kept to
/// a minimum.
pub fn alloc_crit<const BYTES: bool>() -> Criterion<Allocs<BYTES>> {
    Criterion::default()
        .with_measurement(Allocs::<BYTES>)
        .sample_size(10)
        .warm_up_time(Duration::from_nanos(1))
        .measurement_time(Duration::from_micros(10))
        .nresamples(1)
        .without_plots()
}
