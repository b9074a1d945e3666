//! Run identifier generation.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of run identifiers. Ids must be unique for the lifetime of the source.
pub trait RunIdSource {
    fn next_run_id(&self) -> String;
}

/// Millisecond wall-clock ids (`1700000000123`).
///
/// When two ids are requested within the same millisecond, or the clock steps
/// backwards, the id is bumped past the previous one so ids strictly increase.
#[derive(Debug, Default)]
pub struct ClockRunIds {
    last: AtomicI64,
}

impl ClockRunIds {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    fn next_after(&self, now_ms: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl RunIdSource for ClockRunIds {
    fn next_run_id(&self) -> String {
        self.next_after(Utc::now().timestamp_millis()).to_string()
    }
}
