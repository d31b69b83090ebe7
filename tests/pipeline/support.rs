//! Test processors and helpers shared by the pipeline suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use order_pipeline::{OrderId, OrderProcessor, ProcessorError};

/// Processor that fails while `failing` is set and counts calls per order.
#[derive(Default)]
pub struct SwitchProcessor {
    failing: AtomicBool,
    calls: Mutex<HashMap<OrderId, usize>>,
}

impl SwitchProcessor {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let processor = Self::default();
        processor.set_failing(true);
        processor
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self, order_id: OrderId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl OrderProcessor for SwitchProcessor {
    fn process(&self, order_id: OrderId) -> Result<(), ProcessorError> {
        *self.calls.lock().unwrap().entry(order_id).or_insert(0) += 1;
        if self.failing.load(Ordering::SeqCst) {
            Err(ProcessorError::new("downstream unavailable"))
        } else {
            Ok(())
        }
    }
}

/// Processor that fails the first `failures` calls for every order.
pub struct FlakyProcessor {
    failures: usize,
    calls: Mutex<HashMap<OrderId, usize>>,
}

impl FlakyProcessor {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl OrderProcessor for FlakyProcessor {
    fn process(&self, order_id: OrderId) -> Result<(), ProcessorError> {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(order_id).or_insert(0);
        *count += 1;
        if *count <= self.failures {
            Err(ProcessorError::new(format!("attempt {count} failed")))
        } else {
            Ok(())
        }
    }
}

/// Poll `check` until it returns true or `timeout` passes.
pub fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
