//! Growth-stabilization watcher
//!
//! Polls a size metric and resolves once it has stayed identical across a run
//! of consecutive samples. Without `max_wait` a page that keeps growing is
//! waited on forever; callers that need bounded latency set one or cancel.

use crate::page::SizeSource;
use crate::WaitOutcome;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_REQUIRED_UNCHANGED: u32 = 5;

/// Polling parameters for `watch_growth`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthOptions {
    /// Delay between samples
    pub interval: Duration,
    /// Consecutive unchanged comparisons required to resolve
    pub required_unchanged: u32,
    /// Overall bound; `None` waits indefinitely
    pub max_wait: Option<Duration>,
}

impl Default for GrowthOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            required_unchanged: DEFAULT_REQUIRED_UNCHANGED,
            max_wait: None,
        }
    }
}

/// Summary of one `watch_growth` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthReport {
    pub outcome: WaitOutcome,
    /// Samples read, including the initial one
    pub samples: u64,
    /// Last sample read
    pub extent: u64,
}

/// Run length of consecutive identical samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizationCounter {
    last: u64,
    run: u32,
}

impl StabilizationCounter {
    /// The initial sample is a baseline only and does not start a run.
    pub fn new(initial: u64) -> Self {
        Self { last: initial, run: 0 }
    }

    /// Compare `sample` with the previous one and return the updated run.
    pub fn observe(&mut self, sample: u64) -> u32 {
        if sample == self.last {
            self.run += 1;
        } else {
            self.run = 0;
            self.last = sample;
        }
        self.run
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Sample `source` every `options.interval` until it has been unchanged for
/// `options.required_unchanged` consecutive comparisons.
pub async fn watch_growth<S: SizeSource + ?Sized>(
    source: &S,
    options: &GrowthOptions,
    cancel: &CancellationToken,
) -> GrowthReport {
    let started = Instant::now();
    let mut counter = StabilizationCounter::new(source.sample());
    let mut samples: u64 = 1;

    let max_wait = async {
        match options.max_wait {
            Some(limit) => tokio::time::sleep_until(started + limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(max_wait);

    let outcome = loop {
        if counter.run() >= options.required_unchanged {
            break WaitOutcome::Settled;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break WaitOutcome::Cancelled,
            _ = &mut max_wait => break WaitOutcome::TimedOut,
            _ = tokio::time::sleep(options.interval) => {}
        }

        let sample = source.sample();
        samples += 1;
        let previous = counter.last();
        let run = counter.observe(sample);
        if run == 0 {
            debug!("extent changed {} -> {}, streak reset", previous, sample);
        } else {
            debug!("extent {} unchanged ({}/{})", sample, run, options.required_unchanged);
        }
    };

    match outcome {
        WaitOutcome::Settled => info!(
            "extent stable at {} after {} samples ({}ms)",
            counter.last(),
            samples,
            started.elapsed().as_millis()
        ),
        WaitOutcome::TimedOut => warn!(
            "extent still changing after {}ms (last {}), giving up",
            started.elapsed().as_millis(),
            counter.last()
        ),
        WaitOutcome::Cancelled => debug!("growth watcher cancelled after {} samples", samples),
    }

    GrowthReport {
        outcome,
        samples,
        extent: counter.last(),
    }
}
