// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sleep abstraction so cooldown (§4.1.1), the 409-retry cadence (§4.4), and
//! the operation poll tick (§4.3) can be driven by a fake clock in tests
//! instead of actually blocking for minutes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Sleeper: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer wheel.
#[derive(Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fake sleeper that records requested durations and returns immediately.
///
/// Tests assert on `durations()` to verify cooldown/retry cadence without
/// actually waiting.
#[derive(Clone, Default)]
pub struct FakeSleeper {
    durations: Arc<Mutex<Vec<Duration>>>,
}

impl FakeSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.durations.lock().clone()
    }

    pub fn sleep_count(&self) -> usize {
        self.durations.lock().len()
    }
}

#[async_trait]
impl Sleeper for FakeSleeper {
    async fn sleep(&self, duration: Duration) {
        self.durations.lock().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_sleeper_records_without_waiting() {
        let sleeper = FakeSleeper::new();
        sleeper.sleep(Duration::from_secs(300)).await;
        sleeper.sleep(Duration::from_secs(5)).await;
        assert_eq!(sleeper.durations(), vec![Duration::from_secs(300), Duration::from_secs(5)]);
    }
}
