//! Backoff controller - 連続失敗後に scheduler が待つ時間を決める
//!
//! # 学習ポイント
//! - 閾値までは待たない、閾値以降は指数的に伸ばし `max` で頭打ち

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Backoff tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Consecutive failures before any extra delay is imposed.
    pub threshold: u32,

    /// Delay at the threshold.
    pub initial: Duration,

    /// Upper bound on the delay.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay after `failures` consecutive failures.
    ///
    /// Below the threshold this is `initial` (reported, but not enforced);
    /// from the threshold on it is `initial * 2^(failures - threshold)`,
    /// capped at `max`.
    ///
    /// With threshold=3, initial=30m, max=1440m:
    /// - failures 1..=3: 30m
    /// - failure 4: 60m
    /// - failure 5: 120m
    /// - failure 10: 1440m (capped)
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures < self.threshold {
            return self.initial.min(self.max);
        }
        let exponent = failures - self.threshold;
        1u32.checked_shl(exponent)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Tracks consecutive sweep failures.
#[derive(Debug, Clone)]
pub struct BackoffController {
    policy: BackoffPolicy,
    consecutive_failures: u32,
    current: Duration,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BackoffController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            current: policy.initial,
            last_failure_at: None,
        }
    }

    /// Feed one sweep result.
    pub fn record_result(&mut self, success: bool, now: DateTime<Utc>) {
        if success {
            self.consecutive_failures = 0;
            self.current = self.policy.initial;
            return;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self.policy.delay_for(self.consecutive_failures);
        self.last_failure_at = Some(now);
    }

    /// Remaining wait before the next sweep may start. Zero below the
    /// threshold or once the window measured from the last failure is over.
    pub fn should_delay(&self, now: DateTime<Utc>) -> Duration {
        if self.consecutive_failures < self.policy.threshold {
            return Duration::ZERO;
        }
        let Some(last_failure_at) = self.last_failure_at else {
            return Duration::ZERO;
        };
        let window = chrono::Duration::from_std(self.current).unwrap_or(chrono::Duration::MAX);
        let resume_at = last_failure_at
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (resume_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn current_backoff(&self) -> Duration {
        self.current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        !self.should_delay(now).is_zero()
    }
}
