use crate::config::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Decides what the capture loop does after a failed frame read.
pub trait RetryPolicy: Send {
    /// `consecutive_failures` counts the current failure, starting at 1.
    fn on_failure(&mut self, consecutive_failures: u32) -> RetryDecision;
}

/// Sleeps a fixed delay and retries forever.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl RetryPolicy for FixedDelay {
    fn on_failure(&mut self, _consecutive_failures: u32) -> RetryDecision {
        RetryDecision::RetryAfter(self.delay)
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    backoff_factor: u32,
    max_delay: Duration,
    max_retries: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(
        initial_delay: Duration,
        backoff_factor: u32,
        max_delay: Duration,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            backoff_factor: backoff_factor.max(1),
            max_delay,
            max_retries,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn base_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        let factor = self.backoff_factor.saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn on_failure(&mut self, consecutive_failures: u32) -> RetryDecision {
        if let Some(max_retries) = self.max_retries {
            if consecutive_failures > max_retries {
                return RetryDecision::GiveUp;
            }
        }

        let delay = self.base_delay(consecutive_failures);
        if self.jitter {
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            RetryDecision::RetryAfter(delay.mul_f32(jitter))
        } else {
            RetryDecision::RetryAfter(delay)
        }
    }
}

impl From<&RetryConfig> for Box<dyn RetryPolicy> {
    fn from(config: &RetryConfig) -> Self {
        match *config {
            RetryConfig::Fixed { delay_ms } => {
                Box::new(FixedDelay::new(Duration::from_millis(delay_ms)))
            }
            RetryConfig::Exponential {
                initial_delay_ms,
                backoff_factor,
                max_delay_ms,
                max_retries,
            } => Box::new(ExponentialBackoff::new(
                Duration::from_millis(initial_delay_ms),
                backoff_factor,
                Duration::from_millis(max_delay_ms),
                max_retries,
            )),
        }
    }
}
