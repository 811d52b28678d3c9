//! Adaptive output pacing.
//!
//! The encoder writes into a pipe at its own pace. If the packetizer drains
//! the pipe faster than it fills, reads start to block and the output turns
//! choppy; if it drains slower, latency grows without bound. The pacer
//! watches how many bytes are waiting upstream before every read and nudges
//! the inter-packet delay by one millisecond at a time:
//!
//! | backlog grew and previous backlog was… | delay    |
//! |----------------------------------------|----------|
//! | below the threshold                    | +1 ms    |
//! | above the threshold                    | −1 ms    |
//! | exactly the threshold                  | unchanged|
//!
//! The delay is clamped to `[min_delay, max_delay]`.

use std::thread;
use std::time::{Duration, Instant};

use crate::media::h264::PacketizerConfig;

/// Pacing state for one packetizer.
#[derive(Debug)]
pub struct Pacer {
    delay_ms: u64,
    min_delay_ms: u64,
    max_delay_ms: u64,
    threshold: usize,
    previous_available: usize,
    last_send: Option<Instant>,
}

impl Pacer {
    pub fn new(config: &PacketizerConfig) -> Self {
        let min_delay_ms = config.min_delay.as_millis() as u64;
        let max_delay_ms = (config.max_delay.as_millis() as u64).max(min_delay_ms);
        Self {
            delay_ms: (config.initial_delay.as_millis() as u64).clamp(min_delay_ms, max_delay_ms),
            min_delay_ms,
            max_delay_ms,
            threshold: config.buffering_threshold,
            previous_available: 0,
            last_send: None,
        }
    }

    /// Current inter-packet delay.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Backlog seen by the last [`observe`](Self::observe) call.
    pub fn previous_available(&self) -> usize {
        self.previous_available
    }

    /// Record the upstream backlog observed right before a read.
    pub fn observe(&mut self, available: usize) {
        if available > self.previous_available {
            if self.previous_available < self.threshold {
                self.delay_ms = (self.delay_ms + 1).min(self.max_delay_ms);
            } else if self.previous_available > self.threshold {
                self.delay_ms = self.delay_ms.saturating_sub(1).max(self.min_delay_ms);
            }
        }
        self.previous_available = available;
    }

    /// How long to hold the next packet if it were sent at `now`.
    pub fn pause_before_send(&self, now: Instant) -> Duration {
        match self.last_send {
            Some(last) => self.delay().saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Record that a packet left at `at`.
    pub fn mark_sent(&mut self, at: Instant) {
        self.last_send = Some(at);
    }

    /// Sleep until the next packet is due, then record the send time.
    pub fn wait(&mut self) {
        let pause = self.pause_before_send(Instant::now());
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        self.mark_sent(Instant::now());
    }
}
