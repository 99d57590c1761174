//! # Flow Control
//!
//! Server-side buffer accounting for one client. The buffer starts full at
//! the buffer limit (BL), loses the maximum request cost (MRC) per served
//! request and recharges at MRR units per millisecond, never above BL.
//!
//! Accounting is advisory: the remaining value is reported to the client as
//! the buffer value (BV) of each reply. Nothing is refused when it runs dry.

use std::time::Instant;

use shared_types::U256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlBuffer {
    limit: U256,
    request_cost: U256,
    recharge_per_ms: U256,
    value: U256,
    last_update: Instant,
}

impl FlowControlBuffer {
    pub fn new(limit: U256, request_cost: U256, recharge_per_ms: U256, now: Instant) -> Self {
        Self {
            limit,
            request_cost,
            recharge_per_ms,
            value: limit,
            last_update: now,
        }
    }

    pub fn limit(&self) -> U256 {
        self.limit
    }

    /// Current buffer value, without recharging.
    pub fn value(&self) -> U256 {
        self.value
    }

    /// True if the next request would drive the buffer below zero.
    pub fn is_exhausted(&self) -> bool {
        self.value < self.request_cost
    }

    /// Credit the time elapsed since the last update.
    pub fn recharge(&mut self, now: Instant) {
        let elapsed_ms = U256::from(now.saturating_duration_since(self.last_update).as_millis());
        let credit = self.recharge_per_ms.saturating_mul(elapsed_ms);
        self.value = self.value.saturating_add(credit).min(self.limit);
        if now > self.last_update {
            self.last_update = now;
        }
    }

    /// Recharge, deduct one request and return the remaining value.
    pub fn charge(&mut self, now: Instant) -> U256 {
        self.recharge(now);
        self.value = self.value.saturating_sub(self.request_cost);
        self.value
    }
}
