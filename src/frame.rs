//! Per-slot fence bookkeeping.
//!
//! Each swapchain image slot remembers the fence value signalled by the last
//! submission that used it. A slot may only be reset and re-recorded once
//! the GPU has reported that value as complete. The backends feed the ring
//! with their real fence values (D3D12) or with logical values tracked
//! against a binary fence (Vulkan).

use crate::error::{DriverError, DriverResult};

/// Minimum number of render targets (double buffering).
pub const MIN_RENDER_TARGETS: usize = 2;

/// Maximum number of render targets (triple buffering).
pub const MAX_RENDER_TARGETS: usize = 3;

#[derive(Debug, Clone)]
pub struct FrameRing {
    /// Value of the last submission per slot, 0 if never submitted.
    fence_values: Vec<u64>,
    completed: u64,
    next_value: u64,
}

impl FrameRing {
    pub fn new(slot_count: usize) -> DriverResult<Self> {
        if !(MIN_RENDER_TARGETS..=MAX_RENDER_TARGETS).contains(&slot_count) {
            return Err(DriverError::CapabilityUnsupported(format!(
                "{} frame slots requested, supported range is {}..={}",
                slot_count, MIN_RENDER_TARGETS, MAX_RENDER_TARGETS
            )));
        }
        Ok(Self {
            fence_values: vec![0; slot_count],
            completed: 0,
            next_value: 1,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.fence_values.len()
    }

    /// Fail unless the counts of the other per-slot resources agree.
    pub fn expect_slot_count(&self, resource: &'static str, actual: usize) -> DriverResult<()> {
        if actual != self.slot_count() {
            return Err(DriverError::RenderTargetMismatch {
                resource,
                expected: self.slot_count(),
                actual,
            });
        }
        Ok(())
    }

    pub fn pending_value(&self, slot: usize) -> u64 {
        self.fence_values[slot]
    }

    pub fn completed_value(&self) -> u64 {
        self.completed
    }

    pub fn is_reusable(&self, slot: usize) -> bool {
        self.fence_values[slot] <= self.completed
    }

    /// Check that `slot` may have its allocator reset.
    pub fn ensure_reusable(&self, slot: usize) -> DriverResult<()> {
        if slot >= self.slot_count() {
            return Err(DriverError::RenderTargetMismatch {
                resource: "frame slot index",
                expected: self.slot_count(),
                actual: slot + 1,
            });
        }
        if !self.is_reusable(slot) {
            return Err(DriverError::FrameInFlight {
                slot,
                pending: self.fence_values[slot],
                completed: self.completed,
            });
        }
        Ok(())
    }

    /// Record a submission on `slot`; returns the fence value to signal.
    pub fn submit(&mut self, slot: usize) -> u64 {
        let value = self.next_value;
        self.fence_values[slot] = value;
        self.next_value += 1;
        value
    }

    /// Record that the GPU has finished everything up to `value`.
    pub fn complete(&mut self, value: u64) {
        self.completed = self.completed.max(value);
    }
}
