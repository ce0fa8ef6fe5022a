//! Suppression of repeated state payloads.

use super::field::StatePayload;
use std::collections::HashMap;

/// Remembers the latest accepted payload per device.
///
/// Consulted only when a payload is submitted, never against the buffered
/// set. A payload carrying any delta field is never a duplicate, even if
/// other fields in it repeat.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    last: HashMap<String, StatePayload>,
    suppressed: u64,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_duplicate(&self, device: &str, payload: &StatePayload) -> bool {
        if payload.has_delta() {
            return false;
        }
        self.last.get(device) == Some(payload)
    }

    pub fn record(&mut self, device: &str, payload: &StatePayload) {
        self.last.insert(device.to_string(), payload.clone());
    }

    /// Check and count in one step. Returns true when the payload was dropped.
    pub fn suppress(&mut self, device: &str, payload: &StatePayload) -> bool {
        let duplicate = self.is_duplicate(device, payload);
        if duplicate {
            self.suppressed += 1;
        }
        duplicate
    }

    /// Number of payloads dropped as duplicates so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
