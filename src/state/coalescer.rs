//! Rate limiting and coalescing of outbound state updates.
//!
//! Accepted updates are buffered and published by a periodic sweep. Within
//! one sweep, updates of the same field shape for the same device collapse
//! to the newest one; survivors are published once they have waited longer
//! than the dwell time. A dimmer dragged across its range therefore ends up
//! as a single state report carrying the final value.

use super::field::{FieldShape, StatePayload};
use super::filter::DuplicateFilter;
use super::input::{Normalized, StateInput, normalize};
use crate::directive::Command;
use crate::error::{BridgeError, StateRejection};
use crate::transport::Publisher;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// One buffered, not yet published state change.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub update_id: Uuid,
    pub endpoint_id: String,
    pub payload: StatePayload,
    pub enqueued_at: Instant,
}

impl PendingUpdate {
    pub fn new(endpoint_id: impl Into<String>, payload: StatePayload, enqueued_at: Instant) -> Self {
        Self {
            update_id: Uuid::new_v4(),
            endpoint_id: endpoint_id.into(),
            payload,
            enqueued_at,
        }
    }

    pub fn shape(&self) -> FieldShape {
        self.payload.shape()
    }
}

/// Buffered updates in enqueue order.
#[derive(Debug, Default)]
pub struct PendingUpdateSet {
    entries: BTreeMap<u64, PendingUpdate>,
    next_seq: u64,
}

impl PendingUpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, update: PendingUpdate) {
        self.entries.insert(self.next_seq, update);
        self.next_seq += 1;
    }

    pub fn get(&self, update_id: &Uuid) -> Option<&PendingUpdate> {
        self.entries.values().find(|u| &u.update_id == update_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Drop every entry that a newer entry of the same device and shape
    /// replaces. Returns the removed updates, oldest first.
    fn supersede(&mut self) -> Vec<PendingUpdate> {
        let mut newest: HashMap<(&str, FieldShape), u64> = HashMap::new();
        for (seq, update) in &self.entries {
            newest.insert((update.endpoint_id.as_str(), update.shape()), *seq);
        }
        let keep: HashSet<u64> = newest.into_values().collect();

        let stale: Vec<u64> = self
            .entries
            .keys()
            .filter(|seq| !keep.contains(seq))
            .copied()
            .collect();
        stale
            .into_iter()
            .filter_map(|seq| self.entries.remove(&seq))
            .collect()
    }

    /// Remove and return entries older than `dwell`, oldest first.
    fn take_due(&mut self, now: Instant, dwell: Duration) -> Vec<PendingUpdate> {
        let due: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, u)| now.saturating_duration_since(u.enqueued_at) > dwell)
            .map(|(seq, _)| *seq)
            .collect();
        due.into_iter()
            .filter_map(|seq| self.entries.remove(&seq))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Buffered for a later sweep.
    Accepted(Uuid),
    /// Same payload as the last accepted one; dropped silently.
    Duplicate,
    /// Transport command with no state to report.
    Stateless(Command),
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub superseded: usize,
    pub flushed: usize,
    /// Flushed while the transport was unavailable.
    pub dropped: usize,
}

/// State coalescer for one state node.
pub struct StateCoalescer {
    device: String,
    name: String,
    dwell: Duration,
    pending: PendingUpdateSet,
    filter: DuplicateFilter,
}

impl StateCoalescer {
    pub fn new(device: impl Into<String>, name: impl Into<String>, dwell: Duration) -> Self {
        Self {
            device: device.into(),
            name: name.into(),
            dwell,
            pending: PendingUpdateSet::new(),
            filter: DuplicateFilter::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn pending(&self) -> &PendingUpdateSet {
        &self.pending
    }

    pub fn duplicates_suppressed(&self) -> u64 {
        self.filter.suppressed()
    }

    /// Validate and buffer one state-node message.
    ///
    /// The duplicate filter is updated here, not at flush time, so rapid
    /// repeats collapse before any sweep runs. Updates derived from relay
    /// commands always go through; the relay expects a report for each.
    pub fn submit(&mut self, input: &StateInput, now: Instant) -> Result<SubmitOutcome, StateRejection> {
        let (state, from_command) = match normalize(input)? {
            Normalized::Stateless(command) => return Ok(SubmitOutcome::Stateless(command)),
            Normalized::State {
                state,
                from_command,
            } => (state, from_command),
        };

        let payload = StatePayload::parse(&state)?;

        if !from_command && self.filter.suppress(&self.device, &payload) {
            return Ok(SubmitOutcome::Duplicate);
        }
        self.filter.record(&self.device, &payload);

        let update = PendingUpdate::new(self.device.clone(), payload, now);
        let update_id = update.update_id;
        debug!(
            "[State] {}: buffered {} {}",
            self.name,
            update_id,
            update.shape()
        );
        self.pending.insert(update);

        Ok(SubmitOutcome::Accepted(update_id))
    }

    /// Collapse same-shape updates and publish the ones that have dwelt long
    /// enough. Publishing is best effort: a failed publish is not retried.
    pub fn sweep(&mut self, now: Instant, publisher: &dyn Publisher) -> SweepReport {
        let mut report = SweepReport::default();
        if self.pending.is_empty() {
            return report;
        }

        for stale in self.pending.supersede() {
            debug!(
                "[State] {}: throttled state update {}",
                self.name, stale.update_id
            );
            report.superseded += 1;
        }

        for update in self.pending.take_due(now, self.dwell) {
            let result = publisher.update_state(
                &update.update_id.to_string(),
                &update.endpoint_id,
                &update.payload,
                &self.name,
            );
            match result {
                Ok(()) => report.flushed += 1,
                Err(BridgeError::TransportUnavailable) => {
                    debug!(
                        "[State] {}: transport offline, dropped {}",
                        self.name, update.update_id
                    );
                    report.dropped += 1;
                }
                Err(e) => {
                    warn!(
                        "[State] {}: failed to publish {}: {}",
                        self.name, update.update_id, e
                    );
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Discard everything still buffered. Nothing is published.
    pub fn discard(&mut self) -> usize {
        self.pending.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Published, RecordingPublisher};
    use serde_json::json;

    const DWELL: Duration = Duration::from_millis(1000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn coalescer() -> StateCoalescer {
        StateCoalescer::new("lamp-1", "Desk Lamp", DWELL)
    }

    #[test]
    fn test_burst_of_same_shape_publishes_last() {
        let publisher = RecordingPublisher::new();
        let mut c = coalescer();
        let t0 = Instant::now();

        for (i, level) in [10, 20, 30, 40, 50].into_iter().enumerate() {
            let outcome = c
                .submit(&StateInput::state(json!({"brightness": level})), t0 + ms(50 * i as u64))
                .unwrap();
            assert!(matches!(outcome, SubmitOutcome::Accepted(_)));
        }

        let report = c.sweep(t0 + ms(250), &publisher);
        assert_eq!(report.superseded, 4);
        assert_eq!(report.flushed, 0);
        assert_eq!(c.pending().len(), 1);

        let report = c.sweep(t0 + ms(1500), &publisher);
        assert_eq!(report.flushed, 1);
        assert_eq!(publisher.states(), vec![json!({"brightness": 50})]);
        assert!(c.pending().is_empty());
    }

    #[test]
    fn test_newest_wins_after_dwell() {
        let publisher = RecordingPublisher::new();
        let mut c = coalescer();
        let t0 = Instant::now();

        c.submit(&StateInput::state(json!({"power": "ON"})), t0).unwrap();
        let b = match c.submit(&StateInput::state(json!({"power": "OFF"})), t0 + ms(100)).unwrap() {
            SubmitOutcome::Accepted(id) => id,
            other => panic!("unexpected {:?}", other),
        };

        c.sweep(t0 + ms(300), &publisher);
        assert!(publisher.published().is_empty());

        c.sweep(t0 + ms(1000), &publisher);
        assert!(publisher.published().is_empty(), "B has dwelt exactly 900ms");

        c.sweep(t0 + ms(1250), &publisher);
        assert_eq!(
            publisher.published(),
            vec![Published::State {
                message_id: b.to_string(),
                endpoint_id: "lamp-1".to_string(),
                state: json!({"power": "OFF"}),
            }]
        );
    }

    #[test]
    fn test_different_shapes_flush_independently() {
        let publisher = RecordingPublisher::new();
        let mut c = coalescer();
        let t0 = Instant::now();

        c.submit(&StateInput::state(json!({"power": "ON"})), t0).unwrap();
        c.submit(&StateInput::state(json!({"brightness": 80})), t0 + ms(10)).unwrap();
        c.submit(&StateInput::state(json!({"power": "ON", "brightness": 80})), t0 + ms(20))
            .unwrap();

        let report = c.sweep(t0 + ms(1100), &publisher);
        assert_eq!(report.superseded, 0);
        assert_eq!(report.flushed, 3);
        assert_eq!(
            publisher.states(),
            vec![
                json!({"power": "ON"}),
                json!({"brightness": 80}),
                json!({"power": "ON", "brightness": 80}),
            ]
        );
    }

    #[test]
    fn test_duplicate_suppressed_once_accepted() {
        let publisher = RecordingPublisher::new();
        let mut c = coalescer();
        let t0 = Instant::now();

        assert!(matches!(
            c.submit(&StateInput::state(json!({"power": "ON"})), t0).unwrap(),
            SubmitOutcome::Accepted(_)
        ));
        assert_eq!(
            c.submit(&StateInput::state(json!({"power": "ON"})), t0 + ms(5)).unwrap(),
            SubmitOutcome::Duplicate
        );
        assert_eq!(c.pending().len(), 1);
        assert_eq!(c.duplicates_suppressed(), 1);

        c.sweep(t0 + ms(2000), &publisher);
        assert_eq!(publisher.states(), vec![json!({"power": "ON"})]);

        // Still a duplicate after the flush: the filter tracks accepted payloads
        assert_eq!(
            c.submit(&StateInput::state(json!({"power": "ON"})), t0 + ms(2100)).unwrap(),
            SubmitOutcome::Duplicate
        );
    }

    #[test]
    fn test_delta_fields_are_not_duplicates() {
        let mut c = coalescer();
        let t0 = Instant::now();

        for offset in [0, 10] {
            assert!(matches!(
                c.submit(&StateInput::state(json!({"volumeDelta": 5})), t0 + ms(offset)).unwrap(),
                SubmitOutcome::Accepted(_)
            ));
        }
        assert_eq!(c.pending().len(), 2);
        assert_eq!(c.duplicates_suppressed(), 0);
    }

    #[test]
    fn test_invalid_submissions_never_buffered() {
        let mut c = coalescer();
        let t0 = Instant::now();

        let err = c
            .submit(&StateInput::state(json!({"brightness": 150})), t0)
            .unwrap_err();
        assert!(matches!(err, StateRejection::InvalidFieldType { .. }));

        let err = c
            .submit(
                &StateInput::state(json!({
                    "colorHue": 10,
                    "colorSaturation": 0.5,
                    "colorBrightness": 0.5,
                    "colorTemperature": 3000
                })),
                t0,
            )
            .unwrap_err();
        assert_eq!(err, StateRejection::ConflictingColorFields);
        assert!(c.pending().is_empty());

        // A rejected payload does not poison the duplicate filter
        assert!(matches!(
            c.submit(&StateInput::state(json!({"brightness": 100})), t0).unwrap(),
            SubmitOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_command_updates_bypass_duplicate_filter() {
        let mut c = coalescer();
        let t0 = Instant::now();
        let turn_on = StateInput::from_command(Command::TurnOn, json!("ON"), true);

        assert!(matches!(c.submit(&turn_on, t0).unwrap(), SubmitOutcome::Accepted(_)));
        assert!(matches!(c.submit(&turn_on, t0 + ms(1)).unwrap(), SubmitOutcome::Accepted(_)));

        // ...but they do become the reference for direct reports
        assert_eq!(
            c.submit(&StateInput::state(json!({"power": "ON"})), t0 + ms(2)).unwrap(),
            SubmitOutcome::Duplicate
        );
    }

    #[test]
    fn test_stateless_command_not_buffered() {
        let mut c = coalescer();
        let outcome = tokio_test::assert_ok!(c.submit(
            &StateInput::from_command(Command::Next, json!("Next"), true),
            Instant::now(),
        ));
        assert_eq!(outcome, SubmitOutcome::Stateless(Command::Next));
        assert!(c.pending().is_empty());
    }

    #[test]
    fn test_direct_state_accepted_with_acknowledge_false() {
        let mut c = coalescer();
        let input = StateInput {
            command: None,
            payload: Some(json!({"state": {"power": "ON"}})),
            acknowledge: Some(json!(false)),
        };
        assert!(matches!(
            c.submit(&input, Instant::now()),
            Ok(SubmitOutcome::Accepted(_))
        ));
        assert_eq!(c.pending().len(), 1);
    }

    #[test]
    fn test_offline_flush_drops_update() {
        let publisher = RecordingPublisher::new();
        publisher.set_connected(false);
        let mut c = coalescer();
        let t0 = Instant::now();

        c.submit(&StateInput::state(json!({"lock": "LOCKED"})), t0).unwrap();
        let report = c.sweep(t0 + ms(1500), &publisher);
        assert_eq!(report.dropped, 1);
        assert!(c.pending().is_empty());

        publisher.set_connected(true);
        c.sweep(t0 + ms(3000), &publisher);
        assert!(publisher.published().is_empty());
    }

    #[test]
    fn test_pending_lookup_by_id() {
        let mut c = coalescer();
        let t0 = Instant::now();
        let id = match c.submit(&StateInput::state(json!({"temperature": 19.5})), t0).unwrap() {
            SubmitOutcome::Accepted(id) => id,
            other => panic!("unexpected {:?}", other),
        };
        let pending = c.pending().get(&id).unwrap();
        assert_eq!(pending.endpoint_id, "lamp-1");
        assert_eq!(pending.enqueued_at, t0);
        assert_eq!(c.discard(), 1);
        assert!(c.pending().get(&id).is_none());
    }
}
