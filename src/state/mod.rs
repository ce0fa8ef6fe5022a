//! Outbound device state: validation, de-duplication and coalescing.

mod coalescer;
mod field;
mod filter;
mod input;
mod reporter;

pub use coalescer::{PendingUpdate, PendingUpdateSet, StateCoalescer, SubmitOutcome, SweepReport};
pub use field::{
    DetectionState, FieldShape, FieldTag, Hsb, LockState, PowerState, StateField, StatePayload,
};
pub use filter::DuplicateFilter;
pub use input::{Normalized, StateInput, normalize};
pub use reporter::StateReporter;
