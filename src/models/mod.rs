pub mod delta;
pub mod record;

pub use delta::{AppliedDelta, Delta};
pub use record::TelemetryRecord;
