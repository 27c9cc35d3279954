//! Telemetry record data model.
//!
//! One sample as it appears in the source file and in the `telemetry_data`
//! table. `id` is the only identity; every other column is payload.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: i64,
    /// Kept verbatim, never interpreted as a calendar time.
    pub timestamp: String,
    #[serde(deserialize_with = "nan_from_null")]
    pub temperature: f64,
    pub position: String,
    #[serde(deserialize_with = "nan_from_null")]
    pub pressure: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub humidity: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub velocity: f64,
    pub status: String,
    #[serde(deserialize_with = "nan_from_null")]
    pub battery_level: f64,
}

impl TelemetryRecord {
    /// Field-by-field comparison that treats two NaN readings as equal, so an
    /// unparseable value that stays unparseable does not count as a change.
    pub fn same_values(&self, other: &TelemetryRecord) -> bool {
        self.id == other.id
            && self.timestamp == other.timestamp
            && self.position == other.position
            && self.status == other.status
            && same_reading(self.temperature, other.temperature)
            && same_reading(self.pressure, other.pressure)
            && same_reading(self.humidity, other.humidity)
            && same_reading(self.velocity, other.velocity)
            && same_reading(self.battery_level, other.battery_level)
    }
}

fn same_reading(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits() || a == b
}

// serde_json writes non-finite floats as `null`; read them back as NaN.
fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}
