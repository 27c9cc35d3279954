use anyhow::{Context, Result};

/// SQLite has no NaN; unparseable readings are stored as NULL.
pub fn reading_to_sql(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

pub fn reading_from_sql(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

/// Encodes an id list as a JSON array so it can be bound as one parameter
/// and expanded with `json_each`, regardless of how many ids there are.
pub fn ids_to_json(ids: &[i64]) -> Result<String> {
    serde_json::to_string(ids).context("failed to encode id list")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_maps_to_null_and_back() {
        assert_eq!(reading_to_sql(f64::NAN), None);
        assert_eq!(reading_to_sql(1.5), Some(1.5));
        assert!(reading_from_sql(None).is_nan());
        assert_eq!(reading_from_sql(Some(2.0)), 2.0);
    }

    #[test]
    fn ids_encode_as_json_array() {
        assert_eq!(ids_to_json(&[3, 1, 2]).unwrap(), "[3,1,2]");
        assert_eq!(ids_to_json(&[]).unwrap(), "[]");
    }
}
