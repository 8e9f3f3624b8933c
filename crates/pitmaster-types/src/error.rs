//! Error types for decoding controller payloads.

use thiserror::Error;

/// Errors that can occur when decoding a grill controller payload.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The payload is not valid JSON.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// A mandatory field is absent or null.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A field has the wrong JSON type.
    #[error("Field '{field}' has the wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    /// A field value is outside its permitted range.
    #[error("Field '{field}' out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl CodecError {
    /// Create a wrong-type error for a field.
    pub fn wrong_type(field: &'static str, expected: &'static str) -> Self {
        Self::WrongType { field, expected }
    }

    /// Create an out-of-range error for a field.
    pub fn out_of_range(field: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            field,
            value,
            min,
            max,
        }
    }
}

/// Result type alias using pitmaster-types' CodecError type.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_display() {
        let err = CodecError::MissingField("grill_temp");
        assert_eq!(err.to_string(), "Missing field: grill_temp");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = CodecError::out_of_range("fan_speed", 120.0, 0.0, 100.0);
        assert_eq!(
            err.to_string(),
            "Field 'fan_speed' out of range: 120 (expected 0..=100)"
        );
    }

    #[test]
    fn test_wrong_type_display() {
        let err = CodecError::wrong_type("target_temp", "number");
        assert!(err.to_string().contains("target_temp"));
        assert!(err.to_string().contains("number"));
    }
}
