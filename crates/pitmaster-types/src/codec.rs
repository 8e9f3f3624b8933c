//! Wire codec for the controller's HTTP protocol.
//!
//! The status body returned by `GET /status` looks like:
//!
//! ```json
//! {"grill_temp":250.5,"food1_temp":165.0,"food2_temp":null,
//!  "food3_temp":null,"fan_speed":45,"target_temp":275.0}
//! ```
//!
//! `grill_temp`, `fan_speed` and `target_temp` are mandatory. Food probes are
//! inactive when `null` or absent.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{CodecError, CodecResult};
use crate::types::{Command, FAN_SPEED_MAX, FAN_SPEED_MIN, Status};

/// Decode a status payload.
///
/// # Errors
///
/// Returns a [`CodecError`] if the body is not a JSON object, a mandatory
/// field is missing, a field has the wrong type, or the fan speed lies
/// outside 0-100.
///
/// # Example
///
/// ```
/// use pitmaster_types::codec::decode_status;
///
/// let status = decode_status(br#"{"grill_temp":225,"fan_speed":10,"target_temp":225}"#).unwrap();
/// assert_eq!(status.fan_speed, 10);
/// assert!(status.food1_temp.is_none());
/// ```
pub fn decode_status(body: &[u8]) -> CodecResult<Status> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(CodecError::Malformed("expected a JSON object".to_string()));
    };

    Ok(Status {
        grill_temp: required_number(&fields, "grill_temp")?,
        food1_temp: optional_number(&fields, "food1_temp")?,
        food2_temp: optional_number(&fields, "food2_temp")?,
        food3_temp: optional_number(&fields, "food3_temp")?,
        fan_speed: fan_speed(&fields)?,
        target_temp: required_number(&fields, "target_temp")?,
    })
}

/// Encode a command body. Absent fields are omitted, never sent as `null`.
///
/// # Example
///
/// ```
/// use pitmaster_types::{Command, codec::encode_command};
///
/// let body = encode_command(&Command::fan_speed(50).unwrap());
/// assert_eq!(&body[..], br#"{"fan_speed":50}"#);
/// ```
pub fn encode_command(command: &Command) -> Bytes {
    let mut fields = Map::new();
    if let Some(speed) = command.fan_speed {
        fields.insert("fan_speed".to_string(), Value::from(speed));
    }
    if let Some(temp) = command.target_temp {
        fields.insert("target_temp".to_string(), Value::from(temp));
    }
    Bytes::from(Value::Object(fields).to_string())
}

fn required_number(fields: &Map<String, Value>, name: &'static str) -> CodecResult<f64> {
    optional_number(fields, name)?.ok_or(CodecError::MissingField(name))
}

fn optional_number(fields: &Map<String, Value>, name: &'static str) -> CodecResult<Option<f64>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| CodecError::wrong_type(name, "number")),
    }
}

fn fan_speed(fields: &Map<String, Value>) -> CodecResult<u8> {
    const FIELD: &str = "fan_speed";
    let value = match fields.get(FIELD) {
        None | Some(Value::Null) => return Err(CodecError::MissingField(FIELD)),
        Some(v) => v,
    };
    let out_of_range = |raw: f64| {
        CodecError::out_of_range(
            FIELD,
            raw,
            f64::from(FAN_SPEED_MIN),
            f64::from(FAN_SPEED_MAX),
        )
    };

    if let Some(raw) = value.as_i64() {
        return u8::try_from(raw)
            .ok()
            .filter(|s| *s <= FAN_SPEED_MAX)
            .ok_or_else(|| out_of_range(raw as f64));
    }
    if let Some(raw) = value.as_u64() {
        return Err(out_of_range(raw as f64));
    }
    Err(CodecError::wrong_type(FIELD, "integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeChannel;

    const SAMPLE: &[u8] = br#"{"grill_temp":250.5,"food1_temp":165.0,"food2_temp":null,"food3_temp":null,"fan_speed":45,"target_temp":275.0}"#;

    #[test]
    fn test_decode_sample_body() {
        let status = decode_status(SAMPLE).unwrap();
        assert_eq!(status.grill_temp, 250.5);
        assert_eq!(status.food1_temp, Some(165.0));
        assert_eq!(status.fan_speed, 45);
        assert_eq!(status.target_temp, 275.0);

        let probes = status.probes();
        assert_eq!(probes.len(), 4);
        let active: Vec<_> = probes.iter().filter(|p| p.is_active()).collect();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].channel, ProbeChannel::Primary);
        assert_eq!(active[1].channel, ProbeChannel::Aux1);
    }

    #[test]
    fn test_decode_absent_food_probes() {
        let status =
            decode_status(br#"{"grill_temp":200,"fan_speed":0,"target_temp":225}"#).unwrap();
        assert_eq!(status.active_probes(), 1);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let status = decode_status(
            br#"{"grill_temp":200,"fan_speed":0,"target_temp":225,"firmware":"2.1"}"#,
        )
        .unwrap();
        assert_eq!(status.grill_temp, 200.0);
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let err = decode_status(b"<html>busy</html>").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = decode_status(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_decode_missing_mandatory_fields() {
        assert_eq!(
            decode_status(br#"{"fan_speed":10,"target_temp":225}"#),
            Err(CodecError::MissingField("grill_temp"))
        );
        assert_eq!(
            decode_status(br#"{"grill_temp":210,"target_temp":225}"#),
            Err(CodecError::MissingField("fan_speed"))
        );
        assert_eq!(
            decode_status(br#"{"grill_temp":210,"fan_speed":10,"target_temp":null}"#),
            Err(CodecError::MissingField("target_temp"))
        );
    }

    #[test]
    fn test_decode_wrong_types() {
        assert_eq!(
            decode_status(br#"{"grill_temp":"hot","fan_speed":10,"target_temp":225}"#),
            Err(CodecError::wrong_type("grill_temp", "number"))
        );
        assert_eq!(
            decode_status(br#"{"grill_temp":210,"food2_temp":true,"fan_speed":10,"target_temp":225}"#),
            Err(CodecError::wrong_type("food2_temp", "number"))
        );
        assert_eq!(
            decode_status(br#"{"grill_temp":210,"fan_speed":12.5,"target_temp":225}"#),
            Err(CodecError::wrong_type("fan_speed", "integer"))
        );
    }

    #[test]
    fn test_decode_fan_speed_out_of_range() {
        for body in [
            &br#"{"grill_temp":210,"fan_speed":101,"target_temp":225}"#[..],
            &br#"{"grill_temp":210,"fan_speed":-1,"target_temp":225}"#[..],
            &br#"{"grill_temp":210,"fan_speed":18446744073709551615,"target_temp":225}"#[..],
        ] {
            assert!(matches!(
                decode_status(body),
                Err(CodecError::OutOfRange {
                    field: "fan_speed",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_encode_fan_speed_only() {
        let body = encode_command(&Command::fan_speed(50).unwrap());
        assert_eq!(&body[..], br#"{"fan_speed":50}"#);
    }

    #[test]
    fn test_encode_both_fields() {
        let cmd = Command::fan_speed(20)
            .and_then(|c| c.with_target_temperature(225.5))
            .unwrap();
        let body = encode_command(&cmd);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["fan_speed"], 20);
        assert_eq!(json["target_temp"], 225.5);
    }

    #[test]
    fn test_encode_empty_command() {
        assert_eq!(&encode_command(&Command::new())[..], b"{}");
    }
}
