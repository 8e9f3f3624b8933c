//! Property tests for the status/command codec.

use pitmaster_types::codec::{decode_status, encode_command};
use pitmaster_types::{Command, FAN_SPEED_MAX, TARGET_TEMP_MAX, TARGET_TEMP_MIN};
use proptest::prelude::*;
use serde_json::{Value, json};

fn optional_temp() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(-40.0f64..1200.0)
}

proptest! {
    #[test]
    fn decode_never_panics(body in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_status(&body);
    }

    #[test]
    fn decoded_slots_match_input(
        grill in -40.0f64..1200.0,
        food1 in optional_temp(),
        food2 in optional_temp(),
        food3 in optional_temp(),
        fan in 0u8..=FAN_SPEED_MAX,
        target in TARGET_TEMP_MIN..TARGET_TEMP_MAX,
    ) {
        let body = json!({
            "grill_temp": grill,
            "food1_temp": food1,
            "food2_temp": food2,
            "food3_temp": food3,
            "fan_speed": fan,
            "target_temp": target,
        });
        let status = decode_status(body.to_string().as_bytes()).unwrap();

        let expected_active = 1
            + usize::from(food1.is_some())
            + usize::from(food2.is_some())
            + usize::from(food3.is_some());
        prop_assert_eq!(status.probes().len(), 4);
        prop_assert_eq!(status.active_probes(), expected_active);
        prop_assert_eq!(status.fan_speed, fan);
    }

    #[test]
    fn encoded_command_never_contains_null(
        fan in prop::option::of(0u8..=FAN_SPEED_MAX),
        target in prop::option::of(TARGET_TEMP_MIN..TARGET_TEMP_MAX),
    ) {
        let command = Command { fan_speed: fan, target_temp: target };
        let body: Value = serde_json::from_slice(&encode_command(&command)).unwrap();
        let object = body.as_object().unwrap();

        prop_assert_eq!(object.contains_key("fan_speed"), fan.is_some());
        prop_assert_eq!(object.contains_key("target_temp"), target.is_some());
        prop_assert!(object.values().all(|v| !v.is_null()));
    }

    #[test]
    fn fan_speed_over_limit_rejected(fan in (FAN_SPEED_MAX + 1)..=u8::MAX) {
        prop_assert!(Command::fan_speed(fan).is_err());
    }
}
