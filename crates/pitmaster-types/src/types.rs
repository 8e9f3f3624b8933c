//! Core value types for grill controller telemetry and control.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CodecError, CodecResult};

/// Lowest fan speed a controller accepts, in percent.
pub const FAN_SPEED_MIN: u8 = 0;

/// Highest fan speed a controller accepts, in percent.
pub const FAN_SPEED_MAX: u8 = 100;

/// Lowest target temperature a controller accepts, in °F.
pub const TARGET_TEMP_MIN: f64 = 32.0;

/// Highest target temperature a controller accepts, in °F.
pub const TARGET_TEMP_MAX: f64 = 1000.0;

/// Number of probe channels on a controller.
pub const PROBE_CHANNELS: usize = 4;

/// Whether a device speaks the controller's HTTP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// The device answered a status probe with a decodable payload.
    KnownProtocol,
    /// Not yet probed, or the last probe failed.
    #[default]
    Unrecognized,
}

impl DeviceKind {
    /// Stable token used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::KnownProtocol => "known_protocol",
            DeviceKind::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "known_protocol" => Ok(DeviceKind::KnownProtocol),
            "unrecognized" => Ok(DeviceKind::Unrecognized),
            other => Err(format!("unknown device kind: {other}")),
        }
    }
}

/// How far a device has progressed through pairing.
///
/// A device moves `Unpaired -> ShortRange` once a BLE link is established and
/// `ShortRange -> Networked` once it answers over WiFi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    #[default]
    Unpaired,
    ShortRange,
    Networked,
}

impl PairingState {
    /// Stable token used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingState::Unpaired => "unpaired",
            PairingState::ShortRange => "short_range",
            PairingState::Networked => "networked",
        }
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PairingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaired" => Ok(PairingState::Unpaired),
            "short_range" => Ok(PairingState::ShortRange),
            "networked" => Ok(PairingState::Networked),
            other => Err(format!("unknown pairing state: {other}")),
        }
    }
}

/// A temperature probe channel.
///
/// `Primary` is the grill (pit) probe and always reports. The auxiliary
/// channels are food probes that may be unplugged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeChannel {
    Primary,
    Aux1,
    Aux2,
    Aux3,
}

impl ProbeChannel {
    /// All channels in wire order.
    pub const ALL: [ProbeChannel; PROBE_CHANNELS] = [
        ProbeChannel::Primary,
        ProbeChannel::Aux1,
        ProbeChannel::Aux2,
        ProbeChannel::Aux3,
    ];

    /// Token used in probe ids and persisted rows.
    pub fn token(&self) -> &'static str {
        match self {
            ProbeChannel::Primary => "primary",
            ProbeChannel::Aux1 => "aux1",
            ProbeChannel::Aux2 => "aux2",
            ProbeChannel::Aux3 => "aux3",
        }
    }

    /// Build the probe id for this channel on a device.
    pub fn probe_id(&self, device_id: &str) -> String {
        format!("{}_{}", device_id, self.token())
    }
}

impl fmt::Display for ProbeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for ProbeChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(ProbeChannel::Primary),
            "aux1" => Ok(ProbeChannel::Aux1),
            "aux2" => Ok(ProbeChannel::Aux2),
            "aux3" => Ok(ProbeChannel::Aux3),
            other => Err(format!("unknown probe channel: {other}")),
        }
    }
}

/// One channel slot of a status payload. `value` is `None` when the probe is
/// not plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeReading {
    pub channel: ProbeChannel,
    pub value: Option<f64>,
}

impl ProbeReading {
    pub fn is_active(&self) -> bool {
        self.value.is_some()
    }
}

/// Decoded `GET /status` payload.
///
/// Temperatures are in °F as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Pit temperature (primary channel, always present).
    pub grill_temp: f64,
    pub food1_temp: Option<f64>,
    pub food2_temp: Option<f64>,
    pub food3_temp: Option<f64>,
    /// Fan duty in percent (0-100).
    pub fan_speed: u8,
    /// Pit set point.
    pub target_temp: f64,
}

impl Status {
    /// All four channel slots in wire order, inactive ones included.
    pub fn probes(&self) -> [ProbeReading; PROBE_CHANNELS] {
        [
            ProbeReading {
                channel: ProbeChannel::Primary,
                value: Some(self.grill_temp),
            },
            ProbeReading {
                channel: ProbeChannel::Aux1,
                value: self.food1_temp,
            },
            ProbeReading {
                channel: ProbeChannel::Aux2,
                value: self.food2_temp,
            },
            ProbeReading {
                channel: ProbeChannel::Aux3,
                value: self.food3_temp,
            },
        ]
    }

    /// Reading for a single channel.
    pub fn probe(&self, channel: ProbeChannel) -> Option<f64> {
        match channel {
            ProbeChannel::Primary => Some(self.grill_temp),
            ProbeChannel::Aux1 => self.food1_temp,
            ProbeChannel::Aux2 => self.food2_temp,
            ProbeChannel::Aux3 => self.food3_temp,
        }
    }

    /// Number of channels currently reporting.
    pub fn active_probes(&self) -> usize {
        self.probes().iter().filter(|p| p.is_active()).count()
    }

    /// Expand into one telemetry sample per active channel.
    pub fn samples(&self, device_id: &str, captured_at: OffsetDateTime) -> Vec<TelemetrySample> {
        self.probes()
            .into_iter()
            .filter_map(|p| {
                p.value
                    .map(|v| TelemetrySample::new(device_id, p.channel, v, captured_at))
            })
            .collect()
    }
}

/// Control request for `POST /command`.
///
/// Absent fields are left unchanged on the controller and are omitted from the
/// wire body entirely.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temp: Option<f64>,
}

impl Command {
    /// A command that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set only the fan speed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OutOfRange`] if `percent` exceeds 100.
    pub fn fan_speed(percent: u8) -> CodecResult<Self> {
        Self::new().with_fan_speed(percent)
    }

    /// Set only the target temperature.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OutOfRange`] outside 32-1000 °F.
    pub fn target_temperature(fahrenheit: f64) -> CodecResult<Self> {
        Self::new().with_target_temperature(fahrenheit)
    }

    pub fn with_fan_speed(mut self, percent: u8) -> CodecResult<Self> {
        self.fan_speed = Some(percent);
        self.validate()?;
        Ok(self)
    }

    pub fn with_target_temperature(mut self, fahrenheit: f64) -> CodecResult<Self> {
        self.target_temp = Some(fahrenheit);
        self.validate()?;
        Ok(self)
    }

    /// True when the command carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fan_speed.is_none() && self.target_temp.is_none()
    }

    /// Check every present field against the controller's accepted ranges.
    pub fn validate(&self) -> CodecResult<()> {
        if let Some(speed) = self.fan_speed
            && speed > FAN_SPEED_MAX
        {
            return Err(CodecError::out_of_range(
                "fan_speed",
                f64::from(speed),
                f64::from(FAN_SPEED_MIN),
                f64::from(FAN_SPEED_MAX),
            ));
        }
        if let Some(temp) = self.target_temp
            && !(TARGET_TEMP_MIN..=TARGET_TEMP_MAX).contains(&temp)
        {
            return Err(CodecError::out_of_range(
                "target_temp",
                temp,
                TARGET_TEMP_MIN,
                TARGET_TEMP_MAX,
            ));
        }
        Ok(())
    }
}

/// A single probe reading captured from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// `"{device_id}_{channel}"`.
    pub probe_id: String,
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub channel: ProbeChannel,
}

impl TelemetrySample {
    pub fn new(
        device_id: &str,
        channel: ProbeChannel,
        value: f64,
        captured_at: OffsetDateTime,
    ) -> Self {
        Self {
            probe_id: channel.probe_id(device_id),
            value,
            captured_at,
            channel,
        }
    }

    /// Device id recovered from the probe id.
    pub fn device_id(&self) -> &str {
        let suffix = self.channel.token();
        self.probe_id
            .strip_suffix(suffix)
            .and_then(|s| s.strip_suffix('_'))
            .unwrap_or(&self.probe_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> Status {
        Status {
            grill_temp: 250.5,
            food1_temp: Some(165.0),
            food2_temp: None,
            food3_temp: None,
            fan_speed: 45,
            target_temp: 275.0,
        }
    }

    #[test]
    fn test_probe_id_format() {
        assert_eq!(ProbeChannel::Primary.probe_id("grill-1"), "grill-1_primary");
        assert_eq!(ProbeChannel::Aux3.probe_id("grill-1"), "grill-1_aux3");
    }

    #[test]
    fn test_channel_from_str() {
        assert_eq!("AUX2".parse::<ProbeChannel>(), Ok(ProbeChannel::Aux2));
        assert!("aux4".parse::<ProbeChannel>().is_err());
    }

    #[test]
    fn test_probes_lists_all_slots() {
        let probes = sample_status().probes();
        assert_eq!(probes.len(), 4);
        assert_eq!(probes[0].value, Some(250.5));
        assert_eq!(probes[1].value, Some(165.0));
        assert!(!probes[2].is_active());
        assert!(!probes[3].is_active());
        assert_eq!(sample_status().active_probes(), 2);
    }

    #[test]
    fn test_samples_skip_inactive_channels() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let samples = sample_status().samples("dev", now);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].probe_id, "dev_primary");
        assert_eq!(samples[1].probe_id, "dev_aux1");
        assert_eq!(samples[1].channel, ProbeChannel::Aux1);
        assert!(samples.iter().all(|s| s.captured_at == now));
    }

    #[test]
    fn test_sample_device_id() {
        let sample = TelemetrySample::new(
            "my_grill",
            ProbeChannel::Aux1,
            140.0,
            OffsetDateTime::UNIX_EPOCH,
        );
        assert_eq!(sample.device_id(), "my_grill");
    }

    #[test]
    fn test_command_ranges() {
        assert!(Command::fan_speed(0).is_ok());
        assert!(Command::fan_speed(100).is_ok());
        assert!(Command::fan_speed(101).is_err());
        assert!(Command::target_temperature(32.0).is_ok());
        assert!(Command::target_temperature(1000.0).is_ok());
        assert!(Command::target_temperature(31.9).is_err());
        assert!(Command::target_temperature(f64::NAN).is_err());
    }

    #[test]
    fn test_command_builder_combines_fields() {
        let cmd = Command::fan_speed(30)
            .and_then(|c| c.with_target_temperature(225.0))
            .unwrap();
        assert_eq!(cmd.fan_speed, Some(30));
        assert_eq!(cmd.target_temp, Some(225.0));
        assert!(!cmd.is_empty());
        assert!(Command::new().is_empty());
    }

    #[test]
    fn test_pairing_state_tokens() {
        for state in [
            PairingState::Unpaired,
            PairingState::ShortRange,
            PairingState::Networked,
        ] {
            assert_eq!(state.as_str().parse::<PairingState>(), Ok(state));
        }
        assert_eq!(
            "known_protocol".parse::<DeviceKind>(),
            Ok(DeviceKind::KnownProtocol)
        );
        assert_eq!(DeviceKind::default(), DeviceKind::Unrecognized);
    }
}
