//! Output formatting for text and JSON.

use anyhow::Result;
use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use pitmaster_core::{ConnectionState, DeviceState, DiscoveredGrill};
use pitmaster_store::{Session, StoredDevice, StoredSample};

use crate::config::Config;

/// Formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }

    /// Serialize a value as pretty JSON followed by a newline.
    pub fn as_json<T: serde::Serialize>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(value)? + "\n")
    }

    fn highlight(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            format!("{}", text.cyan())
        }
    }
}

/// RFC 3339 timestamp, or the debug form if formatting fails.
pub fn format_timestamp(time: OffsetDateTime) -> String {
    time.format(&Rfc3339).unwrap_or_else(|_| time.to_string())
}

fn clock(time: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", time.hour(), time.minute(), time.second())
}

fn temp(value: Option<f64>) -> String {
    value.map_or_else(|| "--".to_string(), |v| format!("{:.1}°F", v))
}

/// Trend arrow between two temperatures.
pub fn trend_indicator(current: f64, previous: f64, no_color: bool) -> &'static str {
    let diff = current - previous;
    if diff.abs() < 0.5 {
        "-"
    } else if diff > 0.0 {
        if no_color { "^" } else { "↑" }
    } else if no_color {
        "v"
    } else {
        "↓"
    }
}

/// One line per controller seen during a scan.
pub fn format_discovered_line(grill: &DiscoveredGrill, opts: &FormatOptions) -> String {
    let name = grill.name.as_deref().unwrap_or("Unknown");
    let rssi = grill
        .rssi
        .map_or_else(|| "N/A".to_string(), |r| format!("{} dBm", r));
    format!(
        "{:<20} {:<10} {}\n",
        opts.highlight(name),
        rssi,
        grill.device_id
    )
}

pub fn format_devices_text(devices: &[StoredDevice], config: &Config) -> String {
    if devices.is_empty() {
        return "No known devices. Run 'pitmaster scan' and 'pitmaster pair'.\n".to_string();
    }

    #[derive(Tabled)]
    struct DeviceRow {
        #[tabled(rename = "Id")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Alias")]
        alias: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Address")]
        address: String,
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| DeviceRow {
            id: d.id.clone(),
            name: d.display_name.clone().unwrap_or_default(),
            alias: config.alias_for(&d.id).unwrap_or_default().to_string(),
            state: d.pairing_state.to_string(),
            kind: d.kind.to_string(),
            address: d.last_known_address.clone().unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("{}\n", table)
}

pub fn format_sessions_text(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions recorded.\n".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "Session")]
        id: String,
        #[tabled(rename = "Device")]
        device: String,
        #[tabled(rename = "Started")]
        started: String,
        #[tabled(rename = "Ended")]
        ended: String,
        #[tabled(rename = "Note")]
        note: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            id: s.id.clone(),
            device: s.device_id.clone(),
            started: format_timestamp(s.started_at),
            ended: s
                .ended_at
                .map_or_else(|| "active".to_string(), format_timestamp),
            note: s.note.clone().unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("{}\n", table)
}

pub fn format_samples_text(samples: &[StoredSample]) -> String {
    if samples.is_empty() {
        return "No telemetry in this range.\n".to_string();
    }

    #[derive(Tabled)]
    struct SampleRow {
        #[tabled(rename = "Captured")]
        captured: String,
        #[tabled(rename = "Channel")]
        channel: String,
        #[tabled(rename = "Value")]
        value: String,
    }

    let rows: Vec<SampleRow> = samples
        .iter()
        .map(|s| SampleRow {
            captured: format_timestamp(s.captured_at),
            channel: s.channel.token().to_string(),
            value: format!("{:.1}", s.value),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("{}\n{} sample(s)\n", table, samples.len())
}

/// Watch line with a pit trend compared to the previous state.
pub fn format_state_line(
    state: &DeviceState,
    previous: Option<&DeviceState>,
    opts: &FormatOptions,
) -> String {
    // "~" until there is something to compare against
    let trend = match (state.grill_temp(), previous.and_then(DeviceState::grill_temp)) {
        (Some(current), Some(prev)) => trend_indicator(current, prev, opts.no_color),
        _ => "~",
    };

    let pit = temp(state.grill_temp());
    let pit = if opts.no_color {
        pit
    } else {
        format!("{}", pit.bold())
    };

    let food: Vec<String> = state.probes[1..]
        .iter()
        .filter(|p| p.is_active())
        .map(|p| format!("{} {}", p.channel.token(), temp(p.value)))
        .collect();
    let food = if food.is_empty() {
        String::new()
    } else {
        format!(" | {}", food.join(" "))
    };

    let marker = match state.connection_state {
        ConnectionState::Online => String::new(),
        ConnectionState::Reconnected if opts.no_color => " (reconnected)".to_string(),
        ConnectionState::Reconnected => format!(" {}", "(reconnected)".yellow()),
    };

    format!(
        "[{}] pit {} {} -> {:.0}°F | fan {}%{}{}\n",
        clock(state.captured_at),
        pit,
        trend,
        state.target_temp,
        state.fan_speed,
        food,
        marker
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitmaster_types::{DeviceKind, PairingState, ProbeChannel, Status};
    use time::macros::datetime;

    fn state(grill: f64, connection_state: ConnectionState) -> DeviceState {
        let status = Status {
            grill_temp: grill,
            food1_temp: Some(150.0),
            food2_temp: None,
            food3_temp: None,
            fan_speed: 40,
            target_temp: 250.0,
        };
        DeviceState::from_status(
            "grill",
            &status,
            connection_state,
            datetime!(2026-06-01 18:04:05 UTC),
        )
    }

    #[test]
    fn test_trend_indicator() {
        assert_eq!(trend_indicator(225.0, 225.2, true), "-");
        assert_eq!(trend_indicator(230.0, 225.0, true), "^");
        assert_eq!(trend_indicator(220.0, 225.0, true), "v");
        assert_eq!(trend_indicator(230.0, 225.0, false), "↑");
    }

    #[test]
    fn test_state_line_plain() {
        let opts = FormatOptions::new(true);
        let first = state(248.0, ConnectionState::Online);
        assert_eq!(
            format_state_line(&first, None, &opts),
            "[18:04:05] pit 248.0°F ~ -> 250°F | fan 40% | aux1 150.0°F\n"
        );

        let next = state(251.0, ConnectionState::Reconnected);
        let line = format_state_line(&next, Some(&first), &opts);
        assert!(line.contains("pit 251.0°F ^"));
        assert!(line.ends_with("(reconnected)\n"));
    }

    #[test]
    fn test_devices_text() {
        let config = Config::default();
        assert!(format_devices_text(&[], &config).starts_with("No known devices"));

        let now = datetime!(2026-06-01 18:00 UTC);
        let device = StoredDevice {
            id: "AA:BB".to_string(),
            display_name: Some("Pitmaster 01".to_string()),
            kind: DeviceKind::KnownProtocol,
            pairing_state: PairingState::Networked,
            last_known_address: Some("http://192.168.1.40".to_string()),
            extra_config: serde_json::Value::Null,
            first_seen: now,
            last_seen: now,
        };
        let text = format_devices_text(&[device], &config);
        assert!(text.contains("Pitmaster 01"));
        assert!(text.contains("networked"));
        assert!(text.contains("http://192.168.1.40"));
    }

    #[test]
    fn test_samples_text() {
        let sample = StoredSample {
            id: 1,
            session_id: "s".to_string(),
            probe_id: "grill_primary".to_string(),
            value: 225.0,
            captured_at: datetime!(2026-06-01 18:00 UTC),
            channel: ProbeChannel::Primary,
        };
        let text = format_samples_text(&[sample]);
        assert!(text.contains("primary"));
        assert!(text.contains("225.0"));
        assert!(text.ends_with("1 sample(s)\n"));
    }
}
