//! Command-line interface for WiFi grill controllers.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby controllers over Bluetooth |
//! | `pair` | Open a Bluetooth link and remember the controller |
//! | `provision` | Send WiFi credentials over Bluetooth |
//! | `bind` | Record the controller's network address and probe it |
//! | `detect` | Check whether a device speaks the grill protocol |
//! | `watch` | Stream live readings, optionally recording a session |
//! | `set-fan` / `set-target` | Send control commands |
//! | `sessions` / `history` | Browse recorded cooks |
//! | `prune` | Delete old telemetry |
//! | `devices` | List known controllers |
//!
//! # Configuration
//!
//! Settings live in `~/.config/pitmaster/config.toml` (or the platform
//! equivalent), or in the file given by `--config` / `PITMASTER_CONFIG`:
//!
//! ```toml
//! [storage]
//! path = "/home/me/.local/share/pitmaster/data.db"
//!
//! [polling]
//! interval_secs = 5
//!
//! [pairing]
//! scan_timeout_secs = 10
//!
//! [reconnect]
//! max_attempts = 3
//! initial_delay_ms = 1000
//!
//! [[devices]]
//! alias = "backyard"
//! id = "AA:BB:CC:DD:EE:FF"
//! ```
//!
//! # Examples
//!
//! ```bash
//! pitmaster scan
//! pitmaster provision backyard --ssid home
//! pitmaster bind backyard 192.168.1.40
//! pitmaster watch backyard --record --note "pork shoulder"
//! pitmaster set-target backyard 250
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod format;
pub mod util;

pub use pitmaster_core;
pub use pitmaster_store;
