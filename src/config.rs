//! Command-line and environment configuration for the viewer binary.

use std::time::Duration;

use clap::Parser;

use crate::net::{ConnectionConfig, DEFAULT_MAX_FRAME_LEN, OutboundFraming};

/// Viewer settings, from flags with `SIMVIZ_*` environment fallbacks.
#[derive(Parser, Debug, Clone)]
#[command(name = "simviz", about = "Headless viewer for the traffic simulation server")]
pub struct Config {
    /// Simulation server host name or IP address.
    #[arg(long, env = "SIMVIZ_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "SIMVIZ_PORT", default_value_t = 42069)]
    pub port: u16,

    /// Give up connecting after this many milliseconds.
    #[arg(long, env = "SIMVIZ_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Dispatcher tick period in milliseconds.
    #[arg(
        long,
        env = "SIMVIZ_TICK_MS",
        default_value_t = 16,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub tick_ms: u64,

    /// Send `step` every N ticks. Without it the viewer only shows the
    /// initial snapshot and whatever the server pushes.
    #[arg(long, env = "SIMVIZ_STEP_EVERY", value_parser = clap::value_parser!(u32).range(1..))]
    pub step_every: Option<u32>,

    /// Largest inbound frame accepted, in bytes. 0 disables the limit.
    #[arg(long, env = "SIMVIZ_MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_bytes: u32,

    /// Send commands without a length prefix, for servers that read them
    /// with a plain `recv`.
    #[arg(long, env = "SIMVIZ_RAW_OUTBOUND")]
    pub raw_outbound: bool,
}

impl Config {
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_frame_len: (self.max_frame_bytes > 0).then_some(self.max_frame_bytes),
            outbound: if self.raw_outbound {
                OutboundFraming::Raw
            } else {
                OutboundFraming::LengthPrefixed
            },
        }
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Whether the tick with 1-based number `tick` should send `step`.
    #[must_use]
    pub fn steps_on(&self, tick: u64) -> bool {
        self.step_every.is_some_and(|every| tick % u64::from(every) == 0)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
