//! Service settings
// (c) 2025 the llrpd contributors
//
// Per-device connection parameters (host/port) arrive through protocol
// properties at registration time; this module is only the service's
// own knobs: timeouts, backoff bounds and the default LLRP port.

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::reader::ReaderOptions;

/// Default config file name, looked for in the working directory.
const DEFAULT_CONFIG_FILE: &str = "llrpd.toml";
/// Environment prefix: `LLRPD_REQUEST_TIMEOUT_SECS` and friends.
const ENV_PREFIX: &str = "LLRPD_";

/// Tunable service settings. All fields have sensible defaults; a TOML
/// file and `LLRPD_*` environment variables override them in that
/// order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bound on one read/write command batch, in seconds.
    pub request_timeout_secs: u64,
    /// Grace window for service shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// First reconnect delay, in milliseconds; doubles per failure.
    pub initial_backoff_ms: u64,
    /// Reconnect delay ceiling, in milliseconds.
    pub max_backoff_ms: u64,
    /// Bound on dialling a reader, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Bound on the version handshake, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// TCP port assumed when a reader is named without one. 5084 is
    /// the IANA allocation for LLRP.
    pub default_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            shutdown_grace_ms: 1_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            default_port: 5084,
        }
    }
}

impl Settings {
    /// Loads settings: defaults, then the TOML file (the given path,
    /// or `llrpd.toml` if present), then environment.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        figment = match file {
            Some(path) => figment.merge(Toml::file_exact(path)),
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context("loading settings")
    }

    /// Bound on one command batch.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Grace window for service shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// The connection-lifecycle tunables these settings imply.
    #[must_use]
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            close_grace: self.shutdown_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.default_port, 5084);
        assert_eq!(s.request_timeout().as_secs(), 30);
        assert_eq!(s.reader_options().max_backoff.as_secs(), 30);
    }

    #[test]
    fn environment_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LLRPD_DEFAULT_PORT", "15084");
            jail.set_env("LLRPD_REQUEST_TIMEOUT_SECS", "5");
            let s = Settings::load(None).expect("load");
            assert_eq!(s.default_port, 15084);
            assert_eq!(s.request_timeout_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn toml_file_overrides() {
        figment::Jail::expect_with(|jail| {
            let _ = jail.create_file("llrpd.toml", "initial_backoff_ms = 250\n")?;
            let s = Settings::load(None).expect("load");
            assert_eq!(s.initial_backoff_ms, 250);
            Ok(())
        });
    }
}
