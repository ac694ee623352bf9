//! Tracing setup for the binary
// (c) 2025 the llrpd contributors

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Environment variable that overrides the log filter entirely.
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Sets up stderr logging once, for the process.
///
/// If `RUST_LOG` is set it wins outright; otherwise only this crate
/// logs, at `level`. The library itself never calls this - embedding
/// hosts own their subscriber.
pub(crate) fn setup(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_env(STANDARD_ENV_VAR) {
        Ok(filter) => filter,
        Err(e) => {
            if std::env::var(STANDARD_ENV_VAR).is_ok() {
                anyhow::bail!("{STANDARD_ENV_VAR} (set in environment) was not understood: {e}");
            }
            EnvFilter::try_new(format!("llrpd={level}"))?
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("installing tracing subscriber")?;
    INITIALISED.store(true, Ordering::Release);
    Ok(())
}

/// Has [`setup`] completed? Governs whether errors are reported via
/// tracing or bare stderr.
pub(crate) fn is_initialised() -> bool {
    INITIALISED.load(Ordering::Acquire)
}

/// Maps the binary's verbosity flags onto a default filter level.
pub(crate) fn trace_level(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}
