//! Diagnostic CLI: poke one reader from a shell
// (c) 2025 the llrpd contributors

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::error;

use crate::config::Settings;
use crate::driver::{
    CommandRequest, Driver, ProtocolProperties, RESOURCE_ACCESS_SPEC_ID, RESOURCE_ACTION,
    RESOURCE_READER_CONFIG, RESOURCE_RO_SPEC, RESOURCE_RO_SPEC_ID,
};
use crate::util;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Talk LLRP to an RFID reader",
    infer_subcommands = true
)]
struct CliArgs {
    /// Reader host name or IP address
    #[arg(long, global = true, default_value = "")]
    host: String,
    /// Reader TCP port (defaults to the configured LLRP port)
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Path to a settings file (default: ./llrpd.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
    /// Log errors only
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reads a resource and prints the reader's answer as JSON.
    ///
    /// Resources: ReaderConfig, ReaderCapabilities, ROSpec, AccessSpec.
    Read {
        /// Resource name
        resource: String,
    },
    /// Writes a resource.
    ///
    /// `write ReaderConfig '<json>'`, `write ROSpec '<json>'`,
    /// `write ROSpecID <id> <action>` (Enable|Start|Stop|Disable|Delete),
    /// `write AccessSpecID <id> <action>` (Enable|Disable|Delete).
    Write {
        /// Resource name
        resource: String,
        /// Positional values for the resource
        values: Vec<String>,
    },
    /// Connects and prints unsolicited reader traffic (tag reports,
    /// reader events, keepalives) until interrupted.
    Watch {
        /// Give up after this many seconds (0 = until ctrl-c)
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
}

/// Main CLI entrypoint. Reads argv; call it from `main`.
#[must_use]
pub fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if util::tracing_is_initialised() {
                error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    let settings = Settings::load(args.config.as_deref())?;
    util::setup_tracing(util::trace_level(args.debug, args.quiet))?;
    anyhow::ensure!(!args.host.is_empty(), "--host is required");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?
        .block_on(run_async(args, settings))
}

async fn run_async(args: CliArgs, settings: Settings) -> Result<()> {
    let port = args.port.unwrap_or(settings.default_port);
    let device = format!("{}:{port}", args.host);
    let protocols = tcp_protocols(&args.host, port);

    let driver = Driver::new(settings);
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (discovery_tx, _discovery_rx) = mpsc::channel(1);
    driver.initialize(events_tx, discovery_tx);

    let outcome = match args.command {
        Command::Read { resource } => {
            let values = driver
                .handle_read_commands(&device, &protocols, &[CommandRequest::new(&resource)])
                .await?;
            for value in values {
                println!("{}", value.value);
            }
            Ok(())
        }
        Command::Write { resource, values } => {
            let (requests, params) = write_batch(&resource, values)?;
            driver
                .handle_write_commands(&device, &protocols, &requests, &params)
                .await?;
            println!("OK");
            Ok(())
        }
        Command::Watch { seconds } => {
            driver.add_device(&device, &protocols).await?;
            let until = if seconds == 0 {
                Duration::MAX
            } else {
                Duration::from_secs(seconds)
            };
            let watch = async {
                while let Some(event) = events_rx.recv().await {
                    println!("{}", serde_json::to_string(&event)?);
                }
                Ok::<_, anyhow::Error>(())
            };
            tokio::select! {
                r = watch => r,
                _ = tokio::signal::ctrl_c() => Ok(()),
                () = tokio::time::sleep(until) => Ok(()),
            }
        }
    };
    driver.stop(false).await;
    outcome
}

/// Shapes CLI positionals into the adapter's write batch.
fn write_batch(resource: &str, values: Vec<String>) -> Result<(Vec<CommandRequest>, Vec<String>)> {
    match resource {
        RESOURCE_RO_SPEC_ID | RESOURCE_ACCESS_SPEC_ID => {
            anyhow::ensure!(
                values.len() == 2,
                "{resource} needs an id and an action, e.g. `write {resource} 1 Enable`"
            );
            Ok((
                vec![
                    CommandRequest::new(resource),
                    CommandRequest::new(RESOURCE_ACTION),
                ],
                values,
            ))
        }
        RESOURCE_READER_CONFIG | RESOURCE_RO_SPEC => {
            anyhow::ensure!(
                values.len() == 1,
                "{resource} takes exactly one JSON body"
            );
            Ok((vec![CommandRequest::new(resource)], values))
        }
        other => anyhow::bail!("'{other}' is not a writable resource"),
    }
}

fn tcp_protocols(host: &str, port: u16) -> ProtocolProperties {
    let mut tcp = HashMap::new();
    let _ = tcp.insert("host".to_owned(), host.to_owned());
    let _ = tcp.insert("port".to_owned(), port.to_string());
    let mut protocols = HashMap::new();
    let _ = protocols.insert("tcp".to_owned(), tcp);
    protocols
}

#[cfg(test)]
mod tests {
    use super::{CliArgs, write_batch};
    use clap::Parser;

    #[test]
    fn parses_read() {
        let args = CliArgs::parse_from(["llrpd", "--host", "10.0.0.1", "read", "ReaderConfig"]);
        assert!(matches!(
            args.command,
            super::Command::Read { ref resource } if resource == "ReaderConfig"
        ));
    }

    #[test]
    fn write_batch_shapes_id_actions() {
        let (requests, params) =
            write_batch("ROSpecID", vec!["1".into(), "Start".into()]).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].resource, "Action");
        assert_eq!(params, vec!["1".to_owned(), "Start".to_owned()]);
    }

    #[test]
    fn write_batch_rejects_readonly_resources() {
        assert!(write_batch("ReaderCapabilities", vec!["{}".into()]).is_err());
    }
}
