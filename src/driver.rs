//! The adapter surface the host framework drives
// (c) 2025 the llrpd contributors
//
// Six entry points: initialize, read, write, add/update/remove device,
// stop. Everything here is translation - resource names to typed
// requests on the way in, structured responses to JSON strings on the
// way out. The interesting machinery lives below, in the registry and
// the supervisors.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::ReaderEvent;
use crate::config::Settings;
use crate::protocol::messages::{
    AddRoSpec, DeleteAccessSpec, DeleteRoSpec, DisableAccessSpec, DisableRoSpec, EnableAccessSpec,
    EnableRoSpec, GetAccessSpecs, GetReaderCapabilities, GetReaderConfig, GetRoSpecs, RoSpec,
    SetReaderConfig, StartRoSpec, StopRoSpec,
};
use crate::reader::TrySendError;
use crate::registry::Registry;
use crate::util::lock;

/// Readable resources.
pub const RESOURCE_READER_CONFIG: &str = "ReaderConfig";
/// Readable resource: capability report.
pub const RESOURCE_READER_CAPABILITIES: &str = "ReaderCapabilities";
/// Readable resource: RO spec listing; writable as an `AddROSpec`.
pub const RESOURCE_RO_SPEC: &str = "ROSpec";
/// Readable resource: access spec listing.
pub const RESOURCE_ACCESS_SPEC: &str = "AccessSpec";
/// Writable resource: RO spec state transitions.
pub const RESOURCE_RO_SPEC_ID: &str = "ROSpecID";
/// Writable resource: access spec state transitions.
pub const RESOURCE_ACCESS_SPEC_ID: &str = "AccessSpecID";
/// The companion parameter naming the state transition.
pub const RESOURCE_ACTION: &str = "Action";

/// Depth of the internal unsolicited-message channel shared by every
/// connection.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// State transitions applicable to an RO spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum RoSpecAction {
    /// `EnableROSpec`
    Enable,
    /// `StartROSpec`
    Start,
    /// `StopROSpec`
    Stop,
    /// `DisableROSpec`
    Disable,
    /// `DeleteROSpec`
    Delete,
}

/// State transitions applicable to an access spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum AccessSpecAction {
    /// `EnableAccessSpec`
    Enable,
    /// `DisableAccessSpec`
    Disable,
    /// `DeleteAccessSpec`
    Delete,
}

/// Per-device protocol properties: group name -> field -> value.
/// Devices must carry a `tcp` group with `host` and `port`.
pub type ProtocolProperties = HashMap<String, HashMap<String, String>>;

/// One read or write request from the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    /// The device resource being addressed.
    pub resource: String,
}

impl CommandRequest {
    /// Convenience constructor.
    #[must_use]
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_owned(),
        }
    }
}

/// One value returned to the host; the payload is JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandValue {
    /// The resource the value answers.
    pub resource: String,
    /// JSON rendering of the reader's response.
    pub value: String,
}

/// An asynchronous value pushed at the host: either an unsolicited
/// reader message or a write confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceEvent {
    /// Device the event originated from.
    pub device: String,
    /// Resource name (a message-type name for unsolicited traffic).
    pub resource: String,
    /// JSON payload.
    pub value: String,
}

/// A device reported by the one-time discovery pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Registered name.
    pub name: String,
    /// Address the supervisor dials.
    pub address: String,
}

/// Adapter-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A protocol-properties field the adapter needs is absent, or a
    /// write arrived without its parameter.
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
    /// A companion write request had the wrong resource name.
    #[error("expected parameter '{expected}', got '{got}'")]
    WrongParameterName {
        /// name the write layout requires
        expected: &'static str,
        /// name actually supplied
        got: String,
    },
    /// An action string outside the action set for its resource.
    #[error("unrecognised action '{0}'")]
    BadActionName(String),
    /// A write batch with the wrong shape.
    #[error("expected {expected} write request(s) for this resource, got {got}")]
    WrongResourceCount {
        /// requests the layout requires
        expected: usize,
        /// requests actually supplied
        got: usize,
    },
    /// The device's host/port did not resolve to a TCP address.
    #[error("device address invalid: {0}")]
    AddrInvalid(String),
    /// A resource name outside the mapping tables.
    #[error("unknown device resource '{0}'")]
    UnknownResource(String),
    /// A parameter that failed to parse as its expected type.
    #[error("parameter '{name}' is not a valid {want}: '{value}'")]
    BadParameterValue {
        /// which parameter
        name: &'static str,
        /// expected type
        want: &'static str,
        /// offending input
        value: String,
    },
    /// A JSON body that failed to parse into its request model.
    #[error("invalid request body: {0}")]
    BadRequestBody(#[from] serde_json::Error),
    /// Failure from the connection runtime.
    #[error(transparent)]
    TrySend(#[from] TrySendError),
}

/// The device-service driver. Construct one at initialisation and keep
/// it for the life of the service; there is deliberately no global
/// instance.
#[derive(Debug)]
pub struct Driver {
    registry: Arc<Registry>,
    settings: Settings,
    /// Receiver half of the internal reader-event channel, consumed by
    /// `initialize`.
    pump_rx: Mutex<Option<mpsc::Receiver<ReaderEvent>>>,
    outlet: OnceLock<mpsc::Sender<DeviceEvent>>,
}

impl Driver {
    /// Builds the driver and its (idle) registry.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let registry = Arc::new(Registry::new(events_tx, settings.reader_options()));
        Self {
            registry,
            settings,
            pump_rx: Mutex::new(Some(events_rx)),
            outlet: OnceLock::new(),
        }
    }

    /// The registry, for embedders that want direct access to
    /// supervisors.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Records the host's outlets, starts pumping unsolicited reader
    /// messages onto the event outlet, and schedules the one-time
    /// discovery pass.
    pub fn initialize(
        &self,
        events: mpsc::Sender<DeviceEvent>,
        discovery: mpsc::Sender<Vec<DiscoveredDevice>>,
    ) {
        if self.outlet.set(events.clone()).is_err() {
            warn!("initialize called twice, keeping the first outlets");
            return;
        }
        if let Some(mut rx) = lock(&self.pump_rx).take() {
            drop(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let out = DeviceEvent {
                        device: event.device.to_string(),
                        resource: event.message_type.to_string(),
                        value: format!("\"{}\"", hex::encode(&event.payload)),
                    };
                    if events.send(out).await.is_err() {
                        debug!("event outlet closed, stopping pump");
                        break;
                    }
                }
            }));
        }
        let registry = self.registry.clone();
        drop(tokio::spawn(async move {
            let found = registry
                .snapshot()
                .into_iter()
                .map(|(name, addr)| DiscoveredDevice {
                    name,
                    address: addr.to_string(),
                })
                .collect::<Vec<_>>();
            info!(count = found.len(), "discovery pass complete");
            let _ = discovery.send(found).await;
        }));
    }

    /// Handles one batch of read requests against a device.
    pub async fn handle_read_commands(
        &self,
        device: &str,
        protocols: &ProtocolProperties,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>, DriverError> {
        let addr = resolve_tcp_addr(protocols).await?;
        let reader = self.registry.get_or_create(device, addr);
        let deadline = Instant::now() + self.settings.request_timeout();

        let mut values = Vec::with_capacity(requests.len());
        for request in requests {
            let value = match request.resource.as_str() {
                RESOURCE_READER_CONFIG => {
                    json_of(&reader.try_send(&GetReaderConfig::default(), deadline).await?)?
                }
                RESOURCE_READER_CAPABILITIES => json_of(
                    &reader
                        .try_send(&GetReaderCapabilities::default(), deadline)
                        .await?,
                )?,
                RESOURCE_RO_SPEC => json_of(&reader.try_send(&GetRoSpecs, deadline).await?)?,
                RESOURCE_ACCESS_SPEC => {
                    json_of(&reader.try_send(&GetAccessSpecs, deadline).await?)?
                }
                other => return Err(DriverError::UnknownResource(other.to_owned())),
            };
            values.push(CommandValue {
                resource: request.resource.clone(),
                value,
            });
        }
        Ok(values)
    }

    /// Handles one batch of write requests against a device.
    ///
    /// `params` pairs positionally with `requests`; an index is only
    /// ever used when it is strictly inside the slice.
    pub async fn handle_write_commands(
        &self,
        device: &str,
        protocols: &ProtocolProperties,
        requests: &[CommandRequest],
        params: &[String],
    ) -> Result<(), DriverError> {
        let addr = resolve_tcp_addr(protocols).await?;
        let reader = self.registry.get_or_create(device, addr);
        let deadline = Instant::now() + self.settings.request_timeout();

        let first = requests
            .first()
            .ok_or(DriverError::WrongResourceCount {
                expected: 1,
                got: 0,
            })?;
        match first.resource.as_str() {
            RESOURCE_READER_CONFIG => {
                let body = param_at(params, 0)?;
                let config: SetReaderConfig = serde_json::from_str(body)?;
                let reply = reader.try_send(&config, deadline).await?;
                self.confirm(device, RESOURCE_READER_CONFIG, &reply);
            }
            RESOURCE_RO_SPEC => {
                let body = param_at(params, 0)?;
                let ro_spec: RoSpec = serde_json::from_str(body)?;
                let reply = reader.try_send(&AddRoSpec { ro_spec }, deadline).await?;
                self.confirm(device, RESOURCE_RO_SPEC, &reply);
            }
            RESOURCE_RO_SPEC_ID => {
                let (id, action) = id_and_action::<RoSpecAction>(requests, params)?;
                match action {
                    RoSpecAction::Enable => {
                        let reply = reader
                            .try_send(&EnableRoSpec { ro_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_RO_SPEC_ID, &reply);
                    }
                    RoSpecAction::Start => {
                        let reply = reader
                            .try_send(&StartRoSpec { ro_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_RO_SPEC_ID, &reply);
                    }
                    RoSpecAction::Stop => {
                        let reply = reader
                            .try_send(&StopRoSpec { ro_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_RO_SPEC_ID, &reply);
                    }
                    RoSpecAction::Disable => {
                        let reply = reader
                            .try_send(&DisableRoSpec { ro_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_RO_SPEC_ID, &reply);
                    }
                    RoSpecAction::Delete => {
                        let reply = reader
                            .try_send(&DeleteRoSpec { ro_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_RO_SPEC_ID, &reply);
                    }
                }
            }
            RESOURCE_ACCESS_SPEC_ID => {
                let (id, action) = id_and_action::<AccessSpecAction>(requests, params)?;
                match action {
                    AccessSpecAction::Enable => {
                        let reply = reader
                            .try_send(&EnableAccessSpec { access_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_ACCESS_SPEC_ID, &reply);
                    }
                    AccessSpecAction::Disable => {
                        let reply = reader
                            .try_send(&DisableAccessSpec { access_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_ACCESS_SPEC_ID, &reply);
                    }
                    AccessSpecAction::Delete => {
                        let reply = reader
                            .try_send(&DeleteAccessSpec { access_spec_id: id }, deadline)
                            .await?;
                        self.confirm(device, RESOURCE_ACCESS_SPEC_ID, &reply);
                    }
                }
            }
            other => return Err(DriverError::UnknownResource(other.to_owned())),
        }
        Ok(())
    }

    /// Registers a device, starting its supervisor.
    pub async fn add_device(
        &self,
        name: &str,
        protocols: &ProtocolProperties,
    ) -> Result<(), DriverError> {
        let addr = resolve_tcp_addr(protocols).await?;
        let _ = self.registry.get_or_create(name, addr);
        Ok(())
    }

    /// Re-resolves a device's address, triggering a redial when it
    /// changed.
    pub async fn update_device(
        &self,
        name: &str,
        protocols: &ProtocolProperties,
    ) -> Result<(), DriverError> {
        let addr = resolve_tcp_addr(protocols).await?;
        match self.registry.get(name) {
            Some(device) => device.update_addr(addr),
            None => {
                let _ = self.registry.get_or_create(name, addr);
            }
        }
        Ok(())
    }

    /// Detaches a device; its connection closes in the background.
    pub fn remove_device(&self, name: &str) -> bool {
        self.registry.remove(name, self.settings.shutdown_grace())
    }

    /// Stops every device. Unless `force`, total shutdown is bounded
    /// by the configured grace window.
    pub async fn stop(&self, force: bool) {
        self.registry
            .stop_all(force, self.settings.shutdown_grace())
            .await;
    }

    /// Echoes a successful write's response onto the event outlet so
    /// observers see the confirmation.
    fn confirm<T: Serialize>(&self, device: &str, resource: &str, reply: &T) {
        let Some(outlet) = self.outlet.get() else {
            return;
        };
        let value = match serde_json::to_string(reply) {
            Ok(v) => v,
            Err(e) => {
                warn!(device, resource, error = %e, "write confirmation not serialisable");
                return;
            }
        };
        let event = DeviceEvent {
            device: device.to_owned(),
            resource: resource.to_owned(),
            value,
        };
        if let Err(e) = outlet.try_send(event) {
            debug!(device, resource, "event outlet full, dropping confirmation: {e}");
        }
    }
}

fn json_of<T: Serialize>(reply: &T) -> Result<String, DriverError> {
    Ok(serde_json::to_string(reply)?)
}

/// Fetches `params[idx]`, strictly bounds-checked.
fn param_at(params: &[String], idx: usize) -> Result<&str, DriverError> {
    if idx < params.len() {
        Ok(&params[idx])
    } else {
        Err(DriverError::MissingParameter("value"))
    }
}

/// Pulls the `(id, action)` pair out of a two-request write batch.
fn id_and_action<A: std::str::FromStr>(
    requests: &[CommandRequest],
    params: &[String],
) -> Result<(u32, A), DriverError> {
    if requests.len() != 2 {
        return Err(DriverError::WrongResourceCount {
            expected: 2,
            got: requests.len(),
        });
    }
    if requests[1].resource != RESOURCE_ACTION {
        return Err(DriverError::WrongParameterName {
            expected: RESOURCE_ACTION,
            got: requests[1].resource.clone(),
        });
    }
    let raw_id = param_at(params, 0)?;
    let id: u32 = raw_id
        .parse()
        .map_err(|_| DriverError::BadParameterValue {
            name: "id",
            want: "uint32",
            value: raw_id.to_owned(),
        })?;
    let raw_action = param_at(params, 1)?;
    let action = raw_action
        .parse()
        .map_err(|_| DriverError::BadActionName(raw_action.to_owned()))?;
    Ok((id, action))
}

/// Resolves the `tcp` protocol-properties group to a socket address.
async fn resolve_tcp_addr(protocols: &ProtocolProperties) -> Result<SocketAddr, DriverError> {
    let tcp = protocols
        .get("tcp")
        .ok_or(DriverError::MissingParameter("tcp"))?;
    let host = tcp.get("host").ok_or(DriverError::MissingParameter("host"))?;
    let port = tcp.get("port").ok_or(DriverError::MissingParameter("port"))?;
    let port: u16 = port.parse().map_err(|_| DriverError::BadParameterValue {
        name: "port",
        want: "uint16",
        value: port.clone(),
    })?;
    let target = format!("{host}:{port}");
    tokio::net::lookup_host(&target)
        .await
        .map_err(|e| DriverError::AddrInvalid(format!("{target}: {e}")))?
        .next()
        .ok_or_else(|| DriverError::AddrInvalid(format!("{target}: no addresses")))
}

#[cfg(test)]
mod tests;
