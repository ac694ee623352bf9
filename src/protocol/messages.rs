//! Typed LLRP messages and the request/response catalog
// (c) 2025 the llrpd contributors
//
// Only the framing-level structure of each message is modelled. Bodies
// the adapter has no business interpreting (capability trees, full
// reader configuration, RO/access spec listings) decode their status
// and keep the remaining parameter bytes raw; JSON output renders them
// as hex.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::header::MessageType;
use super::status::{DecodeError, LlrpStatus};

// TLV parameter type codes used by the write-direction models.
const PARAM_RO_SPEC: u16 = 177;
const PARAM_RO_BOUNDARY_SPEC: u16 = 178;
const PARAM_RO_SPEC_START_TRIGGER: u16 = 179;
const PARAM_PERIODIC_TRIGGER_VALUE: u16 = 180;
const PARAM_RO_SPEC_STOP_TRIGGER: u16 = 182;
const PARAM_AI_SPEC: u16 = 183;
const PARAM_AI_SPEC_STOP_TRIGGER: u16 = 184;
const PARAM_INVENTORY_PARAMETER_SPEC: u16 = 186;
const PARAM_KEEPALIVE_SPEC: u16 = 220;
const PARAM_EVENTS_AND_REPORTS: u16 = 226;
const PARAM_RO_REPORT_SPEC: u16 = 237;
const PARAM_TAG_REPORT_CONTENT_SELECTOR: u16 = 238;

/// Payload marshalling failures (outbound direction).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A TLV parameter grew past its 16-bit length field.
    #[error("parameter {param} would exceed the 16-bit TLV length")]
    ParameterOverflow {
        /// parameter type code
        param: u16,
    },
}

/// A message the client can put on the wire.
pub trait OutgoingPayload {
    /// The type code this message is sent under.
    const MESSAGE_TYPE: MessageType;

    /// Appends the payload body to `buf`.
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;

    /// Convenience: the encoded body as a fresh buffer.
    fn to_bytes(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// A message the client can take off the wire.
pub trait IncomingPayload: Sized {
    /// The type code this message arrives under.
    const MESSAGE_TYPE: MessageType;

    /// Parses the payload body.
    fn decode(payload: Bytes) -> Result<Self, DecodeError>;
}

/// A request kind usable on the correlated send path.
pub trait LlrpRequest: OutgoingPayload {
    /// The paired response kind.
    type Reply: IncomingPayload + LlrpResponse;
}

/// Common surface of response messages.
pub trait LlrpResponse {
    /// The embedded `LLRPStatus`, where the message defines one.
    fn status(&self) -> Option<&LlrpStatus>;
}

impl MessageType {
    /// The response type paired with a request type, if the code is a
    /// registered request. `CustomMessage` pairs with itself;
    /// correlation there is by message id alone.
    #[must_use]
    pub fn response_type(self) -> Option<Self> {
        Some(match self {
            Self::GET_READER_CAPABILITIES => Self::GET_READER_CAPABILITIES_RESPONSE,
            Self::GET_READER_CONFIG => Self::GET_READER_CONFIG_RESPONSE,
            Self::SET_READER_CONFIG => Self::SET_READER_CONFIG_RESPONSE,
            Self::CLOSE_CONNECTION => Self::CLOSE_CONNECTION_RESPONSE,
            Self::ADD_ROSPEC => Self::ADD_ROSPEC_RESPONSE,
            Self::DELETE_ROSPEC => Self::DELETE_ROSPEC_RESPONSE,
            Self::START_ROSPEC => Self::START_ROSPEC_RESPONSE,
            Self::STOP_ROSPEC => Self::STOP_ROSPEC_RESPONSE,
            Self::ENABLE_ROSPEC => Self::ENABLE_ROSPEC_RESPONSE,
            Self::DISABLE_ROSPEC => Self::DISABLE_ROSPEC_RESPONSE,
            Self::GET_ROSPECS => Self::GET_ROSPECS_RESPONSE,
            Self::ADD_ACCESS_SPEC => Self::ADD_ACCESS_SPEC_RESPONSE,
            Self::DELETE_ACCESS_SPEC => Self::DELETE_ACCESS_SPEC_RESPONSE,
            Self::ENABLE_ACCESS_SPEC => Self::ENABLE_ACCESS_SPEC_RESPONSE,
            Self::DISABLE_ACCESS_SPEC => Self::DISABLE_ACCESS_SPEC_RESPONSE,
            Self::GET_ACCESS_SPECS => Self::GET_ACCESS_SPECS_RESPONSE,
            Self::GET_SUPPORTED_VERSION => Self::GET_SUPPORTED_VERSION_RESPONSE,
            Self::SET_PROTOCOL_VERSION => Self::SET_PROTOCOL_VERSION_RESPONSE,
            Self::CUSTOM_MESSAGE => Self::CUSTOM_MESSAGE,
            _ => return None,
        })
    }
}

/// Writes a TLV parameter, back-patching the length once the body is
/// known.
pub(crate) fn put_tlv<F>(buf: &mut BytesMut, param: u16, body: F) -> Result<(), EncodeError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), EncodeError>,
{
    let at = buf.len();
    buf.put_u16(param);
    buf.put_u16(0);
    body(buf)?;
    let total = buf.len() - at;
    let Ok(total16) = u16::try_from(total) else {
        return Err(EncodeError::ParameterOverflow { param });
    };
    buf[at + 2..at + 4].copy_from_slice(&total16.to_be_bytes());
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// READ-DIRECTION REQUESTS

/// `GetReaderCapabilities`: all capability data by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct GetReaderCapabilities {
    /// Which capability subset to report; 0 requests everything.
    pub requested_data: u8,
}

impl OutgoingPayload for GetReaderCapabilities {
    const MESSAGE_TYPE: MessageType = MessageType::GET_READER_CAPABILITIES;
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(self.requested_data);
        Ok(())
    }
}
impl LlrpRequest for GetReaderCapabilities {
    type Reply = GetReaderCapabilitiesResponse;
}

/// `GetReaderConfig`: all configuration data by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct GetReaderConfig {
    /// Restrict the report to one antenna; 0 means all.
    #[serde(rename = "AntennaID")]
    pub antenna_id: u16,
    /// Which configuration subset to report; 0 requests everything.
    pub requested_data: u8,
    /// Restrict GPI reporting to one port; 0 means all.
    #[serde(rename = "GPIPortNum")]
    pub gpi_port: u16,
    /// Restrict GPO reporting to one port; 0 means all.
    #[serde(rename = "GPOPortNum")]
    pub gpo_port: u16,
}

impl OutgoingPayload for GetReaderConfig {
    const MESSAGE_TYPE: MessageType = MessageType::GET_READER_CONFIG;
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u16(self.antenna_id);
        buf.put_u8(self.requested_data);
        buf.put_u16(self.gpi_port);
        buf.put_u16(self.gpo_port);
        Ok(())
    }
}
impl LlrpRequest for GetReaderConfig {
    type Reply = GetReaderConfigResponse;
}

macro_rules! empty_request {
    ($(#[$doc:meta])* $name:ident => $mtype:ident, $reply:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name;

        impl OutgoingPayload for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$mtype;
            fn encode(&self, _buf: &mut BytesMut) -> Result<(), EncodeError> {
                Ok(())
            }
        }
        impl LlrpRequest for $name {
            type Reply = $reply;
        }
    };
}

empty_request! {
    /// `GetROSpecs`: lists the reader's configured RO specs.
    GetRoSpecs => GET_ROSPECS, GetRoSpecsResponse
}
empty_request! {
    /// `GetAccessSpecs`: lists the reader's configured access specs.
    GetAccessSpecs => GET_ACCESS_SPECS, GetAccessSpecsResponse
}
empty_request! {
    /// `GetSupportedVersion`: first half of the version handshake.
    /// Pre-1.1 firmware answers this with an `ErrorMessage`.
    GetSupportedVersion => GET_SUPPORTED_VERSION, GetSupportedVersionResponse
}
empty_request! {
    /// `CloseConnection`: polite goodbye before the socket drops.
    CloseConnection => CLOSE_CONNECTION, CloseConnectionResponse
}

/// `SetProtocolVersion`: second half of the version handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetProtocolVersion {
    /// The version both ends will speak from here on.
    pub version: u8,
}

impl OutgoingPayload for SetProtocolVersion {
    const MESSAGE_TYPE: MessageType = MessageType::SET_PROTOCOL_VERSION;
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(self.version);
        Ok(())
    }
}
impl LlrpRequest for SetProtocolVersion {
    type Reply = SetProtocolVersionResponse;
}

/// `KeepAliveAck`: sent in reply to a reader's `KeepAlive`. Has no
/// response and therefore no [`LlrpRequest`] impl.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepAliveAck;

impl OutgoingPayload for KeepAliveAck {
    const MESSAGE_TYPE: MessageType = MessageType::KEEP_ALIVE_ACK;
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), EncodeError> {
        Ok(())
    }
}

macro_rules! id_request {
    ($(#[$doc:meta])* $name:ident, $field:ident, $rename:literal => $mtype:ident, $reply:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct $name {
            #[doc = "The spec the operation applies to."]
            #[serde(rename = $rename)]
            pub $field: u32,
        }

        impl OutgoingPayload for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$mtype;
            fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
                buf.put_u32(self.$field);
                Ok(())
            }
        }
        impl LlrpRequest for $name {
            type Reply = $reply;
        }
    };
}

id_request! {
    /// `EnableROSpec`.
    EnableRoSpec, ro_spec_id, "ROSpecID" => ENABLE_ROSPEC, EnableRoSpecResponse
}
id_request! {
    /// `StartROSpec`.
    StartRoSpec, ro_spec_id, "ROSpecID" => START_ROSPEC, StartRoSpecResponse
}
id_request! {
    /// `StopROSpec`.
    StopRoSpec, ro_spec_id, "ROSpecID" => STOP_ROSPEC, StopRoSpecResponse
}
id_request! {
    /// `DisableROSpec`.
    DisableRoSpec, ro_spec_id, "ROSpecID" => DISABLE_ROSPEC, DisableRoSpecResponse
}
id_request! {
    /// `DeleteROSpec`. Id 0 deletes every RO spec on the reader.
    DeleteRoSpec, ro_spec_id, "ROSpecID" => DELETE_ROSPEC, DeleteRoSpecResponse
}
id_request! {
    /// `EnableAccessSpec`.
    EnableAccessSpec, access_spec_id, "AccessSpecID" => ENABLE_ACCESS_SPEC, EnableAccessSpecResponse
}
id_request! {
    /// `DisableAccessSpec`.
    DisableAccessSpec, access_spec_id, "AccessSpecID" => DISABLE_ACCESS_SPEC, DisableAccessSpecResponse
}
id_request! {
    /// `DeleteAccessSpec`. Id 0 deletes every access spec.
    DeleteAccessSpec, access_spec_id, "AccessSpecID" => DELETE_ACCESS_SPEC, DeleteAccessSpecResponse
}

////////////////////////////////////////////////////////////////////////
// WRITE-DIRECTION MODELS

/// `SetReaderConfig`, restricted to the configuration the adapter
/// exposes over its schemaless boundary. Unknown JSON fields are
/// rejected rather than silently dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct SetReaderConfig {
    /// Wipe the reader's configuration before applying the rest.
    pub reset_to_factory_defaults: bool,
    /// Keepalive cadence; absent leaves the reader's setting alone.
    pub keepalive_spec: Option<KeepaliveSpec>,
    /// Event/report buffering across reconnects.
    pub events_and_reports: Option<EventsAndReports>,
    /// Default report generation for RO specs that do not carry their
    /// own.
    #[serde(rename = "ROReportSpec")]
    pub ro_report_spec: Option<RoReportSpec>,
}

impl OutgoingPayload for SetReaderConfig {
    const MESSAGE_TYPE: MessageType = MessageType::SET_READER_CONFIG;
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(u8::from(self.reset_to_factory_defaults) << 7);
        if let Some(ka) = &self.keepalive_spec {
            ka.encode(buf)?;
        }
        if let Some(er) = &self.events_and_reports {
            er.encode(buf)?;
        }
        if let Some(rs) = &self.ro_report_spec {
            rs.encode(buf)?;
        }
        Ok(())
    }
}
impl LlrpRequest for SetReaderConfig {
    type Reply = SetReaderConfigResponse;
}

/// KeepaliveSpec parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct KeepaliveSpec {
    /// 0 = none, 1 = periodic.
    pub trigger: u8,
    /// Period in milliseconds when the trigger is periodic.
    pub interval: u32,
}

impl KeepaliveSpec {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_KEEPALIVE_SPEC, |b| {
            b.put_u8(self.trigger);
            b.put_u32(self.interval);
            Ok(())
        })
    }
}

/// EventsAndReports parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct EventsAndReports {
    /// Hold reports generated while no client was connected.
    pub hold_events_and_reports_upon_reconnect: bool,
}

impl EventsAndReports {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_EVENTS_AND_REPORTS, |b| {
            b.put_u8(u8::from(self.hold_events_and_reports_upon_reconnect) << 7);
            Ok(())
        })
    }
}

/// ROReportSpec parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct RoReportSpec {
    /// Report trigger selector (0 = none; see the standard for 1..=7).
    pub trigger: u8,
    /// Trigger threshold; meaning depends on `trigger`, 0 = unlimited.
    pub n: u16,
    /// Which fields each tag report carries.
    pub tag_report_content_selector: TagReportContentSelector,
}

impl RoReportSpec {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_RO_REPORT_SPEC, |b| {
            b.put_u8(self.trigger);
            b.put_u16(self.n);
            self.tag_report_content_selector.encode(b)
        })
    }
}

/// TagReportContentSelector parameter: ten flags packed into a 16-bit
/// word, most significant bit first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
#[allow(missing_docs)] // flag names track the standard
pub struct TagReportContentSelector {
    #[serde(rename = "EnableROSpecID")]
    pub enable_ro_spec_id: bool,
    pub enable_spec_index: bool,
    #[serde(rename = "EnableInventoryParameterSpecID")]
    pub enable_inventory_parameter_spec_id: bool,
    #[serde(rename = "EnableAntennaID")]
    pub enable_antenna_id: bool,
    pub enable_channel_index: bool,
    #[serde(rename = "EnablePeakRSSI")]
    pub enable_peak_rssi: bool,
    pub enable_first_seen_timestamp: bool,
    pub enable_last_seen_timestamp: bool,
    pub enable_tag_seen_count: bool,
    #[serde(rename = "EnableAccessSpecID")]
    pub enable_access_spec_id: bool,
}

impl TagReportContentSelector {
    fn bits(self) -> u16 {
        let flags = [
            self.enable_ro_spec_id,
            self.enable_spec_index,
            self.enable_inventory_parameter_spec_id,
            self.enable_antenna_id,
            self.enable_channel_index,
            self.enable_peak_rssi,
            self.enable_first_seen_timestamp,
            self.enable_last_seen_timestamp,
            self.enable_tag_seen_count,
            self.enable_access_spec_id,
        ];
        flags
            .iter()
            .enumerate()
            .filter(|&(_, &on)| on)
            .fold(0u16, |acc, (i, _)| {
                #[allow(clippy::cast_possible_truncation)]
                let bit = 15 - i as u16;
                acc | (1 << bit)
            })
    }

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_TAG_REPORT_CONTENT_SELECTOR, |b| {
            b.put_u16(self.bits());
            Ok(())
        })
    }
}

/// An RO spec: when and how the reader runs an inventory operation.
///
/// This is the adapter's JSON surface for the `ROSpec` write resource;
/// it marshals to the ROSpec TLV parameter tree inside an
/// [`AddRoSpec`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct RoSpec {
    /// Non-zero identifier the other RO spec operations refer to.
    #[serde(rename = "ROSpecID")]
    pub ro_spec_id: u32,
    /// Scheduling priority, 0 (highest) ..= 7.
    pub priority: u8,
    /// Initial state; a newly added spec must be 0 (disabled).
    pub current_state: u8,
    /// Start/stop triggers.
    #[serde(rename = "ROBoundarySpec")]
    pub ro_boundary_spec: RoBoundarySpec,
    /// Antenna inventory operations, in execution order.
    #[serde(rename = "AISpecs")]
    pub ai_specs: Vec<AiSpec>,
    /// Per-spec report generation; absent falls back to the reader
    /// default.
    #[serde(rename = "ROReportSpec")]
    pub ro_report_spec: Option<RoReportSpec>,
}

impl RoSpec {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_RO_SPEC, |b| {
            b.put_u32(self.ro_spec_id);
            b.put_u8(self.priority);
            b.put_u8(self.current_state);
            self.ro_boundary_spec.encode(b)?;
            for ai in &self.ai_specs {
                ai.encode(b)?;
            }
            if let Some(rs) = &self.ro_report_spec {
                rs.encode(b)?;
            }
            Ok(())
        })
    }
}

/// ROBoundarySpec parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct RoBoundarySpec {
    /// When the RO spec starts running.
    #[serde(rename = "ROSpecStartTrigger")]
    pub ro_spec_start_trigger: RoSpecStartTrigger,
    /// When it stops.
    #[serde(rename = "ROSpecStopTrigger")]
    pub ro_spec_stop_trigger: RoSpecStopTrigger,
}

impl RoBoundarySpec {
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_RO_BOUNDARY_SPEC, |b| {
            self.ro_spec_start_trigger.encode(b)?;
            self.ro_spec_stop_trigger.encode(b)
        })
    }
}

/// ROSpecStartTrigger parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct RoSpecStartTrigger {
    /// 0 = null (client starts it), 1 = immediate, 2 = periodic,
    /// 3 = GPI.
    pub trigger: u8,
    /// Required when `trigger` is 2.
    pub periodic_trigger_value: Option<PeriodicTriggerValue>,
}

impl RoSpecStartTrigger {
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_RO_SPEC_START_TRIGGER, |b| {
            b.put_u8(self.trigger);
            if let Some(p) = self.periodic_trigger_value {
                p.encode(b)?;
            }
            Ok(())
        })
    }
}

/// PeriodicTriggerValue parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct PeriodicTriggerValue {
    /// Milliseconds before the first firing.
    pub offset: u32,
    /// Milliseconds between firings; 0 fires once.
    pub period: u32,
}

impl PeriodicTriggerValue {
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_PERIODIC_TRIGGER_VALUE, |b| {
            b.put_u32(self.offset);
            b.put_u32(self.period);
            Ok(())
        })
    }
}

/// ROSpecStopTrigger parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct RoSpecStopTrigger {
    /// 0 = null (runs until told to stop), 1 = duration.
    pub trigger: u8,
    /// Milliseconds, consulted when `trigger` is 1.
    pub duration_trigger_value: u32,
}

impl RoSpecStopTrigger {
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_RO_SPEC_STOP_TRIGGER, |b| {
            b.put_u8(self.trigger);
            b.put_u32(self.duration_trigger_value);
            Ok(())
        })
    }
}

/// AISpec parameter: which antennas to inventory and when to stop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct AiSpec {
    /// Antenna ids; a single 0 means every antenna.
    #[serde(rename = "AntennaIDs")]
    pub antenna_ids: Vec<u16>,
    /// When this antenna pass ends.
    #[serde(rename = "AISpecStopTrigger")]
    pub ai_spec_stop_trigger: AiSpecStopTrigger,
    /// Air-protocol settings per inventory pass.
    pub inventory_parameter_specs: Vec<InventoryParameterSpec>,
}

impl AiSpec {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_AI_SPEC, |b| {
            let Ok(count) = u16::try_from(self.antenna_ids.len()) else {
                return Err(EncodeError::ParameterOverflow {
                    param: PARAM_AI_SPEC,
                });
            };
            b.put_u16(count);
            for id in &self.antenna_ids {
                b.put_u16(*id);
            }
            self.ai_spec_stop_trigger.encode(b)?;
            for inv in &self.inventory_parameter_specs {
                inv.encode(b)?;
            }
            Ok(())
        })
    }
}

/// AISpecStopTrigger parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct AiSpecStopTrigger {
    /// 0 = null (stop with the RO spec), 1 = duration.
    pub trigger: u8,
    /// Milliseconds, consulted when `trigger` is 1.
    pub duration_trigger_value: u32,
}

impl AiSpecStopTrigger {
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_AI_SPEC_STOP_TRIGGER, |b| {
            b.put_u8(self.trigger);
            b.put_u32(self.duration_trigger_value);
            Ok(())
        })
    }
}

/// InventoryParameterSpec parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct InventoryParameterSpec {
    /// Non-zero identifier, unique within the AI spec.
    #[serde(rename = "InventoryParameterSpecID")]
    pub inventory_parameter_spec_id: u16,
    /// Air protocol; 1 is EPCGlobal Class-1 Gen-2.
    #[serde(rename = "ProtocolID")]
    pub protocol_id: u8,
}

impl Default for InventoryParameterSpec {
    fn default() -> Self {
        Self {
            inventory_parameter_spec_id: 1,
            protocol_id: 1,
        }
    }
}

impl InventoryParameterSpec {
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        put_tlv(buf, PARAM_INVENTORY_PARAMETER_SPEC, |b| {
            b.put_u16(self.inventory_parameter_spec_id);
            b.put_u8(self.protocol_id);
            Ok(())
        })
    }
}

/// `AddROSpec`: installs an [`RoSpec`] on the reader.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct AddRoSpec {
    /// The spec to install; must arrive disabled.
    #[serde(rename = "ROSpec")]
    pub ro_spec: RoSpec,
}

impl OutgoingPayload for AddRoSpec {
    const MESSAGE_TYPE: MessageType = MessageType::ADD_ROSPEC;
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        self.ro_spec.encode(buf)
    }
}
impl LlrpRequest for AddRoSpec {
    type Reply = AddRoSpecResponse;
}

/// `CustomMessage`: vendor extension traffic. Its own response pair;
/// correlation is by message id alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct CustomMessage {
    /// IANA vendor identifier.
    #[serde(rename = "VendorID")]
    pub vendor_id: u32,
    /// Vendor-defined message subtype.
    pub message_subtype: u8,
    /// Opaque vendor payload, hex in JSON.
    #[serde(with = "crate::util::hex")]
    pub data: Bytes,
}

impl OutgoingPayload for CustomMessage {
    const MESSAGE_TYPE: MessageType = MessageType::CUSTOM_MESSAGE;
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u32(self.vendor_id);
        buf.put_u8(self.message_subtype);
        buf.put_slice(&self.data);
        Ok(())
    }
}

impl IncomingPayload for CustomMessage {
    const MESSAGE_TYPE: MessageType = MessageType::CUSTOM_MESSAGE;
    fn decode(mut payload: Bytes) -> Result<Self, DecodeError> {
        if payload.remaining() < 5 {
            return Err(DecodeError::Truncated);
        }
        let vendor_id = payload.get_u32();
        let message_subtype = payload.get_u8();
        Ok(Self {
            vendor_id,
            message_subtype,
            data: payload,
        })
    }
}

impl LlrpResponse for CustomMessage {
    fn status(&self) -> Option<&LlrpStatus> {
        None
    }
}

impl LlrpRequest for CustomMessage {
    type Reply = CustomMessage;
}

////////////////////////////////////////////////////////////////////////
// RESPONSES

macro_rules! status_only_response {
    ($(#[$doc:meta])* $name:ident => $mtype:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
        pub struct $name {
            #[doc = "Outcome reported by the reader."]
            #[serde(rename = "LLRPStatus")]
            pub status: LlrpStatus,
        }

        impl IncomingPayload for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$mtype;
            fn decode(mut payload: Bytes) -> Result<Self, DecodeError> {
                Ok(Self {
                    status: LlrpStatus::decode(&mut payload)?,
                })
            }
        }
        impl LlrpResponse for $name {
            fn status(&self) -> Option<&LlrpStatus> {
                Some(&self.status)
            }
        }
    };
}

status_only_response! {
    /// `SetReaderConfigResponse`.
    SetReaderConfigResponse => SET_READER_CONFIG_RESPONSE
}
status_only_response! {
    /// `AddROSpecResponse`.
    AddRoSpecResponse => ADD_ROSPEC_RESPONSE
}
status_only_response! {
    /// `DeleteROSpecResponse`.
    DeleteRoSpecResponse => DELETE_ROSPEC_RESPONSE
}
status_only_response! {
    /// `StartROSpecResponse`.
    StartRoSpecResponse => START_ROSPEC_RESPONSE
}
status_only_response! {
    /// `StopROSpecResponse`.
    StopRoSpecResponse => STOP_ROSPEC_RESPONSE
}
status_only_response! {
    /// `EnableROSpecResponse`.
    EnableRoSpecResponse => ENABLE_ROSPEC_RESPONSE
}
status_only_response! {
    /// `DisableROSpecResponse`.
    DisableRoSpecResponse => DISABLE_ROSPEC_RESPONSE
}
status_only_response! {
    /// `EnableAccessSpecResponse`.
    EnableAccessSpecResponse => ENABLE_ACCESS_SPEC_RESPONSE
}
status_only_response! {
    /// `DisableAccessSpecResponse`.
    DisableAccessSpecResponse => DISABLE_ACCESS_SPEC_RESPONSE
}
status_only_response! {
    /// `DeleteAccessSpecResponse`.
    DeleteAccessSpecResponse => DELETE_ACCESS_SPEC_RESPONSE
}
status_only_response! {
    /// `CloseConnectionResponse`.
    CloseConnectionResponse => CLOSE_CONNECTION_RESPONSE
}
status_only_response! {
    /// `SetProtocolVersionResponse`.
    SetProtocolVersionResponse => SET_PROTOCOL_VERSION_RESPONSE
}
status_only_response! {
    /// `ErrorMessage`: the reader could not even parse a request.
    /// Surfaced to callers as a rejection, never retried.
    ErrorMessage => ERROR_MESSAGE
}

macro_rules! status_and_body_response {
    ($(#[$doc:meta])* $name:ident, $body:ident / $rename:literal => $mtype:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
        pub struct $name {
            #[doc = "Outcome reported by the reader."]
            #[serde(rename = "LLRPStatus")]
            pub status: LlrpStatus,
            #[doc = "Raw parameter bytes after the status; hex in JSON."]
            #[serde(
                rename = $rename,
                with = "crate::util::hex",
                skip_serializing_if = "Bytes::is_empty"
            )]
            pub $body: Bytes,
        }

        impl IncomingPayload for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$mtype;
            fn decode(mut payload: Bytes) -> Result<Self, DecodeError> {
                let status = LlrpStatus::decode(&mut payload)?;
                Ok(Self {
                    status,
                    $body: payload,
                })
            }
        }
        impl LlrpResponse for $name {
            fn status(&self) -> Option<&LlrpStatus> {
                Some(&self.status)
            }
        }
    };
}

status_and_body_response! {
    /// `GetReaderCapabilitiesResponse`. The capability tree is carried
    /// raw; interpreting it is the host's business.
    GetReaderCapabilitiesResponse, capabilities / "Capabilities" => GET_READER_CAPABILITIES_RESPONSE
}
status_and_body_response! {
    /// `GetReaderConfigResponse`.
    GetReaderConfigResponse, config / "Config" => GET_READER_CONFIG_RESPONSE
}
status_and_body_response! {
    /// `GetROSpecsResponse`.
    GetRoSpecsResponse, ro_specs / "ROSpecs" => GET_ROSPECS_RESPONSE
}
status_and_body_response! {
    /// `GetAccessSpecsResponse`.
    GetAccessSpecsResponse, access_specs / "AccessSpecs" => GET_ACCESS_SPECS_RESPONSE
}

/// `GetSupportedVersionResponse`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GetSupportedVersionResponse {
    /// Version the connection currently speaks.
    pub current_version: u8,
    /// Newest version the reader can speak.
    pub supported_version: u8,
    /// Outcome reported by the reader.
    #[serde(rename = "LLRPStatus")]
    pub status: LlrpStatus,
}

impl IncomingPayload for GetSupportedVersionResponse {
    const MESSAGE_TYPE: MessageType = MessageType::GET_SUPPORTED_VERSION_RESPONSE;
    fn decode(mut payload: Bytes) -> Result<Self, DecodeError> {
        if payload.remaining() < 2 {
            return Err(DecodeError::Truncated);
        }
        let current_version = payload.get_u8();
        let supported_version = payload.get_u8();
        Ok(Self {
            current_version,
            supported_version,
            status: LlrpStatus::decode(&mut payload)?,
        })
    }
}

impl LlrpResponse for GetSupportedVersionResponse {
    fn status(&self) -> Option<&LlrpStatus> {
        Some(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::MessageType;
    use pretty_assertions::assert_eq;

    #[test]
    fn response_pairing_is_the_catalog() {
        assert_eq!(
            MessageType::GET_ROSPECS.response_type(),
            Some(MessageType::GET_ROSPECS_RESPONSE)
        );
        assert_eq!(
            MessageType::CUSTOM_MESSAGE.response_type(),
            Some(MessageType::CUSTOM_MESSAGE)
        );
        // Notifications and responses are not requests.
        assert_eq!(MessageType::KEEP_ALIVE_ACK.response_type(), None);
        assert_eq!(MessageType::RO_ACCESS_REPORT.response_type(), None);
        assert_eq!(MessageType::GET_ROSPECS_RESPONSE.response_type(), None);
    }

    #[test]
    fn get_reader_config_wire_form() {
        let req = GetReaderConfig {
            antenna_id: 2,
            requested_data: 0,
            gpi_port: 0,
            gpo_port: 1,
        };
        let wire = req.to_bytes().unwrap();
        assert_eq!(wire.as_ref(), [0, 2, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn id_request_wire_form() {
        let wire = EnableRoSpec { ro_spec_id: 7 }.to_bytes().unwrap();
        assert_eq!(wire.as_ref(), [0, 0, 0, 7]);
    }

    #[test]
    fn rospec_tree_encodes_nested_tlvs() {
        let spec = RoSpec {
            ro_spec_id: 1,
            ai_specs: vec![AiSpec {
                antenna_ids: vec![0],
                ..AiSpec::default()
            }],
            ..RoSpec::default()
        };
        let wire = AddRoSpec { ro_spec: spec }.to_bytes().unwrap();

        // Outermost parameter is ROSpec (177) and its length spans the
        // whole payload.
        assert_eq!(u16::from_be_bytes([wire[0], wire[1]]), 177);
        let total = u16::from_be_bytes([wire[2], wire[3]]) as usize;
        assert_eq!(total, wire.len());
        // id / priority / state directly follow the parameter header
        assert_eq!(&wire[4..8], [0, 0, 0, 1]);
        assert_eq!(wire[8], 0);
        assert_eq!(wire[9], 0);
        // then the boundary spec
        assert_eq!(u16::from_be_bytes([wire[10], wire[11]]), 178);
    }

    #[test]
    fn rospec_json_rejects_unknown_fields() {
        let bad = r#"{"ROSpecID": 1, "Priority": 0, "Bogus": true}"#;
        assert!(serde_json::from_str::<RoSpec>(bad).is_err());
    }

    #[test]
    fn rospec_json_roundtrip() {
        let json = r#"{
            "ROSpecID": 5,
            "Priority": 1,
            "ROBoundarySpec": {
                "ROSpecStartTrigger": {"Trigger": 1},
                "ROSpecStopTrigger": {"Trigger": 0}
            },
            "AISpecs": [{
                "AntennaIDs": [0],
                "AISpecStopTrigger": {"Trigger": 0}
            }]
        }"#;
        let spec: RoSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.ro_spec_id, 5);
        assert_eq!(spec.ro_boundary_spec.ro_spec_start_trigger.trigger, 1);
        assert_eq!(spec.ai_specs.len(), 1);
        let back: RoSpec =
            serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn content_selector_bit_packing() {
        let sel = TagReportContentSelector {
            enable_ro_spec_id: true,
            enable_peak_rssi: true,
            ..TagReportContentSelector::default()
        };
        // bit 15 (ROSpecID) and bit 10 (PeakRSSI)
        assert_eq!(sel.bits(), 0b1000_0100_0000_0000);
    }

    #[test]
    fn set_reader_config_reset_bit() {
        let wire = SetReaderConfig {
            reset_to_factory_defaults: true,
            ..SetReaderConfig::default()
        }
        .to_bytes()
        .unwrap();
        assert_eq!(wire.as_ref(), [0x80]);
    }

    #[test]
    fn set_reader_config_keepalive_param() {
        let wire = SetReaderConfig {
            keepalive_spec: Some(KeepaliveSpec {
                trigger: 1,
                interval: 10_000,
            }),
            ..SetReaderConfig::default()
        }
        .to_bytes()
        .unwrap();
        assert_eq!(wire[0], 0);
        assert_eq!(u16::from_be_bytes([wire[1], wire[2]]), 220);
        assert_eq!(u16::from_be_bytes([wire[3], wire[4]]), 9); // 4 + 1 + 4
        assert_eq!(wire[5], 1);
        assert_eq!(&wire[6..10], 10_000u32.to_be_bytes());
    }

    #[test]
    fn custom_message_roundtrip() {
        let msg = CustomMessage {
            vendor_id: 25882,
            message_subtype: 3,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        let wire = msg.to_bytes().unwrap();
        let back = CustomMessage::decode(wire).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn supported_version_response_decode() {
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u8(2);
        buf.put_u16(crate::protocol::status::PARAM_LLRP_STATUS);
        buf.put_u16(8);
        buf.put_u16(0);
        buf.put_u16(0);
        let r = GetSupportedVersionResponse::decode(buf.freeze()).unwrap();
        assert_eq!(r.current_version, 1);
        assert_eq!(r.supported_version, 2);
        assert!(r.status.is_success());
    }

    #[test]
    fn response_json_renders_body_as_hex() {
        let mut buf = BytesMut::new();
        buf.put_u16(crate::protocol::status::PARAM_LLRP_STATUS);
        buf.put_u16(8);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_slice(&[0xAB, 0xCD]);
        let r = GetRoSpecsResponse::decode(buf.freeze()).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"abcd\""), "{json}");
    }
}
