//! Typed payload structs and their wire layouts.
//!
//! Each payload provides a strict `parse` (every length checked, no partial
//! state on error) and a `write` that reproduces the exact wire bytes.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::MessageError;
use crate::message::{CodecEntry, MessageCodec, MessagePayload};

/// Request link-layer acknowledgement from the target node.
pub const TRANSMIT_OPTION_ACK: u8 = 0x01;
/// Let the controller route through the mesh.
pub const TRANSMIT_OPTION_AUTO_ROUTE: u8 = 0x04;
/// Allow explorer frames when routing fails.
pub const TRANSMIT_OPTION_EXPLORE: u8 = 0x20;
/// The option set used for ordinary application commands.
pub const TRANSMIT_OPTIONS_DEFAULT: u8 =
    TRANSMIT_OPTION_ACK | TRANSMIT_OPTION_AUTO_ROUTE | TRANSMIT_OPTION_EXPLORE;

/// Marker separating supported from controlled CCs in a NIF.
const SUPPORT_CONTROL_MARK: u8 = 0xEF;

/// Length of the node bitmask in GetSerialApiInitData (232 bits).
const NODE_BITMASK_LEN: usize = 29;

fn require(payload: &[u8], min: usize) -> Result<(), MessageError> {
    if payload.len() < min {
        return Err(MessageError::PayloadTooShort {
            min,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// ---------------------------------------------------------------------------
// Controller identification
// ---------------------------------------------------------------------------

/// Response to GetControllerVersion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerVersion {
    /// Firmware version string, e.g. `"Z-Wave 4.05"`.
    pub version: String,
    pub library_type: u8,
}

impl ControllerVersion {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let nul = payload
            .iter()
            .position(|&b| b == 0)
            .ok_or(MessageError::MalformedPayload("version string not terminated"))?;
        require(payload, nul + 2)?;
        let version = core::str::from_utf8(&payload[..nul])
            .map_err(|_| MessageError::MalformedPayload("version string not ASCII"))?
            .into();
        Ok(Self {
            version,
            library_type: payload[nul + 1],
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.version.as_bytes());
        out.push(0);
        out.push(self.library_type);
    }
}

/// Response to GetSerialApiInitData.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialApiInitData {
    pub api_version: u8,
    pub capabilities: u8,
    /// Node ids present in the controller's network, decoded from the
    /// 29-byte bitmask.
    pub node_ids: Vec<u8>,
    pub chip_type: u8,
    pub chip_version: u8,
}

impl SerialApiInitData {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 3)?;
        let mask_len = payload[2] as usize;
        if mask_len != NODE_BITMASK_LEN {
            return Err(MessageError::MalformedPayload("unexpected node bitmask length"));
        }
        require(payload, 3 + mask_len + 2)?;

        let mut node_ids = Vec::new();
        for (byte_idx, &mask) in payload[3..3 + mask_len].iter().enumerate() {
            for bit in 0..8 {
                if mask & (1 << bit) != 0 {
                    node_ids.push((byte_idx * 8 + bit + 1) as u8);
                }
            }
        }

        Ok(Self {
            api_version: payload[0],
            capabilities: payload[1],
            node_ids,
            chip_type: payload[3 + mask_len],
            chip_version: payload[3 + mask_len + 1],
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.api_version);
        out.push(self.capabilities);
        out.push(NODE_BITMASK_LEN as u8);
        let mut mask = [0u8; NODE_BITMASK_LEN];
        for &id in &self.node_ids {
            if id == 0 {
                continue;
            }
            let idx = (id as usize - 1) / 8;
            if idx < NODE_BITMASK_LEN {
                mask[idx] |= 1 << ((id as usize - 1) % 8);
            }
        }
        out.extend_from_slice(&mask);
        out.push(self.chip_type);
        out.push(self.chip_version);
    }
}

/// Response to GetControllerCapabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerCapabilities {
    pub is_secondary: bool,
    pub on_other_network: bool,
    pub sis_present: bool,
    pub was_real_primary: bool,
    pub is_suc: bool,
}

impl ControllerCapabilities {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 1)?;
        let flags = payload[0];
        Ok(Self {
            is_secondary: flags & 0x01 != 0,
            on_other_network: flags & 0x02 != 0,
            sis_present: flags & 0x04 != 0,
            was_real_primary: flags & 0x08 != 0,
            is_suc: flags & 0x10 != 0,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.is_secondary {
            flags |= 0x01;
        }
        if self.on_other_network {
            flags |= 0x02;
        }
        if self.sis_present {
            flags |= 0x04;
        }
        if self.was_real_primary {
            flags |= 0x08;
        }
        if self.is_suc {
            flags |= 0x10;
        }
        out.push(flags);
    }
}

/// Response to GetSerialApiCapabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialApiCapabilities {
    pub firmware_version: u8,
    pub firmware_revision: u8,
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    /// 256-bit bitmask of supported function ids; bit `n` of byte `m`
    /// flags function `m * 8 + n + 1`.
    pub function_bitmask: [u8; 32],
}

impl SerialApiCapabilities {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 8 + 32)?;
        let mut function_bitmask = [0u8; 32];
        function_bitmask.copy_from_slice(&payload[8..40]);
        Ok(Self {
            firmware_version: payload[0],
            firmware_revision: payload[1],
            manufacturer_id: read_u16_be(&payload[2..]),
            product_type: read_u16_be(&payload[4..]),
            product_id: read_u16_be(&payload[6..]),
            function_bitmask,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.firmware_version);
        out.push(self.firmware_revision);
        out.extend_from_slice(&self.manufacturer_id.to_be_bytes());
        out.extend_from_slice(&self.product_type.to_be_bytes());
        out.extend_from_slice(&self.product_id.to_be_bytes());
        out.extend_from_slice(&self.function_bitmask);
    }

    /// Whether the controller supports the given function id.
    pub fn supports(&self, function: u8) -> bool {
        if function == 0 {
            return false;
        }
        let idx = (function as usize - 1) / 8;
        self.function_bitmask[idx] & (1 << ((function as usize - 1) % 8)) != 0
    }
}

// ---------------------------------------------------------------------------
// Node protocol info
// ---------------------------------------------------------------------------

/// How often a non-listening node wakes its receiver for beams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequentListening {
    No,
    Every250ms,
    Every1000ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxBaudRate {
    Baud9600,
    Baud40k,
    Baud100k,
}

/// Response to GetNodeProtocolInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeProtocolInfo {
    pub listening: bool,
    pub frequent_listening: FrequentListening,
    pub routing: bool,
    pub max_baud_rate: MaxBaudRate,
    pub protocol_version: u8,
    pub secure: bool,
    pub beaming: bool,
    pub basic_class: u8,
    pub generic_class: u8,
    pub specific_class: u8,
}

impl NodeProtocolInfo {
    /// Whether the node is reachable only around wake-ups.
    pub fn is_sleeping(&self) -> bool {
        !self.listening && self.frequent_listening == FrequentListening::No
    }

    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 6)?;
        let capability = payload[0];
        let security = payload[1];

        let listening = capability & 0x80 != 0;
        let frequent_listening = match security & 0x60 {
            0x40 => FrequentListening::Every250ms,
            0x20 => FrequentListening::Every1000ms,
            _ => FrequentListening::No,
        };
        // A node is either always-on or frequently listening, never both.
        if listening && frequent_listening != FrequentListening::No {
            return Err(MessageError::MalformedPayload(
                "listening node flagged frequent listening",
            ));
        }

        let max_baud_rate = if capability & 0x20 != 0 {
            MaxBaudRate::Baud100k
        } else if capability & 0x10 != 0 {
            MaxBaudRate::Baud40k
        } else {
            MaxBaudRate::Baud9600
        };

        Ok(Self {
            listening,
            frequent_listening,
            routing: capability & 0x40 != 0,
            max_baud_rate,
            protocol_version: capability & 0x07,
            secure: security & 0x01 != 0,
            beaming: security & 0x10 != 0,
            basic_class: payload[3],
            generic_class: payload[4],
            specific_class: payload[5],
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut capability = self.protocol_version & 0x07;
        if self.listening {
            capability |= 0x80;
        }
        if self.routing {
            capability |= 0x40;
        }
        match self.max_baud_rate {
            MaxBaudRate::Baud9600 => {}
            MaxBaudRate::Baud40k => capability |= 0x10,
            MaxBaudRate::Baud100k => capability |= 0x20,
        }
        let mut security = 0u8;
        if self.secure {
            security |= 0x01;
        }
        if self.beaming {
            security |= 0x10;
        }
        match self.frequent_listening {
            FrequentListening::No => {}
            FrequentListening::Every1000ms => security |= 0x20,
            FrequentListening::Every250ms => security |= 0x40,
        }
        out.push(capability);
        out.push(security);
        out.push(0); // reserved
        out.push(self.basic_class);
        out.push(self.generic_class);
        out.push(self.specific_class);
    }
}

// ---------------------------------------------------------------------------
// SendData
// ---------------------------------------------------------------------------

/// Terminal (or interim) status delivered by a SendData callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitStatus {
    Ok,
    NoAck,
    Fail,
    NotIdle,
    NoRoute,
    Other(u8),
}

impl TransmitStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => TransmitStatus::Ok,
            0x01 => TransmitStatus::NoAck,
            0x02 => TransmitStatus::Fail,
            0x03 => TransmitStatus::NotIdle,
            0x04 => TransmitStatus::NoRoute,
            other => TransmitStatus::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TransmitStatus::Ok => 0x00,
            TransmitStatus::NoAck => 0x01,
            TransmitStatus::Fail => 0x02,
            TransmitStatus::NotIdle => 0x03,
            TransmitStatus::NoRoute => 0x04,
            TransmitStatus::Other(v) => v,
        }
    }
}

/// Host request transmitting a serialized CC to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendDataRequest {
    pub node_id: u8,
    /// The serialized (possibly encapsulated) command class bytes.
    pub payload: Vec<u8>,
    pub tx_options: u8,
    /// 0 means no callback is requested.
    pub callback_id: u8,
}

impl SendDataRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 4)?;
        let len = payload[1] as usize;
        require(payload, 2 + len + 2)?;
        Ok(Self {
            node_id: payload[0],
            payload: payload[2..2 + len].to_vec(),
            tx_options: payload[2 + len],
            callback_id: payload[2 + len + 1],
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.node_id);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        out.push(self.tx_options);
        out.push(self.callback_id);
    }
}

/// Controller callback finishing (or progressing) a SendData request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendDataCallback {
    pub callback_id: u8,
    pub tx_status: TransmitStatus,
}

impl SendDataCallback {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 2)?;
        // Newer controllers append a transmit report; it is not needed here.
        Ok(Self {
            callback_id: payload[0],
            tx_status: TransmitStatus::from_u8(payload[1]),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.callback_id);
        out.push(self.tx_status.as_u8());
    }
}

// ---------------------------------------------------------------------------
// Unsolicited frames
// ---------------------------------------------------------------------------

/// An application command received from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCommand {
    pub rx_status: u8,
    pub source_node: u8,
    /// Raw CC bytes, to be decoded by the CC layer.
    pub cc_payload: Vec<u8>,
}

impl ApplicationCommand {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 3)?;
        let len = payload[2] as usize;
        require(payload, 3 + len)?;
        Ok(Self {
            rx_status: payload[0],
            source_node: payload[1],
            cc_payload: payload[3..3 + len].to_vec(),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.rx_status);
        out.push(self.source_node);
        out.push(self.cc_payload.len() as u8);
        out.extend_from_slice(&self.cc_payload);
    }
}

/// What an ApplicationUpdate frame reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    NodeInfoReceived,
    NodeInfoRequestDone,
    NodeInfoRequestFailed,
    RoutingPending,
    NewIdAssigned,
    DeleteDone,
    SucIdChanged,
    Other(u8),
}

impl UpdateType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x84 => UpdateType::NodeInfoReceived,
            0x82 => UpdateType::NodeInfoRequestDone,
            0x81 => UpdateType::NodeInfoRequestFailed,
            0x80 => UpdateType::RoutingPending,
            0x40 => UpdateType::NewIdAssigned,
            0x20 => UpdateType::DeleteDone,
            0x10 => UpdateType::SucIdChanged,
            other => UpdateType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            UpdateType::NodeInfoReceived => 0x84,
            UpdateType::NodeInfoRequestDone => 0x82,
            UpdateType::NodeInfoRequestFailed => 0x81,
            UpdateType::RoutingPending => 0x80,
            UpdateType::NewIdAssigned => 0x40,
            UpdateType::DeleteDone => 0x20,
            UpdateType::SucIdChanged => 0x10,
            UpdateType::Other(v) => v,
        }
    }
}

/// A node's advertised capabilities (the NIF body).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeInformationFrame {
    pub basic_class: u8,
    pub generic_class: u8,
    pub specific_class: u8,
    pub supported_ccs: Vec<u8>,
    pub controlled_ccs: Vec<u8>,
}

impl NodeInformationFrame {
    /// Parse a NIF body: `basic | generic | specific | ccs...` where the
    /// `0xEF` mark splits supported from controlled CCs.
    pub fn parse(body: &[u8]) -> Result<Self, MessageError> {
        require(body, 3)?;
        let ccs = &body[3..];
        let (supported, controlled) = match ccs.iter().position(|&b| b == SUPPORT_CONTROL_MARK) {
            Some(mark) => (&ccs[..mark], &ccs[mark + 1..]),
            None => (ccs, &[][..]),
        };
        Ok(Self {
            basic_class: body[0],
            generic_class: body[1],
            specific_class: body[2],
            supported_ccs: supported.to_vec(),
            controlled_ccs: controlled.to_vec(),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.basic_class);
        out.push(self.generic_class);
        out.push(self.specific_class);
        out.extend_from_slice(&self.supported_ccs);
        if !self.controlled_ccs.is_empty() {
            out.push(SUPPORT_CONTROL_MARK);
            out.extend_from_slice(&self.controlled_ccs);
        }
    }
}

/// Unsolicited request reporting node information events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationUpdate {
    pub update_type: UpdateType,
    pub node_id: u8,
    pub nif: Option<NodeInformationFrame>,
}

impl ApplicationUpdate {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        require(payload, 3)?;
        let update_type = UpdateType::from_u8(payload[0]);
        let node_id = payload[1];
        let len = payload[2] as usize;
        require(payload, 3 + len)?;
        let nif = if len > 0 {
            Some(NodeInformationFrame::parse(&payload[3..3 + len])?)
        } else {
            None
        };
        Ok(Self {
            update_type,
            node_id,
            nif,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.update_type.as_u8());
        out.push(self.node_id);
        match &self.nif {
            Some(nif) => {
                let mut body = Vec::new();
                nif.write(&mut body);
                out.push(body.len() as u8);
                out.extend_from_slice(&body);
            }
            None => out.push(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Serialize any payload to its wire bytes.
pub(crate) fn serialize(payload: &MessagePayload) -> Vec<u8> {
    let mut out = Vec::new();
    match payload {
        MessagePayload::GetControllerVersionRequest
        | MessagePayload::GetSerialApiInitDataRequest
        | MessagePayload::GetControllerCapabilitiesRequest
        | MessagePayload::GetSerialApiCapabilitiesRequest
        | MessagePayload::GetControllerIdRequest
        | MessagePayload::GetSucNodeIdRequest
        | MessagePayload::SoftResetRequest => {}
        MessagePayload::SetSerialApiTimeoutsRequest {
            rx_ack_timeout,
            rx_byte_timeout,
        } => {
            out.push(*rx_ack_timeout);
            out.push(*rx_byte_timeout);
        }
        MessagePayload::GetNodeProtocolInfoRequest { node_id }
        | MessagePayload::RequestNodeInfoRequest { node_id } => out.push(*node_id),
        MessagePayload::SendDataRequest(req) => req.write(&mut out),
        MessagePayload::GetControllerVersionResponse(v) => v.write(&mut out),
        MessagePayload::GetSerialApiInitDataResponse(v) => v.write(&mut out),
        MessagePayload::GetControllerCapabilitiesResponse(v) => v.write(&mut out),
        MessagePayload::GetSerialApiCapabilitiesResponse(v) => v.write(&mut out),
        MessagePayload::GetControllerIdResponse { home_id, own_node_id } => {
            out.extend_from_slice(&home_id.to_be_bytes());
            out.push(*own_node_id);
        }
        MessagePayload::GetSucNodeIdResponse { suc_node_id } => out.push(*suc_node_id),
        MessagePayload::SetSerialApiTimeoutsResponse {
            previous_rx_ack_timeout,
            previous_rx_byte_timeout,
        } => {
            out.push(*previous_rx_ack_timeout);
            out.push(*previous_rx_byte_timeout);
        }
        MessagePayload::GetNodeProtocolInfoResponse(v) => v.write(&mut out),
        MessagePayload::RequestNodeInfoResponse { accepted }
        | MessagePayload::SendDataResponse { accepted } => out.push(u8::from(*accepted)),
        MessagePayload::SendDataCallback(v) => v.write(&mut out),
        MessagePayload::ApplicationCommand(v) => v.write(&mut out),
        MessagePayload::ApplicationUpdate(v) => v.write(&mut out),
    }
    out
}

/// Register every function the core implements.
pub(crate) fn register_defaults(codec: &mut MessageCodec) {
    use crate::consts::FunctionType as F;

    fn resp_only(parse: crate::message::ParseFn) -> CodecEntry {
        CodecEntry {
            parse_request: None,
            parse_response: Some(parse),
        }
    }

    fn req_only(parse: crate::message::ParseFn) -> CodecEntry {
        CodecEntry {
            parse_request: Some(parse),
            parse_response: None,
        }
    }

    codec.register(
        F::GetSerialApiInitData,
        resp_only(|p| Ok(MessagePayload::GetSerialApiInitDataResponse(SerialApiInitData::parse(p)?))),
    );
    codec.register(
        F::ApplicationCommandHandler,
        req_only(|p| Ok(MessagePayload::ApplicationCommand(ApplicationCommand::parse(p)?))),
    );
    codec.register(
        F::GetControllerCapabilities,
        resp_only(|p| {
            Ok(MessagePayload::GetControllerCapabilitiesResponse(
                ControllerCapabilities::parse(p)?,
            ))
        }),
    );
    codec.register(
        F::GetSerialApiCapabilities,
        resp_only(|p| {
            Ok(MessagePayload::GetSerialApiCapabilitiesResponse(
                SerialApiCapabilities::parse(p)?,
            ))
        }),
    );
    codec.register(
        F::SendData,
        CodecEntry {
            parse_request: Some(|p| Ok(MessagePayload::SendDataCallback(SendDataCallback::parse(p)?))),
            parse_response: Some(|p| {
                require(p, 1)?;
                Ok(MessagePayload::SendDataResponse { accepted: p[0] != 0 })
            }),
        },
    );
    codec.register(
        F::GetControllerVersion,
        resp_only(|p| Ok(MessagePayload::GetControllerVersionResponse(ControllerVersion::parse(p)?))),
    );
    codec.register(
        F::GetControllerId,
        resp_only(|p| {
            require(p, 5)?;
            Ok(MessagePayload::GetControllerIdResponse {
                home_id: read_u32_be(p),
                own_node_id: p[4],
            })
        }),
    );
    codec.register(
        F::SetSerialApiTimeouts,
        resp_only(|p| {
            require(p, 2)?;
            Ok(MessagePayload::SetSerialApiTimeoutsResponse {
                previous_rx_ack_timeout: p[0],
                previous_rx_byte_timeout: p[1],
            })
        }),
    );
    codec.register(
        F::GetNodeProtocolInfo,
        resp_only(|p| Ok(MessagePayload::GetNodeProtocolInfoResponse(NodeProtocolInfo::parse(p)?))),
    );
    codec.register(
        F::ApplicationUpdate,
        req_only(|p| Ok(MessagePayload::ApplicationUpdate(ApplicationUpdate::parse(p)?))),
    );
    codec.register(
        F::GetSucNodeId,
        resp_only(|p| {
            require(p, 1)?;
            Ok(MessagePayload::GetSucNodeIdResponse { suc_node_id: p[0] })
        }),
    );
    codec.register(
        F::RequestNodeInfo,
        resp_only(|p| {
            require(p, 1)?;
            Ok(MessagePayload::RequestNodeInfoResponse { accepted: p[0] != 0 })
        }),
    );
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use super::*;
    use crate::consts::{FunctionType, MessageType};
    use crate::frame::DataFrame;
    use alloc::vec;

    #[test]
    fn controller_version_parse() {
        let mut payload = b"Z-Wave 4.05".to_vec();
        payload.push(0x00);
        payload.push(0x01);
        let v = ControllerVersion::parse(&payload).unwrap();
        assert_eq!(v.version, "Z-Wave 4.05");
        assert_eq!(v.library_type, 0x01);

        let mut out = Vec::new();
        v.write(&mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn controller_version_unterminated() {
        assert!(matches!(
            ControllerVersion::parse(b"Z-Wave"),
            Err(MessageError::MalformedPayload(_))
        ));
    }

    #[test]
    fn init_data_bitmask_decoding() {
        let mut payload = vec![0x05, 0x00, 29];
        let mut mask = [0u8; 29];
        mask[0] = 0b0000_0101; // nodes 1 and 3
        mask[1] = 0b1000_0000; // node 16
        payload.extend_from_slice(&mask);
        payload.push(0x07); // chip type
        payload.push(0x00); // chip version
        let data = SerialApiInitData::parse(&payload).unwrap();
        assert_eq!(data.node_ids, vec![1, 3, 16]);

        let mut out = Vec::new();
        data.write(&mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn init_data_rejects_bad_bitmask_len() {
        assert!(SerialApiInitData::parse(&[0x05, 0x00, 28]).is_err());
    }

    #[test]
    fn protocol_info_listening_switch() {
        // 100 kbps listening routing slave, protocol version 3.
        let info = NodeProtocolInfo::parse(&[0xE3, 0x10, 0x00, 0x04, 0x10, 0x01]).unwrap();
        assert!(info.listening);
        assert!(info.routing);
        assert_eq!(info.max_baud_rate, MaxBaudRate::Baud100k);
        assert_eq!(info.protocol_version, 3);
        assert!(info.beaming);
        assert!(!info.secure);
        assert!(!info.is_sleeping());
        assert_eq!(info.generic_class, 0x10);
    }

    #[test]
    fn protocol_info_sleeping_sensor() {
        let info = NodeProtocolInfo::parse(&[0x53, 0x01, 0x00, 0x04, 0x21, 0x01]).unwrap();
        assert!(!info.listening);
        assert!(info.is_sleeping());
        assert!(info.secure);
    }

    #[test]
    fn protocol_info_invariant_enforced() {
        // listening bit plus a frequent-listening bit is contradictory.
        assert!(matches!(
            NodeProtocolInfo::parse(&[0x80, 0x40, 0x00, 0x04, 0x10, 0x01]),
            Err(MessageError::MalformedPayload(_))
        ));
    }

    #[test]
    fn protocol_info_roundtrip() {
        let raw = [0x53u8, 0x41, 0x00, 0x04, 0x21, 0x01];
        let info = NodeProtocolInfo::parse(&raw).unwrap();
        let mut out = Vec::new();
        info.write(&mut out);
        assert_eq!(out, raw);
    }

    #[test]
    fn send_data_request_roundtrip() {
        let req = SendDataRequest {
            node_id: 5,
            payload: vec![0x25, 0x01, 0xFF],
            tx_options: TRANSMIT_OPTIONS_DEFAULT,
            callback_id: 0x17,
        };
        let mut out = Vec::new();
        req.write(&mut out);
        assert_eq!(out, vec![0x05, 0x03, 0x25, 0x01, 0xFF, 0x25, 0x17]);
        assert_eq!(SendDataRequest::parse(&out).unwrap(), req);
    }

    #[test]
    fn send_data_callback_ignores_transmit_report() {
        let cb = SendDataCallback::parse(&[0x17, 0x00, 0x00, 0x03, 0x7F]).unwrap();
        assert_eq!(cb.callback_id, 0x17);
        assert_eq!(cb.tx_status, TransmitStatus::Ok);
    }

    #[test]
    fn application_command_parse() {
        let cmd = ApplicationCommand::parse(&[0x00, 0x09, 0x03, 0x25, 0x03, 0xFF]).unwrap();
        assert_eq!(cmd.source_node, 9);
        assert_eq!(cmd.cc_payload, vec![0x25, 0x03, 0xFF]);
    }

    #[test]
    fn application_command_truncated() {
        assert!(ApplicationCommand::parse(&[0x00, 0x09, 0x05, 0x25]).is_err());
    }

    #[test]
    fn application_update_nif_split() {
        let payload = [
            0x84, 0x09, 0x08, 0x04, 0x10, 0x01, // NIF header
            0x25, 0x86, 0xEF, 0x25, 0x26, // supported | mark | controlled
        ];
        let update = ApplicationUpdate::parse(&payload).unwrap();
        assert_eq!(update.update_type, UpdateType::NodeInfoReceived);
        assert_eq!(update.node_id, 9);
        let nif = update.nif.unwrap();
        assert_eq!(nif.supported_ccs, vec![0x25, 0x86]);
        assert_eq!(nif.controlled_ccs, vec![0x25, 0x26]);
    }

    #[test]
    fn application_update_failed_has_no_nif() {
        let update = ApplicationUpdate::parse(&[0x81, 0x00, 0x00]).unwrap();
        assert_eq!(update.update_type, UpdateType::NodeInfoRequestFailed);
        assert!(update.nif.is_none());
    }

    #[test]
    fn full_frame_to_message() {
        let codec = MessageCodec::with_defaults();
        let frame = DataFrame::new(
            MessageType::Response,
            FunctionType::GetControllerId.as_u8(),
            vec![0xC9, 0x51, 0xAA, 0x20, 0x01],
        );
        let msg = codec.parse(&frame).unwrap();
        assert_eq!(
            msg.payload,
            MessagePayload::GetControllerIdResponse {
                home_id: 0xC951_AA20,
                own_node_id: 1
            }
        );
    }

    #[test]
    fn serial_api_timeouts() {
        let codec = MessageCodec::with_defaults();
        let frame = DataFrame::new(
            MessageType::Response,
            FunctionType::SetSerialApiTimeouts.as_u8(),
            vec![0x0F, 0x0A],
        );
        let msg = codec.parse(&frame).unwrap();
        assert_eq!(
            msg.payload,
            MessagePayload::SetSerialApiTimeoutsResponse {
                previous_rx_ack_timeout: 0x0F,
                previous_rx_byte_timeout: 0x0A,
            }
        );

        let request = MessagePayload::SetSerialApiTimeoutsRequest {
            rx_ack_timeout: 0x96,
            rx_byte_timeout: 0x0A,
        };
        assert_eq!(request.serialize(), vec![0x96, 0x0A]);
    }

    #[test]
    fn serial_api_capabilities_supports() {
        let mut payload = vec![1, 0, 0x00, 0x86, 0x00, 0x02, 0x00, 0x01];
        let mut mask = [0u8; 32];
        mask[0] = 0b0000_0010; // function 0x02
        mask[2] = 0b0001_0000; // function 0x15
        payload.extend_from_slice(&mask);
        let caps = SerialApiCapabilities::parse(&payload).unwrap();
        assert_eq!(caps.manufacturer_id, 0x0086);
        assert!(caps.supports(0x02));
        assert!(caps.supports(0x15));
        assert!(!caps.supports(0x13));
        assert!(!caps.supports(0x00));
    }
}

#[cfg(test)]
mod proptests {
    extern crate alloc;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn send_data_request_roundtrip(
            node_id in 1u8..=232,
            payload in proptest::collection::vec(any::<u8>(), 0..48),
            tx_options in any::<u8>(),
            callback_id in any::<u8>(),
        ) {
            let req = SendDataRequest { node_id, payload, tx_options, callback_id };
            let mut out = alloc::vec::Vec::new();
            req.write(&mut out);
            prop_assert_eq!(SendDataRequest::parse(&out).unwrap(), req);
        }

        #[test]
        fn nif_roundtrip(
            basic in any::<u8>(),
            generic in any::<u8>(),
            specific in any::<u8>(),
            supported in proptest::collection::vec(any::<u8>().prop_filter("no mark", |b| *b != 0xEF), 0..16),
            controlled in proptest::collection::vec(any::<u8>().prop_filter("no mark", |b| *b != 0xEF), 0..16),
        ) {
            let nif = NodeInformationFrame {
                basic_class: basic,
                generic_class: generic,
                specific_class: specific,
                supported_ccs: supported,
                controlled_ccs: controlled,
            };
            let mut out = alloc::vec::Vec::new();
            nif.write(&mut out);
            prop_assert_eq!(NodeInformationFrame::parse(&out).unwrap(), nif);
        }
    }
}
