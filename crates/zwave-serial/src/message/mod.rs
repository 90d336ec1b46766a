//! Typed host<->controller message codec.
//!
//! Messages are data frames whose payload has been parsed into a typed
//! structure keyed by the function byte. Parsing dispatches through a
//! runtime-extensible registry so host applications can add Serial API
//! functions the core does not know about; serialization is dispatched on
//! the payload type itself.

extern crate alloc;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

pub mod payloads;

pub use payloads::{
    ApplicationCommand, ApplicationUpdate, ControllerCapabilities, ControllerVersion,
    FrequentListening, MaxBaudRate, NodeInformationFrame, NodeProtocolInfo, SendDataCallback,
    SendDataRequest, SerialApiCapabilities, SerialApiInitData, TransmitStatus, UpdateType,
};

use crate::consts::{FunctionType, MessageType};
use crate::error::MessageError;
use crate::frame::DataFrame;

/// A parsed host<->controller message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Message {
    pub msg_type: MessageType,
    pub function: FunctionType,
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(msg_type: MessageType, function: FunctionType, payload: MessagePayload) -> Self {
        Self {
            msg_type,
            function,
            payload,
        }
    }

    /// Shorthand for a host-initiated request.
    pub fn request(function: FunctionType, payload: MessagePayload) -> Self {
        Self::new(MessageType::Request, function, payload)
    }

    /// The callback token correlating an async controller callback with its
    /// initiating request. `None` when the message carries no token or the
    /// token is 0 ("no callback requested").
    pub fn callback_id(&self) -> Option<u8> {
        let id = match &self.payload {
            MessagePayload::SendDataRequest(req) => req.callback_id,
            MessagePayload::SendDataCallback(cb) => cb.callback_id,
            _ => return None,
        };
        (id != 0).then_some(id)
    }

    /// Serialize into a data frame.
    pub fn to_frame(&self) -> DataFrame {
        DataFrame::new(self.msg_type, self.function.as_u8(), self.payload.serialize())
    }
}

/// Typed payloads, one variant per (function, direction) pair the core
/// understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    // Host -> controller requests.
    GetControllerVersionRequest,
    GetSerialApiInitDataRequest,
    GetControllerCapabilitiesRequest,
    GetSerialApiCapabilitiesRequest,
    GetControllerIdRequest,
    GetSucNodeIdRequest,
    SoftResetRequest,
    SetSerialApiTimeoutsRequest {
        /// RX ACK timeout in 10 ms units.
        rx_ack_timeout: u8,
        /// RX byte timeout in 10 ms units.
        rx_byte_timeout: u8,
    },
    GetNodeProtocolInfoRequest { node_id: u8 },
    RequestNodeInfoRequest { node_id: u8 },
    SendDataRequest(SendDataRequest),

    // Controller -> host responses.
    GetControllerVersionResponse(ControllerVersion),
    GetSerialApiInitDataResponse(SerialApiInitData),
    GetControllerCapabilitiesResponse(ControllerCapabilities),
    GetSerialApiCapabilitiesResponse(SerialApiCapabilities),
    GetControllerIdResponse { home_id: u32, own_node_id: u8 },
    GetSucNodeIdResponse { suc_node_id: u8 },
    SetSerialApiTimeoutsResponse {
        previous_rx_ack_timeout: u8,
        previous_rx_byte_timeout: u8,
    },
    GetNodeProtocolInfoResponse(NodeProtocolInfo),
    RequestNodeInfoResponse { accepted: bool },
    SendDataResponse { accepted: bool },

    // Controller -> host callbacks and unsolicited requests.
    SendDataCallback(SendDataCallback),
    ApplicationCommand(ApplicationCommand),
    ApplicationUpdate(ApplicationUpdate),
}

impl MessagePayload {
    /// Serialize the payload to its wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        payloads::serialize(self)
    }
}

/// Parse hook signature: raw payload bytes to a typed payload.
pub type ParseFn = fn(&[u8]) -> Result<MessagePayload, MessageError>;

/// Registered parse hooks for one function.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecEntry {
    pub parse_request: Option<ParseFn>,
    pub parse_response: Option<ParseFn>,
}

/// Runtime-extensible registry `function -> codec entry`.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    table: BTreeMap<u8, CodecEntry>,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MessageCodec {
    /// An empty registry with no functions.
    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// A registry pre-populated with every function the core implements.
    pub fn with_defaults() -> Self {
        let mut codec = Self::empty();
        payloads::register_defaults(&mut codec);
        codec
    }

    /// Register (or replace) the codec entry for a function.
    pub fn register(&mut self, function: FunctionType, entry: CodecEntry) {
        self.table.insert(function.as_u8(), entry);
    }

    /// Whether a function has any registered hook.
    pub fn knows(&self, function: FunctionType) -> bool {
        self.table.contains_key(&function.as_u8())
    }

    /// Parse a data frame into a typed message.
    pub fn parse(&self, frame: &DataFrame) -> Result<Message, MessageError> {
        let entry = self
            .table
            .get(&frame.function)
            .ok_or(MessageError::UnknownFunction(frame.function))?;
        let hook = match frame.msg_type {
            MessageType::Request => entry.parse_request,
            MessageType::Response => entry.parse_response,
        }
        .ok_or(MessageError::UnknownFunction(frame.function))?;

        let payload = hook(&frame.payload)?;
        Ok(Message {
            msg_type: frame.msg_type,
            function: FunctionType::from_u8(frame.function),
            payload,
        })
    }
}
