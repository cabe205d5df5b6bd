//! Xcom-CAN service payload codec
//!
//! Each service kind fixes an exact big-endian byte layout. Request and
//! response of one kind share the 3-bit service id but differ in shape:
//!
//! | Kind | id | Request | Response |
//! |---|---|---|---|
//! | UserInfoRead | 0 | info_id:u16 | info_id:u16, value:f32 |
//! | ParameterRead | 1 | parameter_id:u16, part:u8 | parameter_id:u16, part:u8, value:f32 |
//! | ParameterWrite | 2 | parameter_id:u16, part:u8, value:f32 | parameter_id:u16, part:u8, value:f32 |
//! | MessageNotification | 3 | - | message_id:u16, value:u32 |
//!
//! Decoding rejects payloads shorter than the layout and ignores DLC padding
//! past it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, XcomError};

/// Classic CAN payload limit
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Service kinds of the public protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    UserInfoRead,
    ParameterRead,
    ParameterWrite,
    MessageNotification,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::UserInfoRead,
        ServiceKind::ParameterRead,
        ServiceKind::ParameterWrite,
        ServiceKind::MessageNotification,
    ];

    /// 3-bit service identifier carried in the frame id
    pub const fn service_id(self) -> u8 {
        match self {
            ServiceKind::UserInfoRead => 0x0,
            ServiceKind::ParameterRead => 0x1,
            ServiceKind::ParameterWrite => 0x2,
            ServiceKind::MessageNotification => 0x3,
        }
    }

    pub fn from_service_id(service_id: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.service_id() == service_id)
    }

    /// Notification kinds are never answered and never awaited
    pub const fn is_notification(self) -> bool {
        matches!(self, ServiceKind::MessageNotification)
    }

    /// Inbound payload width (response or notification)
    pub const fn inbound_len(self) -> usize {
        match self {
            ServiceKind::UserInfoRead => ReadUserInfoResponse::WIRE_LEN,
            ServiceKind::ParameterRead => ReadParameterResponse::WIRE_LEN,
            ServiceKind::ParameterWrite => WriteParameterResponse::WIRE_LEN,
            ServiceKind::MessageNotification => MessageNotification::WIRE_LEN,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::UserInfoRead => "UserInfoRead",
            ServiceKind::ParameterRead => "ParameterRead",
            ServiceKind::ParameterWrite => "ParameterWrite",
            ServiceKind::MessageNotification => "MessageNotification",
        };
        f.write_str(name)
    }
}

/// Memory part of a parameter access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum ParameterPart {
    /// Read from flash, or write to flash and RAM
    Flash = 0x00,
    /// Minimum allowed value, from flash
    FlashMin = 0x01,
    /// Maximum allowed value, from flash
    FlashMax = 0x02,
    /// Write to RAM only (unsaved value); reads fall back to flash
    ///
    /// Flash endurance is about 1000 writes per parameter, so cyclic writes
    /// should target this part.
    Ram = 0x04,
}

impl TryFrom<u8> for ParameterPart {
    type Error = XcomError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(ParameterPart::Flash),
            0x01 => Ok(ParameterPart::FlashMin),
            0x02 => Ok(ParameterPart::FlashMax),
            0x04 => Ok(ParameterPart::Ram),
            other => Err(XcomError::codec(format!(
                "unknown parameter part 0x{other:02X}"
            ))),
        }
    }
}

impl From<ParameterPart> for u8 {
    fn from(part: ParameterPart) -> Self {
        part as u8
    }
}

impl FromStr for ParameterPart {
    type Err = XcomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "flash" => Ok(ParameterPart::Flash),
            "flash-min" | "min" => Ok(ParameterPart::FlashMin),
            "flash-max" | "max" => Ok(ParameterPart::FlashMax),
            "ram" => Ok(ParameterPart::Ram),
            other => Err(XcomError::config(format!(
                "unknown parameter part '{other}' (expected flash, flash-min, flash-max or ram)"
            ))),
        }
    }
}

/// Fixed-layout service record
pub trait ServicePayload: Sized {
    const KIND: ServiceKind;
    /// Exact encoded width in bytes
    const WIRE_LEN: usize;

    fn put(&self, buf: &mut BytesMut);

    /// Read the fields; `buf` holds at least `WIRE_LEN` bytes
    fn get(buf: &mut &[u8]) -> Result<Self>;

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        self.put(&mut buf);
        debug_assert_eq!(buf.len(), Self::WIRE_LEN);
        buf.freeze()
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::WIRE_LEN {
            return Err(XcomError::codec(format!(
                "{} payload too short: {} bytes (need {})",
                Self::KIND,
                data.len(),
                Self::WIRE_LEN
            )));
        }
        let mut cursor = &data[..Self::WIRE_LEN];
        Self::get(&mut cursor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadUserInfoRequest {
    pub info_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadUserInfoResponse {
    pub info_id: u16,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadParameterRequest {
    pub parameter_id: u16,
    pub part: ParameterPart,
}

/// Devices echo the part byte as-is; see [`ReadParameterResponse::known_part`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadParameterResponse {
    pub parameter_id: u16,
    pub part: u8,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteParameterRequest {
    pub parameter_id: u16,
    pub part: ParameterPart,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteParameterResponse {
    pub parameter_id: u16,
    pub part: u8,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageNotification {
    pub message_id: u16,
    pub value: u32,
}

impl ServicePayload for ReadUserInfoRequest {
    const KIND: ServiceKind = ServiceKind::UserInfoRead;
    const WIRE_LEN: usize = 2;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.info_id);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            info_id: buf.get_u16(),
        })
    }
}

impl ServicePayload for ReadUserInfoResponse {
    const KIND: ServiceKind = ServiceKind::UserInfoRead;
    const WIRE_LEN: usize = 6;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.info_id);
        buf.put_f32(self.value);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            info_id: buf.get_u16(),
            value: buf.get_f32(),
        })
    }
}

impl ServicePayload for ReadParameterRequest {
    const KIND: ServiceKind = ServiceKind::ParameterRead;
    const WIRE_LEN: usize = 3;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.parameter_id);
        buf.put_u8(self.part as u8);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            parameter_id: buf.get_u16(),
            part: ParameterPart::try_from(buf.get_u8())?,
        })
    }
}

impl ServicePayload for WriteParameterRequest {
    const KIND: ServiceKind = ServiceKind::ParameterWrite;
    const WIRE_LEN: usize = 7;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.parameter_id);
        buf.put_u8(self.part as u8);
        buf.put_f32(self.value);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            parameter_id: buf.get_u16(),
            part: ParameterPart::try_from(buf.get_u8())?,
            value: buf.get_f32(),
        })
    }
}

/// Parameter answers share one layout and keep the echoed part byte raw
macro_rules! parameter_response_payload {
    ($ty:ident, $kind:expr) => {
        impl ServicePayload for $ty {
            const KIND: ServiceKind = $kind;
            const WIRE_LEN: usize = 7;

            fn put(&self, buf: &mut BytesMut) {
                buf.put_u16(self.parameter_id);
                buf.put_u8(self.part);
                buf.put_f32(self.value);
            }

            fn get(buf: &mut &[u8]) -> Result<Self> {
                Ok(Self {
                    parameter_id: buf.get_u16(),
                    part: buf.get_u8(),
                    value: buf.get_f32(),
                })
            }
        }

        impl $ty {
            /// Echoed part, when it is one of the documented values
            pub fn known_part(&self) -> Option<ParameterPart> {
                ParameterPart::try_from(self.part).ok()
            }
        }
    };
}

parameter_response_payload!(ReadParameterResponse, ServiceKind::ParameterRead);
parameter_response_payload!(WriteParameterResponse, ServiceKind::ParameterWrite);

impl ServicePayload for MessageNotification {
    const KIND: ServiceKind = ServiceKind::MessageNotification;
    const WIRE_LEN: usize = 6;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.message_id);
        buf.put_u32(self.value);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            message_id: buf.get_u16(),
            value: buf.get_u32(),
        })
    }
}

/// Outbound request of a request/response kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    UserInfoRead(ReadUserInfoRequest),
    ParameterRead(ReadParameterRequest),
    ParameterWrite(WriteParameterRequest),
}

impl Request {
    pub fn read_user_info(info_id: u16) -> Self {
        Request::UserInfoRead(ReadUserInfoRequest { info_id })
    }

    pub fn read_parameter(parameter_id: u16, part: ParameterPart) -> Self {
        Request::ParameterRead(ReadParameterRequest { parameter_id, part })
    }

    pub fn write_parameter(parameter_id: u16, part: ParameterPart, value: f32) -> Self {
        Request::ParameterWrite(WriteParameterRequest {
            parameter_id,
            part,
            value,
        })
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            Request::UserInfoRead(_) => ServiceKind::UserInfoRead,
            Request::ParameterRead(_) => ServiceKind::ParameterRead,
            Request::ParameterWrite(_) => ServiceKind::ParameterWrite,
        }
    }

    /// Info or parameter id the request addresses
    pub fn object_id(&self) -> u16 {
        match self {
            Request::UserInfoRead(r) => r.info_id,
            Request::ParameterRead(r) => r.parameter_id,
            Request::ParameterWrite(r) => r.parameter_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Request::UserInfoRead(r) => r.encode(),
            Request::ParameterRead(r) => r.encode(),
            Request::ParameterWrite(r) => r.encode(),
        }
    }

    pub fn decode(kind: ServiceKind, data: &[u8]) -> Result<Self> {
        match kind {
            ServiceKind::UserInfoRead => ReadUserInfoRequest::decode(data).map(Request::UserInfoRead),
            ServiceKind::ParameterRead => {
                ReadParameterRequest::decode(data).map(Request::ParameterRead)
            },
            ServiceKind::ParameterWrite => {
                WriteParameterRequest::decode(data).map(Request::ParameterWrite)
            },
            ServiceKind::MessageNotification => Err(XcomError::codec(
                "MessageNotification has no request variant",
            )),
        }
    }
}

/// Decoded response of a request/response kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    UserInfoRead(ReadUserInfoResponse),
    ParameterRead(ReadParameterResponse),
    ParameterWrite(WriteParameterResponse),
}

impl Response {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Response::UserInfoRead(_) => ServiceKind::UserInfoRead,
            Response::ParameterRead(_) => ServiceKind::ParameterRead,
            Response::ParameterWrite(_) => ServiceKind::ParameterWrite,
        }
    }

    pub fn object_id(&self) -> u16 {
        match self {
            Response::UserInfoRead(r) => r.info_id,
            Response::ParameterRead(r) => r.parameter_id,
            Response::ParameterWrite(r) => r.parameter_id,
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            Response::UserInfoRead(r) => r.value,
            Response::ParameterRead(r) => r.value,
            Response::ParameterWrite(r) => r.value,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Response::UserInfoRead(r) => r.encode(),
            Response::ParameterRead(r) => r.encode(),
            Response::ParameterWrite(r) => r.encode(),
        }
    }

    pub fn decode(kind: ServiceKind, data: &[u8]) -> Result<Self> {
        match kind {
            ServiceKind::UserInfoRead => {
                ReadUserInfoResponse::decode(data).map(Response::UserInfoRead)
            },
            ServiceKind::ParameterRead => {
                ReadParameterResponse::decode(data).map(Response::ParameterRead)
            },
            ServiceKind::ParameterWrite => {
                WriteParameterResponse::decode(data).map(Response::ParameterWrite)
            },
            ServiceKind::MessageNotification => Err(XcomError::codec(
                "MessageNotification has no response variant",
            )),
        }
    }
}

/// Decoded non-error inbound frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inbound {
    Response(Response),
    Notification(MessageNotification),
}

impl Inbound {
    pub fn decode(kind: ServiceKind, data: &[u8]) -> Result<Self> {
        match kind {
            ServiceKind::MessageNotification => {
                MessageNotification::decode(data).map(Inbound::Notification)
            },
            _ => Response::decode(kind, data).map(Inbound::Response),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            Inbound::Response(r) => r.kind(),
            Inbound::Notification(_) => ServiceKind::MessageNotification,
        }
    }
}

/// Any service record the node can put on the bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceMessage {
    Request(Request),
    Response(Response),
    Notification(MessageNotification),
}

impl ServiceMessage {
    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceMessage::Request(r) => r.kind(),
            ServiceMessage::Response(r) => r.kind(),
            ServiceMessage::Notification(_) => ServiceKind::MessageNotification,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            ServiceMessage::Request(r) => r.encode(),
            ServiceMessage::Response(r) => r.encode(),
            ServiceMessage::Notification(n) => n.encode(),
        }
    }
}

impl From<Request> for ServiceMessage {
    fn from(request: Request) -> Self {
        ServiceMessage::Request(request)
    }
}

impl From<Response> for ServiceMessage {
    fn from(response: Response) -> Self {
        ServiceMessage::Response(response)
    }
}

impl From<MessageNotification> for ServiceMessage {
    fn from(notification: MessageNotification) -> Self {
        ServiceMessage::Notification(notification)
    }
}
