//! Error frame decoding
//!
//! A device rejects a request by answering with the error flag set in the
//! identifier. The payload then carries the id of the rejected service and a
//! 32-bit error code, both big-endian.

use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{Result, XcomError};

/// Width of an error frame payload
pub const ERROR_PAYLOAD_LEN: usize = 6;

/// Symbolic meaning of an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    InvalidFrame,
    DeviceNotFound,
    ResponseTimeout,
    InvalidServiceArgument,
    GatewayBusy,
    ObjectIdNotFound,
    InvalidDataLength,
    PropertyIsReadOnly,
    InvalidData,
    DataTooSmall,
    DataTooBig,
    WritePropertyFailed,
    ReadPropertyFailed,
    AccessDenied,
    MulticastReadNotSupported,
    Unknown,
}

impl ErrorCategory {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x01 => ErrorCategory::InvalidFrame,
            0x02 => ErrorCategory::DeviceNotFound,
            0x03 => ErrorCategory::ResponseTimeout,
            0x12 => ErrorCategory::InvalidServiceArgument,
            0x13 => ErrorCategory::GatewayBusy,
            0x22 => ErrorCategory::ObjectIdNotFound,
            0x24 => ErrorCategory::InvalidDataLength,
            0x25 => ErrorCategory::PropertyIsReadOnly,
            0x26 => ErrorCategory::InvalidData,
            0x27 => ErrorCategory::DataTooSmall,
            0x28 => ErrorCategory::DataTooBig,
            0x29 => ErrorCategory::WritePropertyFailed,
            0x2A => ErrorCategory::ReadPropertyFailed,
            0x2B => ErrorCategory::AccessDenied,
            0x2D => ErrorCategory::MulticastReadNotSupported,
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidFrame => "INVALID_FRAME",
            ErrorCategory::DeviceNotFound => "DEVICE_NOT_FOUND",
            ErrorCategory::ResponseTimeout => "RESPONSE_TIMEOUT",
            ErrorCategory::InvalidServiceArgument => "INVALID_SERVICE_ARGUMENT",
            ErrorCategory::GatewayBusy => "GATEWAY_BUSY",
            ErrorCategory::ObjectIdNotFound => "OBJECT_ID_NOT_FOUND",
            ErrorCategory::InvalidDataLength => "INVALID_DATA_LENGTH",
            ErrorCategory::PropertyIsReadOnly => "PROPERTY_IS_READ_ONLY",
            ErrorCategory::InvalidData => "INVALID_DATA",
            ErrorCategory::DataTooSmall => "DATA_TOO_SMALL",
            ErrorCategory::DataTooBig => "DATA_TOO_BIG",
            ErrorCategory::WritePropertyFailed => "WRITE_PROPERTY_FAILED",
            ErrorCategory::ReadPropertyFailed => "READ_PROPERTY_FAILED",
            ErrorCategory::AccessDenied => "ACCESS_DENIED",
            ErrorCategory::MulticastReadNotSupported => "MULTICAST_READ_NOT_SUPPORTED",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    /// Conditions on the far side that may clear by themselves
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::GatewayBusy | ErrorCategory::ResponseTimeout
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a device in an error frame
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[error("ProtocolError(id={service_id}, error_code={code}, identifier={category})")]
pub struct ProtocolError {
    /// Service id of the rejected request, as echoed by the device
    pub service_id: u16,
    pub code: u32,
    pub category: ErrorCategory,
}

impl ProtocolError {
    pub fn new(service_id: u16, code: u32) -> Self {
        Self {
            service_id,
            code,
            category: ErrorCategory::from_code(code),
        }
    }

    /// Decode an error frame payload; padding past 6 bytes is ignored
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ERROR_PAYLOAD_LEN {
            return Err(XcomError::codec(format!(
                "error payload too short: {} bytes (need {ERROR_PAYLOAD_LEN})",
                data.len()
            )));
        }
        let mut cursor = data;
        let service_id = cursor.get_u16();
        let code = cursor.get_u32();
        Ok(Self::new(service_id, code))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_category_table() {
        let table = [
            (0x01, "INVALID_FRAME"),
            (0x02, "DEVICE_NOT_FOUND"),
            (0x03, "RESPONSE_TIMEOUT"),
            (0x12, "INVALID_SERVICE_ARGUMENT"),
            (0x13, "GATEWAY_BUSY"),
            (0x22, "OBJECT_ID_NOT_FOUND"),
            (0x24, "INVALID_DATA_LENGTH"),
            (0x25, "PROPERTY_IS_READ_ONLY"),
            (0x26, "INVALID_DATA"),
            (0x27, "DATA_TOO_SMALL"),
            (0x28, "DATA_TOO_BIG"),
            (0x29, "WRITE_PROPERTY_FAILED"),
            (0x2A, "READ_PROPERTY_FAILED"),
            (0x2B, "ACCESS_DENIED"),
            (0x2D, "MULTICAST_READ_NOT_SUPPORTED"),
        ];
        for (code, name) in table {
            assert_eq!(ErrorCategory::from_code(code).as_str(), name, "code 0x{code:02X}");
        }
    }

    #[test]
    fn test_unknown_codes() {
        for code in [0x00, 0x04, 0x2C, 0xFF, u32::MAX] {
            assert_eq!(ErrorCategory::from_code(code), ErrorCategory::Unknown);
        }
    }

    #[test]
    fn test_decode_device_not_found() {
        let data = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02];
        let err = ProtocolError::decode(&data).unwrap();
        assert_eq!(err.service_id, 1);
        assert_eq!(err.code, 2);
        assert_eq!(err.category, ErrorCategory::DeviceNotFound);
        assert_eq!(
            err.to_string(),
            "ProtocolError(id=1, error_code=2, identifier=DEVICE_NOT_FOUND)"
        );
    }

    #[test]
    fn test_decode_with_padding() {
        let data = [0x00, 0x02, 0x00, 0x00, 0x00, 0x25, 0x00, 0x00];
        let err = ProtocolError::decode(&data).unwrap();
        assert_eq!(err, ProtocolError::new(2, 0x25));
        assert_eq!(err.category, ErrorCategory::PropertyIsReadOnly);
    }

    #[test]
    fn test_decode_short_payload() {
        let err = ProtocolError::decode(&[0x00, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, XcomError::Codec(_)));
    }

    #[test]
    fn test_transient_categories() {
        assert!(ErrorCategory::GatewayBusy.is_transient());
        assert!(ErrorCategory::ResponseTimeout.is_transient());
        assert!(!ErrorCategory::AccessDenied.is_transient());
        assert!(!ErrorCategory::Unknown.is_transient());
    }
}
