//! Bus Driver Traits
//!
//! The protocol node only needs two things from the bus: put one extended
//! frame on the wire, and hand back the next received frame.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::codec::MAX_PAYLOAD_LEN;
use crate::identifier::EXTENDED_ID_MASK;

/// Bus driver error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Interface could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Interface went away (bus-off, link down)
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Failures that may clear without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::IoError(_) | TransportError::SendFailed(_)
        )
    }
}

// ENODEV, ENETDOWN: interface removed or set down
const LINK_DOWN_ERRNOS: [i32; 2] = [19, 100];

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let link_down = matches!(
            err.kind(),
            io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        ) || (cfg!(target_os = "linux")
            && err
                .raw_os_error()
                .is_some_and(|code| LINK_DOWN_ERRNOS.contains(&code)));

        if link_down {
            TransportError::ConnectionLost(err.to_string())
        } else {
            TransportError::IoError(err.to_string())
        }
    }
}

/// Raw CAN frame as exchanged with a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// CAN identifier (29 bits when `is_extended`)
    pub id: u32,
    /// Data payload (0-8 bytes)
    pub data: Vec<u8>,
    /// Data length code as reported by the controller
    pub dlc: u8,
    /// Driver-specific frame flags
    pub flags: u32,
    /// Receive timestamp (milliseconds since epoch, 0 for outbound frames)
    pub timestamp: u64,
    /// Extended (29-bit) identifier
    pub is_extended: bool,
}

impl CanFrame {
    /// Create an extended data frame
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self, TransportError> {
        if id > EXTENDED_ID_MASK {
            return Err(TransportError::ConfigError(format!(
                "Extended CAN ID must be <= 0x1FFFFFFF, got 0x{id:X}"
            )));
        }
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::ConfigError(format!(
                "CAN 2.0 data must be <= 8 bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            id,
            data: data.to_vec(),
            dlc: data.len() as u8,
            flags: 0,
            timestamp: 0,
            is_extended: true,
        })
    }

    /// Stamp the frame with the current wall clock
    pub fn received_now(mut self) -> Self {
        self.timestamp = current_timestamp_millis();
        self
    }

    /// Payload bytes covered by the DLC
    pub fn payload(&self) -> &[u8] {
        let len = (self.dlc as usize).min(self.data.len());
        &self.data[..len]
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} [{}]", self.id, self.dlc)?;
        for byte in self.payload() {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}

pub(crate) fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bus driver counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
}

impl DriverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn record_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    pub fn record_receive_error(&mut self) {
        self.receive_errors += 1;
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// CAN bus driver used by the protocol node
#[async_trait]
pub trait CanDriver: Send + Sync + fmt::Debug {
    /// Human-readable driver name (interface name for hardware drivers)
    fn name(&self) -> &str;

    /// Transmit one frame
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Wait up to `poll` for the next frame
    ///
    /// `Ok(None)` means nothing arrived within the poll interval.
    async fn receive(&self, poll: Duration) -> Result<Option<CanFrame>, TransportError>;

    /// Driver counters
    fn stats(&self) -> DriverStats {
        DriverStats::default()
    }
}
