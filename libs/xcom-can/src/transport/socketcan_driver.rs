//! SocketCAN driver (Linux)
//!
//! Blocking socket calls run on the blocking pool; the read timeout of the
//! socket bounds every receive to the poll interval.

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{
    CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket,
};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::traits::{CanDriver, CanFrame, DriverStats, TransportError};

/// Driver over a SocketCAN interface (`can0`, `vcan0`, ...)
pub struct SocketCanDriver {
    interface: String,
    socket: Arc<CanSocket>,
    stats: Mutex<DriverStats>,
}

impl fmt::Debug for SocketCanDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketCanDriver")
            .field("interface", &self.interface)
            .finish()
    }
}

impl SocketCanDriver {
    /// Open the interface; bitrate is configured outside the process
    /// (`ip link set can0 type can bitrate 250000`)
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        debug!("Opening CAN interface: {}", interface);
        let socket = CanSocket::open(interface).map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to open {interface}: {e}"))
        })?;
        info!("CAN interface {} opened", interface);

        Ok(Self {
            interface: interface.to_string(),
            socket: Arc::new(socket),
            stats: Mutex::new(DriverStats::new()),
        })
    }

    fn to_socket_frame(frame: &CanFrame) -> Result<SocketFrame, TransportError> {
        let id = ExtendedId::new(frame.id).ok_or_else(|| {
            TransportError::ConfigError(format!("Invalid extended CAN ID 0x{:X}", frame.id))
        })?;
        SocketFrame::new(id, frame.payload()).ok_or_else(|| {
            TransportError::ConfigError(format!(
                "CAN 2.0 data must be <= 8 bytes, got {}",
                frame.payload().len()
            ))
        })
    }

    fn from_socket_frame(frame: &SocketFrame) -> Option<CanFrame> {
        let (id, is_extended) = match EmbeddedFrame::id(frame) {
            Id::Extended(id) => (id.as_raw(), true),
            Id::Standard(id) => (u32::from(id.as_raw()), false),
        };
        match frame {
            SocketFrame::Data(_) => {
                let data = EmbeddedFrame::data(frame).to_vec();
                let frame = CanFrame {
                    id,
                    dlc: data.len() as u8,
                    data,
                    flags: 0,
                    timestamp: 0,
                    is_extended,
                };
                Some(frame.received_now())
            },
            // Remote and controller error frames carry no service payload
            _ => None,
        }
    }
}

#[async_trait]
impl CanDriver for SocketCanDriver {
    fn name(&self) -> &str {
        &self.interface
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let socket_frame = Self::to_socket_frame(frame)?;
        let socket = Arc::clone(&self.socket);
        let result = tokio::task::spawn_blocking(move || socket.write_frame(&socket_frame))
            .await
            .map_err(|e| TransportError::SendFailed(format!("send task failed: {e}")))?;

        match result {
            Ok(()) => {
                self.stats.lock().record_sent();
                Ok(())
            },
            Err(e) => {
                self.stats.lock().record_send_error();
                match TransportError::from(e) {
                    TransportError::IoError(msg) => Err(TransportError::SendFailed(msg)),
                    other => Err(other),
                }
            },
        }
    }

    async fn receive(&self, poll: Duration) -> Result<Option<CanFrame>, TransportError> {
        let socket = Arc::clone(&self.socket);
        let result = tokio::task::spawn_blocking(move || {
            socket.set_read_timeout(poll)?;
            socket.read_frame()
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("receive task failed: {e}")))?;

        match result {
            Ok(frame) => match Self::from_socket_frame(&frame) {
                Some(frame) => {
                    self.stats.lock().record_received();
                    Ok(Some(frame))
                },
                None => {
                    trace!("Ignoring non-data frame on {}", self.interface);
                    Ok(None)
                },
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            },
            Err(e) => {
                self.stats.lock().record_receive_error();
                Err(e.into())
            },
        }
    }

    fn stats(&self) -> DriverStats {
        self.stats.lock().clone()
    }
}
