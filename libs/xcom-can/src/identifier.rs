//! 29-bit frame identifier
//!
//! ```text
//!  28        19 18         9 8     6 5        0
//! +------------+------------+-------+----------+
//! | destination|   source   |service|  flags   |
//! |  10 bits   |  10 bits   | 3 bits|  6 bits  |
//! +------------+------------+-------+----------+
//!                                     bit0 = error
//! ```

use std::fmt;

use crate::addresses::Address;
use crate::error::{Result, XcomError};

const DESTINATION_SHIFT: u32 = 19;
const SOURCE_SHIFT: u32 = 9;
const SERVICE_SHIFT: u32 = 6;
const ADDRESS_MASK: u32 = 0x3FF;
const SERVICE_MASK: u32 = 0x7;
const FLAGS_MASK: u32 = 0x3F;

/// Highest 3-bit service identifier
pub const MAX_SERVICE_ID: u8 = 0x7;
/// Highest 6-bit flags value
pub const MAX_FLAGS: u8 = 0x3F;
/// Error flag (bit 0 of the flags field)
pub const FLAG_ERROR: u8 = 0x01;
/// Mask of a 29-bit extended CAN identifier
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Decoded frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub destination: Address,
    pub source: Address,
    pub service_id: u8,
    pub flags: u8,
}

impl FrameId {
    /// Build an identifier, rejecting fields outside their bit range
    pub fn new(destination: Address, source: Address, service_id: u8, flags: u8) -> Result<Self> {
        if service_id > MAX_SERVICE_ID {
            return Err(XcomError::invalid_identifier(format!(
                "service id {service_id} does not fit in 3 bits"
            )));
        }
        if flags > MAX_FLAGS {
            return Err(XcomError::invalid_identifier(format!(
                "flags 0x{flags:02X} do not fit in 6 bits"
            )));
        }
        Ok(Self {
            destination,
            source,
            service_id,
            flags,
        })
    }

    /// Split a raw identifier into its fields
    pub fn from_raw(raw: u32) -> Self {
        Self {
            destination: Address::from_field(raw >> DESTINATION_SHIFT),
            source: Address::from_field(raw >> SOURCE_SHIFT),
            service_id: ((raw >> SERVICE_SHIFT) & SERVICE_MASK) as u8,
            flags: (raw & FLAGS_MASK) as u8,
        }
    }

    /// Packed 29-bit identifier
    pub fn raw(&self) -> u32 {
        ((self.destination.value() as u32 & ADDRESS_MASK) << DESTINATION_SHIFT)
            | ((self.source.value() as u32 & ADDRESS_MASK) << SOURCE_SHIFT)
            | ((self.service_id as u32 & SERVICE_MASK) << SERVICE_SHIFT)
            | (self.flags as u32 & FLAGS_MASK)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.flags & FLAG_ERROR != 0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:08X} (dst={} src={} svc={} flags=0x{:02X})",
            self.raw(),
            self.destination,
            self.source,
            self.service_id,
            self.flags
        )
    }
}
