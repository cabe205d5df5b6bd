//! Xcom-CAN bus addresses
//!
//! Every participant owns a 10-bit address. Each device family also has a
//! virtual *group* address used for multicast; unicast members follow the
//! group address (`group + index`).
//!
//! | Family | Group | Members |
//! |---|---|---|
//! | Xtender (XTH/XTM/XTS) | 100 | 101..=109 |
//! | VarioTrack | 300 | 301..=315 |
//! | RCC / Xcom-232i / Xcom-CAN | 500 | 501..=505 |
//! | BSP | 600 | 601 |
//! | VarioString | 700 | 701..=715 |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, XcomError};

/// Highest valid 10-bit address
pub const MAX_ADDRESS: u16 = 0x3FF;

pub const XT_GROUP_DEVICE_ID: u16 = 100;
pub const XT_1_DEVICE_ID: u16 = XT_GROUP_DEVICE_ID + 1;
pub const XT_2_DEVICE_ID: u16 = XT_GROUP_DEVICE_ID + 2;
pub const XT_3_DEVICE_ID: u16 = XT_GROUP_DEVICE_ID + 3;
pub const XT_MAX_DEVICES: u16 = 9;

pub const VT_GROUP_DEVICE_ID: u16 = 300;
pub const VT_1_DEVICE_ID: u16 = VT_GROUP_DEVICE_ID + 1;
pub const VT_MAX_DEVICES: u16 = 15;

/// Remote-control group; frames sent here reach this client too
pub const RCC_GROUP_DEVICE_ID: u16 = 500;
pub const RCC_1_DEVICE_ID: u16 = RCC_GROUP_DEVICE_ID + 1;
pub const RCC_MAX_DEVICES: u16 = 5;

pub const BSP_GROUP_DEVICE_ID: u16 = 600;
pub const BSP_DEVICE_ID: u16 = BSP_GROUP_DEVICE_ID + 1;
pub const BSP_MAX_DEVICES: u16 = 1;

pub const VS_GROUP_DEVICE_ID: u16 = 700;
pub const VS_1_DEVICE_ID: u16 = VS_GROUP_DEVICE_ID + 1;
pub const VS_MAX_DEVICES: u16 = 15;

/// (group address, member count)
const GROUPS: [(u16, u16); 5] = [
    (XT_GROUP_DEVICE_ID, XT_MAX_DEVICES),
    (VT_GROUP_DEVICE_ID, VT_MAX_DEVICES),
    (RCC_GROUP_DEVICE_ID, RCC_MAX_DEVICES),
    (BSP_GROUP_DEVICE_ID, BSP_MAX_DEVICES),
    (VS_GROUP_DEVICE_ID, VS_MAX_DEVICES),
];

/// 10-bit bus address
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u16", into = "u16")]
pub struct Address(u16);

impl Address {
    /// Reserved remote-control group address
    pub const RCC_GROUP: Address = Address(RCC_GROUP_DEVICE_ID);

    /// Create an address, rejecting values that do not fit in 10 bits
    pub fn new(value: u16) -> Result<Self> {
        if value > MAX_ADDRESS {
            return Err(XcomError::InvalidAddress(value));
        }
        Ok(Self(value))
    }

    /// Build from the masked 10-bit field of a frame identifier
    pub(crate) fn from_field(value: u32) -> Self {
        Self((value & MAX_ADDRESS as u32) as u16)
    }

    #[inline]
    pub fn value(self) -> u16 {
        self.0
    }

    /// Check if this is one of the multicast group addresses
    pub fn is_group(self) -> bool {
        GROUPS.iter().any(|(group, _)| *group == self.0)
    }

    /// Group address this unicast address belongs to
    pub fn group(self) -> Option<Address> {
        GROUPS
            .iter()
            .find(|(group, count)| self.0 > *group && self.0 <= group + count)
            .map(|(group, _)| Address(*group))
    }

    /// Check if a frame coming from `source` answers a request sent here
    ///
    /// A unicast request is answered by the same address; a multicast request
    /// by any member of the group.
    pub fn is_answered_by(self, source: Address) -> bool {
        self == source || (self.is_group() && source.group() == Some(self))
    }
}

impl TryFrom<u16> for Address {
    type Error = XcomError;

    fn try_from(value: u16) -> Result<Self> {
        Address::new(value)
    }
}

impl From<Address> for u16 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn member(group: u16, max: u16, index: u16, family: &str) -> Result<Address> {
    if index == 0 || index > max {
        return Err(XcomError::config(format!(
            "{family} index {index} out of range 1..={max}"
        )));
    }
    Address::new(group + index)
}

/// Unicast address of the n-th Xtender (1-based, as shown on the RCC)
pub fn xtender(index: u16) -> Result<Address> {
    member(XT_GROUP_DEVICE_ID, XT_MAX_DEVICES, index, "Xtender")
}

/// Unicast address of the n-th VarioTrack
pub fn vario_track(index: u16) -> Result<Address> {
    member(VT_GROUP_DEVICE_ID, VT_MAX_DEVICES, index, "VarioTrack")
}

/// Unicast address of the n-th VarioString
pub fn vario_string(index: u16) -> Result<Address> {
    member(VS_GROUP_DEVICE_ID, VS_MAX_DEVICES, index, "VarioString")
}

/// Unicast address of the n-th RCC / Xcom device
pub fn rcc(index: u16) -> Result<Address> {
    member(RCC_GROUP_DEVICE_ID, RCC_MAX_DEVICES, index, "RCC")
}

/// Unicast address of the BSP
pub fn bsp() -> Address {
    Address(BSP_DEVICE_ID)
}

/// Group address of a unicast member, `None` for groups and unassigned ranges
pub fn group_of(address: Address) -> Option<Address> {
    address.group()
}
