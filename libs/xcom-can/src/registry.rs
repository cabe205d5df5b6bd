//! Service registry
//!
//! Maps the 3-bit service id of an inbound frame to the kind that decodes
//! it. Filled once while the node is built, read-only afterwards.

use crate::codec::ServiceKind;
use crate::error::{Result, XcomError};
use crate::identifier::MAX_SERVICE_ID;

const SLOTS: usize = MAX_SERVICE_ID as usize + 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistry {
    slots: [Option<ServiceKind>; SLOTS],
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every public service kind
    pub fn public() -> Self {
        let mut registry = Self::new();
        for kind in ServiceKind::ALL {
            // Ids of the public kinds are distinct
            let _ = registry.register(kind);
        }
        registry
    }

    /// Register a kind under its service id
    ///
    /// Registering the same kind again is a no-op; a different kind on an
    /// occupied id is rejected.
    pub fn register(&mut self, kind: ServiceKind) -> Result<()> {
        let slot = &mut self.slots[kind.service_id() as usize];
        match slot {
            Some(existing) if *existing == kind => Ok(()),
            Some(existing) => Err(XcomError::config(format!(
                "service id {} already registered for {existing}, cannot register {kind}",
                kind.service_id()
            ))),
            None => {
                *slot = Some(kind);
                Ok(())
            },
        }
    }

    pub fn lookup(&self, service_id: u8) -> Option<ServiceKind> {
        self.slots.get(service_id as usize).copied().flatten()
    }

    pub fn contains(&self, kind: ServiceKind) -> bool {
        self.lookup(kind.service_id()) == Some(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ServiceKind> + '_ {
        self.slots.iter().flatten().copied()
    }
}
