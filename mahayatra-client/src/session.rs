use mahayatra_core::{BusId, SessionId};

/// Identity of one booking attempt: created on entering seat selection,
/// discarded when the flow is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub bus_id: BusId,
    pub session_id: SessionId,
}

impl SessionContext {
    pub fn begin(bus_id: BusId) -> Self {
        Self {
            bus_id,
            session_id: SessionId::generate(),
        }
    }
}
