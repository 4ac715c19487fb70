use std::sync::Arc;

use crate::dispatch::DispatchPool;
use crate::gate::AdmissionGate;
use crate::orchestrator::Orchestrator;
use crate::platform::ChatPlatform;
use crate::session::SessionStore;

/// Process-wide services shared by every handler. Created once at startup.
#[derive(Clone)]
pub struct AppState {
    pub gate: AdmissionGate,
    pub sessions: SessionStore,
    pub orchestrator: Orchestrator,
    pub platform: Arc<dyn ChatPlatform>,
}

impl AppState {
    pub fn new(platform: Arc<dyn ChatPlatform>, pool: Arc<DispatchPool>) -> Self {
        AppState {
            gate: AdmissionGate::new(),
            sessions: SessionStore::new(),
            orchestrator: Orchestrator::new(pool, platform.clone()),
            platform,
        }
    }
}
