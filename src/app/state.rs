//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::rooms::RoomService;
use crate::session::SessionSigner;
use crate::store::RecordSender;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomService>,
    pub registry: Arc<MatchRegistry>,
}

impl AppState {
    /// Records produced by rooms go to `records` when a sink is running
    pub fn new(config: Config, records: Option<RecordSender>) -> Self {
        let config = Arc::new(config);

        // Initialize match registry
        let registry = Arc::new(MatchRegistry::new());

        let signer = SessionSigner::new(&config.session_secret);
        let rooms = Arc::new(RoomService::new(
            config.sim.clone(),
            signer,
            registry.clone(),
            records,
        ));

        Self {
            config,
            rooms,
            registry,
        }
    }
}
