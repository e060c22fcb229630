//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use attendance_core::ingestion::IngestionService;
use attendance_core::ports::{AccessService, AttendanceStore, RosterService};
use attendance_core::token::TokenCodec;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub store: Arc<dyn AttendanceStore>,
    pub roster: Arc<dyn RosterService>,
    pub access: Arc<dyn AccessService>,
    pub codec: Arc<TokenCodec>,
}
