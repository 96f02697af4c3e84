use db::DBService;
use services::services::{
    events::EventService, orchestrator::Orchestrator, revisions::RevisionService,
};

pub mod error;
pub mod routes;

/// Everything the route handlers need, shared by cloning.
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub events: EventService,
    pub orchestrator: Orchestrator,
    pub revisions: RevisionService,
}
