// Application state for HTTP and WebSocket handlers
use crate::application::history_service::HistoryService;
use crate::application::pipeline::PipelineCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub history: HistoryService,
    pub pipeline: PipelineCoordinator,
}
