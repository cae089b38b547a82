use std::sync::Arc;

use mockstage_core::InterviewEngine;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InterviewEngine>,
}

impl AppState {
    pub fn new(engine: Arc<InterviewEngine>) -> Self {
        Self { engine }
    }
}
