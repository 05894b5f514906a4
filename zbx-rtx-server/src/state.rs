//! Shared application state threaded through every handler via `axum`'s
//! `State` extractor, grounded on the teacher's `AppState` (`ferrex-server/
//! src/infra/app_state.rs`): a small `Clone` struct of `Arc`-wrapped
//! shared services.

use std::sync::Arc;

use zbx_rtx_core::{RingBuffer, SseHub};

#[derive(Clone, Debug)]
pub struct AppState {
    pub ring: Arc<RingBuffer>,
    pub hub: Arc<SseHub>,
}
