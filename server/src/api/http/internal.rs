//! Callback endpoint for the in-container watcher

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use tracing::debug;

use crate::domain::types::WatcherEvent;
use crate::{AppState, Error, Result};

/// Apply one filesystem event. 204 when the container is unknown.
pub async fn fs_event(
    State(state): State<AppState>,
    payload: std::result::Result<Json<WatcherEvent>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(event) = payload.map_err(|e| Error::InvalidRequest(e.body_text()))?;
    debug!(
        "Watcher event {:?} {:?} {} from {}",
        event.event, event.node_kind, event.path, event.container_id
    );

    if state.file_service.apply_watcher_event(event).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}
