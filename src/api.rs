use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use shuttle_axum::axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::conversation::ListingConversation;
use crate::schedule::{DigestScheduler, SchedulerStatus};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<DigestScheduler>,
    pub conversation: Arc<ListingConversation>,
    /// `None` disables the admin routes.
    pub admin_token: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/admin/publish-now", post(admin_publish_now))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResp {
    #[serde(flatten)]
    scheduler: SchedulerStatus,
    active_sessions: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    Json(StatusResp {
        scheduler: state.scheduler.status(Utc::now()),
        active_sessions: state.conversation.active_sessions(),
    })
}

fn authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|got| got == expected)
}

async fn admin_publish_now(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&headers, state.admin_token.as_deref()) {
        tracing::warn!("admin publish-now rejected: bad or missing token");
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let report = state.scheduler.publish_now().await;
    Json(report).into_response()
}
