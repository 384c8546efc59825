pub mod engine;
pub mod http;
pub mod state;
pub mod store;
pub mod ws;

pub use state::AppState;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/sessions/:id", get(ws::ws_session_handler))
        .route("/api/sessions", post(http::sessions::create_session))
        .route(
            "/api/sessions/:id",
            get(http::sessions::get_session).put(http::sessions::replace_session),
        )
        .route("/api/sessions/:id/remix", post(http::sessions::remix_session))
        .route("/api/sessions/:id/publish", post(http::sessions::publish_session))
        .route("/s/:id", get(http::sessions::session_landing_page))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .fallback(fallback_404)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback_404() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use axum::body::to_bytes;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Arc::new(MockStore::new()))
    }

    #[tokio::test]
    async fn create_then_fetch_session_round_trips_through_http() {
        let router = build_router(test_state());

        let response = router
            .clone()
            .oneshot(
                Request::post("/api/sessions")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"name":"jam"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = created["id"].as_str().unwrap();

        let response = router
            .oneshot(Request::get(format!("/api/sessions/{id}")).body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let fetched: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched["name"], "jam");
    }

    #[tokio::test]
    async fn get_session_with_malformed_id_is_rejected() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::get("/api/sessions/not-a-uuid").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_session_for_unknown_id_is_404() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                Request::get(format!("/api/sessions/{}", uuid::Uuid::new_v4()))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_falls_back_to_404() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::get("/nope").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
