//! Session CRUD and the crawler-aware `/s/:id` landing route (§4.6, §4.7).
//!
//! Grounded on the teacher's `http::races` handlers for the create/list/
//! delete shape and `http::response` for the error envelope; the SPA
//! meta-rewrite route has no teacher analogue and is built from scratch
//! against the `other_examples/` crawler-detection snippet.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use sequencer_model::validate::{is_body_size_valid, is_valid_uuid};
use sequencer_protocol::limits::MAX_MESSAGE_SIZE;
use sequencer_protocol::Session;
use serde::Deserialize;
use uuid::Uuid;

use crate::http::response::{bad_session_id, conflict, immutable, internal_error, not_found, payload_too_large, validation_failed, HttpResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

fn parse_session_id(raw: &str) -> HttpResult<Uuid> {
    if !is_valid_uuid(raw) {
        return Err(bad_session_id(format!("{raw:?} is not a valid session id")));
    }
    raw.parse().map_err(|_| bad_session_id(format!("{raw:?} is not a valid session id")))
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Response {
    if let Some(err) = reject_oversized_body(&headers) {
        return err;
    }
    if let Some(name) = &body.name {
        if let Err(reason) = sequencer_model::validate::validate_session_name(Some(name.clone())) {
            return validation_failed("invalid session name", vec![reason]);
        }
    }

    match state.create_session(body.name) {
        Ok(session) => (StatusCode::CREATED, Json(SessionCreatedResponse::from(&session))).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.load_record(id) {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found(format!("no session with id {id}")).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceSessionRequest {
    pub state: sequencer_protocol::SessionState,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn replace_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ReplaceSessionRequest>,
) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Some(err) = reject_oversized_body(&headers) {
        return err;
    }

    let name = match body.name {
        Some(name) => match sequencer_model::validate::validate_session_name(Some(name)) {
            Ok(sanitized) => Some(sanitized),
            Err(reason) => return validation_failed("invalid session name", vec![reason]).into_response(),
        },
        None => None,
    };

    // Route through the live actor when one exists (§5: the engine owns
    // `SessionState` exclusively, so a direct store write here would race
    // its own write-through persistence). Falls back to a direct store
    // round-trip for sessions with no attached clients.
    let engine = match state.get_or_spawn_engine(id).await {
        Ok(engine) => engine,
        Err(err) => return internal_error(err).into_response(),
    };
    let Some(engine) = engine else {
        return not_found(format!("no session with id {id}")).into_response();
    };

    match engine.replace_state(body.state, name).await {
        Some(Ok(session)) => Json(session).into_response(),
        Some(Err(reason)) if reason.contains("published") => immutable(reason).into_response(),
        Some(Err(reason)) if reason.contains("durable write failed") || reason.contains("persistence task panicked") => {
            internal_error(reason).into_response()
        }
        Some(Err(reason)) => validation_failed("session state failed validation after repair", vec![reason]).into_response(),
        None => internal_error("engine did not reply to replace").into_response(),
    }
}

pub async fn remix_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.remix_session(id) {
        Ok(Some(remix)) => (StatusCode::CREATED, Json(SessionCreatedResponse::from(&remix))).into_response(),
        Ok(None) => not_found(format!("no session with id {id}")).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub async fn publish_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let engine = match state.get_or_spawn_engine(id).await {
        Ok(Some(engine)) => engine,
        Ok(None) => return not_found(format!("no session with id {id}")).into_response(),
        Err(err) => return internal_error(err).into_response(),
    };
    match state.load_record(id) {
        Ok(Some(session)) if session.immutable => return conflict("session is already published").into_response(),
        Ok(None) => return not_found(format!("no session with id {id}")).into_response(),
        Err(err) => return internal_error(err).into_response(),
        _ => {}
    }
    match engine.publish().await {
        Some(session) => Json(session).into_response(),
        None => internal_error("engine did not reply to publish").into_response(),
    }
}

fn reject_oversized_body(headers: &HeaderMap) -> Option<Response> {
    let content_length = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())?;
    if !is_body_size_valid(content_length) {
        return Some(payload_too_large(format!("body exceeds {MAX_MESSAGE_SIZE} bytes")).into_response());
    }
    None
}

#[derive(serde::Serialize)]
struct SessionCreatedResponse {
    id: String,
    url: String,
}

impl SessionCreatedResponse {
    fn from(session: &Session) -> Self {
        Self { id: session.id.clone(), url: format!("/s/{}", session.id) }
    }
}

const CRAWLER_USER_AGENTS: &[&str] = &[
    "facebookexternalhit",
    "facebot",
    "twitterbot",
    "linkedinbot",
    "discordbot",
    "slackbot",
    "whatsapp",
    "telegrambot",
];

fn is_crawler(headers: &HeaderMap) -> bool {
    let Some(ua) = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let lower = ua.to_lowercase();
    CRAWLER_USER_AGENTS.iter().any(|needle| lower.contains(needle))
}

/// Escapes a string for safe embedding inside an HTML attribute value.
/// Order matters: `&` must go first or later replacements double-escape.
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

pub async fn session_landing_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(session_id) = parse_session_id(&id) else {
        return (StatusCode::NOT_FOUND, Html(app_shell_html(None))).into_response();
    };

    let session = match state.load_record(session_id) {
        Ok(Some(session)) => session,
        Ok(None) => return (StatusCode::NOT_FOUND, Html(app_shell_html(None))).into_response(),
        Err(err) => return internal_error(err).into_response(),
    };

    if !is_crawler(&headers) {
        return Html(app_shell_html(None)).into_response();
    }
    Html(app_shell_html(Some(&session))).into_response()
}

fn app_shell_html(session: Option<&Session>) -> String {
    let Some(session) = session else {
        return "<!DOCTYPE html><html><head><title>session</title></head><body></body></html>".to_owned();
    };

    let title = escape_html(session.name.as_deref().unwrap_or("Untitled session"));
    let track_count = session.state.tracks.len();
    let description = escape_html(&format!("A {track_count}-track collaborative session, {} BPM", session.state.tempo));
    let url = escape_html(&format!("/s/{}", session.id));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<meta property="og:title" content="{title}">
<meta property="og:description" content="{description}">
<meta property="og:url" content="{url}">
<meta name="twitter:card" content="summary">
<meta name="twitter:title" content="{title}">
<meta name="twitter:description" content="{description}">
<script type="application/ld+json">{{"@context":"https://schema.org","@type":"CreativeWork","name":"{title}"}}</script>
</head>
<body></body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_escapes_ampersand_before_quotes_and_brackets() {
        assert_eq!(escape_html(r#"<a href="x">Tom & Jerry</a>"#), "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&lt;/a&gt;");
    }

    #[test]
    fn is_crawler_matches_known_bots_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, "Mozilla/5.0 (compatible; Discordbot/2.0)".parse().unwrap());
        assert!(is_crawler(&headers));
    }

    #[test]
    fn is_crawler_rejects_ordinary_browsers() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, "Mozilla/5.0 (Macintosh)".parse().unwrap());
        assert!(!is_crawler(&headers));
    }

    #[test]
    fn app_shell_html_escapes_a_malicious_session_name() {
        let mut session = Session {
            id: Uuid::new_v4().to_string(),
            created_at: 0,
            updated_at: 0,
            last_accessed_at: 0,
            name: Some(r#"<script>alert(1)</script>"#.to_owned()),
            remixed_from: None,
            remixed_from_name: None,
            remix_count: 0,
            immutable: false,
            state: sequencer_protocol::SessionState::default(),
        };
        let html = app_shell_html(Some(&session));
        assert!(!html.contains("<script>alert"));
        session.name = None;
    }
}
