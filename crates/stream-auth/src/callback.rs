//! Publish/unpublish callbacks sent by media servers.
//!
//! Two request dialects are understood:
//!
//! - SRS posts JSON (`Content-Type: application/json`) with `action`,
//!   `app`, `stream` and a `param` query string carrying `auth`;
//! - nginx-rtmp and srtrelay post an urlencoded form with `app`, `name`
//!   and `auth`.
//!
//! The response body is `0` on success, which SRS requires.

use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::store::{AuthOutcome, Store};

/// Which callback a request was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Publish,
    Unpublish,
}

impl CallbackKind {
    /// The SRS `action` value for this callback.
    pub fn srs_action(&self) -> &'static str {
        match self {
            Self::Publish => "on_publish",
            Self::Unpublish => "on_unpublish",
        }
    }
}

/// Stream coordinates and credential extracted from a callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    pub app: String,
    pub name: String,
    pub auth: String,
}

/// What to answer the media server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResponse {
    Accepted,
    Unauthorized,
}

impl CallbackResponse {
    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Accepted => 200,
            Self::Unauthorized => 401,
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            Self::Accepted => "0",
            Self::Unauthorized => "401 Unauthorized",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SrsCallback {
    action: String,
    app: String,
    stream: String,
    param: String,
}

/// Parse a callback body according to its content type.
///
/// # Errors
///
/// Returns `StoreError::InvalidCallback` for malformed JSON or an SRS
/// `action` that does not match `kind`.
pub fn parse_request(content_type: &str, body: &[u8], kind: CallbackKind) -> Result<PublishRequest> {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if media_type.eq_ignore_ascii_case("application/json") {
        parse_srs(body, kind)
    } else {
        Ok(parse_form(body))
    }
}

fn parse_srs(body: &[u8], kind: CallbackKind) -> Result<PublishRequest> {
    let callback: SrsCallback = serde_json::from_slice(body)
        .map_err(|e| StoreError::InvalidCallback(format!("malformed SRS body: {e}")))?;

    if callback.action != kind.srs_action() {
        return Err(StoreError::InvalidCallback(format!(
            "invalid action {}",
            callback.action
        )));
    }

    let query = callback.param.strip_prefix('?').unwrap_or(&callback.param);
    let auth = first_value(query.as_bytes(), "auth");

    Ok(PublishRequest {
        app: callback.app,
        name: callback.stream,
        auth,
    })
}

fn parse_form(body: &[u8]) -> PublishRequest {
    PublishRequest {
        app: first_value(body, "app"),
        name: first_value(body, "name"),
        auth: first_value(body, "auth"),
    }
}

/// First value for `key` in an urlencoded string, or empty.
fn first_value(encoded: &[u8], key: &str) -> String {
    url::form_urlencoded::parse(encoded)
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Authorize a publish and mark the stream active on success.
///
/// Store failures deny the publish; their details stay in the log.
pub async fn handle_publish(store: &Store, request: &PublishRequest) -> CallbackResponse {
    let PublishRequest { app, name, auth } = request;
    log::info!("publish {app}/{name}");

    let decision = match store.auth(app, name, auth).await {
        Ok(decision) => decision,
        Err(e) => {
            log::warn!("Publish {app}/{name} failed: {e}");
            return CallbackResponse::Unauthorized;
        }
    };

    let id = match (decision.outcome, decision.stream_id) {
        (AuthOutcome::Allowed, Some(id)) => id,
        (outcome, id) => {
            let id = id.map(|id| id.to_string()).unwrap_or_default();
            log::info!("Publish {id} {app}/{name} unauthorized ({outcome:?})");
            return CallbackResponse::Unauthorized;
        }
    };

    match store.set_active(&id).await {
        Ok(true) => {
            log::info!("Publish {id} {app}/{name} ok");
            CallbackResponse::Accepted
        }
        Ok(false) => {
            log::info!("Publish {id} {app}/{name} unauthorized (removed or already live)");
            CallbackResponse::Unauthorized
        }
        Err(e) => {
            log::warn!("Publish {id} {app}/{name} failed to mark active: {e}");
            CallbackResponse::Unauthorized
        }
    }
}

/// Clear the active flag of `app/name`.
///
/// Always accepted: the publisher is gone either way.
pub async fn handle_unpublish(store: &Store, request: &PublishRequest) -> CallbackResponse {
    let PublishRequest { app, name, .. } = request;
    match store.set_inactive(app, name).await {
        Ok(_) => log::info!("Unpublish {app}/{name} ok"),
        Err(e) => log::warn!("Unpublish {app}/{name} failed: {e}"),
    }
    CallbackResponse::Accepted
}
