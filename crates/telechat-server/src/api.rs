//! HTTP facade.
//!
//! `POST /chat` publishes as the `web` pseudo client, `GET /chat` reads the
//! stored history and `GET /health` reports liveness.

use crate::metrics;
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use telechat_core::{
    ChatMessage, ChatRecord, DistributionError, Distributor, HistoryQuery, MessageKind,
    StoreError, WEB_CLIENT_NAME,
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Keys accepted by `POST /chat`.
const POST_KEYS: &[&str] = &["channel", "message"];

/// Keys accepted by `GET /chat`.
const GET_KEYS: &[&str] = &[
    "id",
    "user",
    "channel",
    "message",
    "recipient",
    "message_type",
    "limit",
];

/// HTTP facade errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A key outside the accepted set.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// A required key is absent.
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A value could not be parsed.
    #[error("Invalid {0}: {1:?}")]
    InvalidParameter(&'static str, String),

    /// Nobody to deliver to.
    #[error(transparent)]
    Distribution(#[from] DistributionError),

    /// History could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownParameter(_) | Self::MissingParameter(_) | Self::InvalidParameter(..) => {
                StatusCode::BAD_REQUEST
            }
            Self::Distribution(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            metrics::record_error("http");
        } else {
            debug!(error = %self, "Rejected request");
        }

        let body = match status {
            StatusCode::BAD_REQUEST => "400 Bad Request",
            _ => "500 Internal Server Error",
        };
        (status, body).into_response()
    }
}

/// Build the facade's routes.
pub fn router(distributor: Arc<Distributor>) -> Router {
    Router::new()
        .route("/chat", get(get_chat).post(post_chat))
        .route("/health", get(health_handler))
        .with_state(distributor)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn check_keys(params: &HashMap<String, String>, accepted: &[&str]) -> Result<(), ApiError> {
    match params.keys().find(|key| !accepted.contains(&key.as_str())) {
        Some(key) => Err(ApiError::UnknownParameter(key.clone())),
        None => Ok(()),
    }
}

fn parse_param<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ApiError> {
    params
        .get(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ApiError::InvalidParameter(key, value.clone()))
        })
        .transpose()
}

/// Publish a message from the web pseudo client.
async fn post_chat(
    State(distributor): State<Arc<Distributor>>,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    check_keys(&params, POST_KEYS)?;
    let text = params
        .get("message")
        .ok_or(ApiError::MissingParameter("message"))?;
    let channel: Option<u32> = parse_param(&params, "channel")?;

    let msg = ChatMessage::new(WEB_CLIENT_NAME, text.clone());
    let started = Instant::now();
    let (kind, result) = match channel {
        Some(channel) => (
            MessageKind::Channel,
            distributor.publish_channel(&msg, channel).await,
        ),
        None => (
            MessageKind::Broadcast,
            distributor.publish_broadcast(&msg).await,
        ),
    };
    metrics::record_publish(kind, started, &result);

    if let Err(e) = &result {
        warn!(kind = %kind, error = %e, "Web publish failed");
    }
    result?;

    Ok(Json(json!({ "success": "successfully submitted message" })))
}

/// Read stored chat history.
async fn get_chat(
    State(distributor): State<Arc<Distributor>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ChatRecord>>, ApiError> {
    check_keys(&params, GET_KEYS)?;

    let message_type = params
        .get("message_type")
        .map(|value| {
            MessageKind::parse(value)
                .ok_or_else(|| ApiError::InvalidParameter("message_type", value.clone()))
        })
        .transpose()?;

    let query = HistoryQuery {
        id: parse_param(&params, "id")?,
        user: params.get("user").cloned(),
        channel: parse_param(&params, "channel")?,
        message: params.get("message").cloned(),
        recipient: params.get("recipient").cloned(),
        message_type,
        limit: parse_param(&params, "limit")?,
    };

    let records = distributor.store().history(&query).await?;
    Ok(Json(records))
}
