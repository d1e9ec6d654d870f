use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lapin::Channel;
use tracing::{debug, error};

use crate::broker::channel::MessageChannel;
use crate::broker::circuit::CircuitMonitor;
use crate::client::Publisher;
use crate::transport::message::{ErrorResponse, HealthResponse, PublishRequest, PublishResponse};
use crate::utils::error::PublishError;

pub struct AppState<C = Channel> {
    pub publisher: Publisher<C>,
    pub circuit: CircuitMonitor,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
            circuit: self.circuit.clone(),
        }
    }
}

pub fn router<C: MessageChannel>(state: AppState<C>) -> Router {
    Router::new()
        .route("/message", post(publish_message::<C>))
        .route("/health", get(health::<C>))
        .with_state(state)
}

/// `POST /message`
pub async fn publish_message<C: MessageChannel>(
    State(state): State<AppState<C>>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Response {
    let raw = match body {
        Ok(Json(PublishRequest {
            message: Some(message),
        })) => message,
        Ok(_) => String::new(),
        Err(rejection) => {
            debug!(error = %rejection, "unreadable publish request");
            String::new()
        }
    };

    match state.publisher.publish(&raw).await {
        Ok(envelope) => (
            StatusCode::OK,
            Json(PublishResponse {
                success: true,
                message: "Message published successfully".to_string(),
                data: envelope,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &PublishError) -> Response {
    let (status, text) = match err {
        PublishError::Validation(v) => (StatusCode::BAD_REQUEST, v.to_string()),
        PublishError::Unavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Broker connection not available".to_string(),
        ),
        PublishError::Rejected | PublishError::Internal(_) => {
            error!(error = %err, "error publishing message");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to publish message".to_string(),
            )
        }
    };
    (status, Json(ErrorResponse::new(text))).into_response()
}

/// `GET /health`
pub async fn health<C: MessageChannel>(State(state): State<AppState<C>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        rabbitmq: state.publisher.is_available(),
        circuit: state.circuit.current().as_label().to_string(),
    })
}
