use serde::{Deserialize, Serialize};

use crate::broker::Envelope;

/// Body of `POST /message`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResponse {
    pub success: bool,
    pub message: String,
    pub data: Envelope,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub rabbitmq: bool,
    pub circuit: String,
}
