//! Pass-through to the external chat assistant service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::auth::BearerToken;
use crate::errors::ApiError;
use crate::server::AppState;

const TEMPERATURE: f64 = 0.7;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "memoryId", default)]
    pub memory_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
struct AssistantRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    session_id: &'a str,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct AssistantResponse {
    success: bool,
    #[serde(default)]
    data: Option<HashMap<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    pub data: Option<HashMap<String, Value>>,
}

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    pub fn new(service_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", service_url.trim_end_matches('/')),
        })
    }

    async fn forward(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let payload = AssistantRequest {
            message: &request.message,
            session_id: &request.memory_id,
            temperature: TEMPERATURE,
        };

        info!(url = %self.endpoint, "forwarding chat request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                error!(url = %self.endpoint, error = %err, "chat service unreachable");
                ApiError::Unavailable("Chat service temporarily unavailable")
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read chat service response");
            ApiError::Internal("Internal server error")
        })?;

        if status != reqwest::StatusCode::OK {
            error!(
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "chat service returned error"
            );
            return Err(ApiError::Internal("Failed to generate response"));
        }

        let parsed: AssistantResponse = serde_json::from_slice(&body).map_err(|err| {
            error!(error = %err, "failed to parse chat service response");
            ApiError::Internal("Internal server error")
        })?;

        if !parsed.success {
            error!(error = ?parsed.error, "chat service reported failure");
            return Err(ApiError::Internal("Failed to generate response"));
        }

        Ok(ChatResponse {
            success: true,
            data: parsed.data,
        })
    }
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    BearerToken(username): BearerToken,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) if !request.memory_id.is_empty() && !request.message.is_empty() => {
            request
        }
        Ok(_) => {
            warn!(username = %username, "chat request missing fields");
            return Err(ApiError::bad_request("Invalid request body"));
        }
        Err(rejection) => {
            warn!(username = %username, error = %rejection, "failed to parse chat request");
            return Err(ApiError::invalid_body(&rejection));
        }
    };

    info!(username = %username, memory_id = %request.memory_id, "received chat request");

    let response = state.chat.forward(&request).await?;

    info!(memory_id = %request.memory_id, "chat request processed");
    Ok(Json(response))
}
