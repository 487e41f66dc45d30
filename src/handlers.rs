use crate::auth::{hash_password, issue_token, verify_password, AuthError, BearerToken};
use crate::errors::ApiError;
use crate::models::{Credentials, FileRecord, LoginResponse, PlayResponse, RegisterResponse};
use crate::server::AppState;
use crate::upload::resolve_user;
use crate::users::UserStoreError;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

fn credentials(payload: Result<Json<Credentials>, JsonRejection>) -> Result<Credentials, ApiError> {
    match payload {
        Ok(Json(creds)) if creds.is_complete() => Ok(creds),
        Ok(_) => Err(ApiError::bad_request("Invalid request body")),
        Err(rejection) => {
            warn!(error = %rejection, "failed to parse credentials");
            Err(ApiError::invalid_body(&rejection))
        }
    }
}

pub async fn register_user(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Credentials { username, password } = credentials(payload)?;

    match state.users.exists(&username).await {
        Ok(false) => {}
        Ok(true) => {
            warn!(username = %username, "username already exists");
            return Err(ApiError::bad_request("username already exists"));
        }
        Err(err) => {
            error!(username = %username, error = %err, "failed to check user existence");
            return Err(ApiError::Internal("Failed to register user"));
        }
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| err.to_string())
        .and_then(|hashed| hashed.map_err(|err| err.to_string()))
        .map_err(|err| {
            error!(error = %err, "failed to hash password");
            ApiError::Internal("Failed to register user")
        })?;

    match state.users.create(&username, &password_hash).await {
        Ok(uid) => {
            info!(username = %username, uid, "user registered");
            Ok(Json(RegisterResponse {
                message: "User registered successfully".to_string(),
                username,
            }))
        }
        // Lost a race with a concurrent registration of the same name.
        Err(UserStoreError::DuplicateUser) => {
            warn!(username = %username, "username already exists");
            Err(ApiError::bad_request("username already exists"))
        }
        Err(err) => {
            error!(username = %username, error = %err, "failed to create user");
            Err(ApiError::Internal("Failed to register user"))
        }
    }
}

pub async fn login_user(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Credentials { username, password } = credentials(payload)?;
    let invalid = || ApiError::Unauthorized(AuthError::InvalidCredentials);

    let user = match state.users.get_by_username(&username).await {
        Ok(user) => user,
        Err(UserStoreError::NotFound) => {
            warn!(username = %username, "login for unknown user");
            return Err(invalid());
        }
        Err(err) => {
            error!(username = %username, error = %err, "failed to load user");
            return Err(ApiError::Internal("Failed to authenticate user"));
        }
    };

    let stored_hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|err| {
            error!(error = %err, "password verification task failed");
            ApiError::Internal("Failed to authenticate user")
        })?;

    match verified {
        Ok(true) => {
            info!(username = %user.username, uid = user.uid, "user logged in");
            Ok(Json(LoginResponse {
                message: "Login successful".to_string(),
                token: issue_token(&user.username),
                username: user.username,
            }))
        }
        Ok(false) => {
            warn!(username = %username, "wrong password");
            Err(invalid())
        }
        Err(err) => {
            error!(username = %username, error = %err, "stored password hash is malformed");
            Err(ApiError::Internal("Failed to authenticate user"))
        }
    }
}

/// Metadata records owned by the caller.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    BearerToken(username): BearerToken,
) -> Result<Json<Vec<FileRecord>>, ApiError> {
    let user = resolve_user(&state, &username).await?;
    let files = state.files.list_for_user(user.uid).await.map_err(|err| {
        error!(uid = user.uid, error = %err, "failed to list files");
        ApiError::Internal("Failed to fetch files")
    })?;
    Ok(Json(files))
}

pub async fn play_video(Path(video_id): Path<String>) -> Json<PlayResponse> {
    info!(video_id = %video_id, "playing video");
    Json(PlayResponse {
        message: "Playing video".to_string(),
        video_id,
    })
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
