//! Router construction and shared state.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::chat::{self, ChatClient};
use crate::errors::internal_error_response;
use crate::files::FileStore;
use crate::handlers;
use crate::storage::ObjectStore;
use crate::upload::{self, UploadPolicy};
use crate::users::UserStore;

/// Everything the handlers need, constructed once in `main`.
pub struct AppState {
    pub users: UserStore,
    pub files: FileStore,
    pub storage: Arc<dyn ObjectStore>,
    pub upload: UploadPolicy,
    pub spool_dir: Option<PathBuf>,
    pub chat: ChatClient,
}

pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/register", post(handlers::register_user))
        .route("/login", post(handlers::login_user))
        // The upload path enforces its own size limit while streaming.
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/files", get(handlers::list_files))
        .route("/play/:video_id", get(handlers::play_video))
        .route("/chat", post(chat::chat));

    let router = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .with_state(state);

    with_middleware(router)
}

/// Panic recovery inside request tracing, so recovered panics are still
/// logged against their request span.
pub fn with_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        )
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "panic recovered");
    internal_error_response()
}
