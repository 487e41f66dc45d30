//! Authenticated upload pipeline.
//!
//! A request moves through authenticate → resolve identity → validate →
//! store → record. Any failure ends the request; a failure while recording
//! leaves the stored object behind without a metadata row, which is logged
//! as an orphan.

use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::auth::{AuthError, BearerToken};
use crate::config::UploadConfig;
use crate::errors::ApiError;
use crate::models::{UploadResponse, User};
use crate::server::AppState;
use crate::users::UserStoreError;

/// Multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

const OCTET_STREAM: &str = "application/octet-stream";

/// Size and extension limits applied to every upload.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_size: u64,
    allowed_types: Vec<String>,
}

impl UploadPolicy {
    pub fn new(max_size: u64, allowed_types: &[String]) -> Self {
        Self {
            max_size,
            allowed_types: allowed_types.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_size, &config.allowed_types)
    }

    /// Exact, case-insensitive match of the extension (with its dot).
    pub fn is_allowed(&self, filename: &str) -> bool {
        let ext = extension(filename);
        !ext.is_empty() && self.allowed_types.iter().any(|t| *t == ext)
    }
}

/// Lowercased extension including the leading dot, or `""`.
pub fn extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => filename[idx..].to_lowercase(),
        None => String::new(),
    }
}

/// Client-declared type first, then the extension table, then octet-stream.
pub fn resolve_content_type(declared: Option<&str>, filename: &str) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|d| !d.is_empty()) {
        return declared.to_string();
    }
    mime_guess::from_path(filename)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Objects are namespaced by owner so equal filenames never collide across users.
pub fn object_key(uid: i64, filename: &str) -> String {
    format!("uid_{uid}/{filename}")
}

/// Keep only the final path component of a client-supplied filename.
fn base_name(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[derive(Debug, Error)]
enum SpoolError {
    #[error("file exceeds {0} bytes")]
    TooLarge(u64),
    #[error("failed to read multipart body: {0}")]
    Body(#[from] MultipartError),
    #[error("failed to write spool file: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload body parked on disk; removed when dropped.
struct SpooledFile {
    file: NamedTempFile,
    size: u64,
}

/// Copy the field into a temp file chunk by chunk, stopping as soon as the
/// running size passes `max_size`.
async fn spool_field(
    mut field: Field<'_>,
    max_size: u64,
    dir: Option<&Path>,
) -> Result<SpooledFile, SpoolError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("upload-");
    let file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    let mut writer = tokio::fs::File::from_std(file.as_file().try_clone()?);

    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > max_size {
            return Err(SpoolError::TooLarge(max_size));
        }
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;

    Ok(SpooledFile { file, size })
}

/// A validated file part, ready to be stored.
struct AcceptedFile {
    filename: String,
    declared_type: Option<String>,
    body: SpooledFile,
}

async fn read_file_part(
    multipart: &mut Multipart,
    policy: &UploadPolicy,
    spool_dir: Option<&Path>,
) -> Result<AcceptedFile, ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::bad_request("No file provided")),
            Err(err) => {
                warn!(error = %err, "failed to read multipart body");
                return Err(ApiError::bad_request("No file provided"));
            }
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .and_then(base_name)
            .ok_or_else(|| ApiError::bad_request("No file provided"))?;

        if !policy.is_allowed(&filename) {
            warn!(filename = %filename, extension = %extension(&filename), "file type not allowed");
            return Err(ApiError::bad_request("File type not allowed"));
        }

        let declared_type = field.content_type().map(str::to_string);

        let body = match spool_field(field, policy.max_size, spool_dir).await {
            Ok(body) => body,
            Err(SpoolError::TooLarge(max)) => {
                warn!(filename = %filename, max_size = max, "file size exceeds limit");
                return Err(ApiError::bad_request(format!(
                    "File size exceeds limit of {max} bytes"
                )));
            }
            Err(SpoolError::Body(err)) => {
                warn!(filename = %filename, error = %err, "upload body interrupted");
                return Err(ApiError::bad_request("Failed to read uploaded file"));
            }
            Err(err @ SpoolError::Io(_)) => {
                error!(filename = %filename, error = %err, "failed to spool upload");
                return Err(ApiError::Internal("Failed to process uploaded file"));
            }
        };

        return Ok(AcceptedFile {
            filename,
            declared_type,
            body,
        });
    }
}

/// Map the token's username to a stored user. Unknown users are treated as
/// unauthenticated.
pub async fn resolve_user(state: &AppState, username: &str) -> Result<User, ApiError> {
    match state.users.get_by_username(username).await {
        Ok(user) => Ok(user),
        Err(UserStoreError::NotFound) => {
            warn!(username, "token for unknown user");
            Err(AuthError::UnknownUser.into())
        }
        Err(err) => {
            error!(username, error = %err, "failed to look up user");
            Err(ApiError::Internal("Failed to resolve user"))
        }
    }
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    BearerToken(username): BearerToken,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let user = resolve_user(&state, &username).await?;

    let mut multipart = multipart.map_err(|rejection| {
        warn!(uid = user.uid, error = %rejection, "upload is not a multipart request");
        ApiError::bad_request("No file provided")
    })?;

    let accepted =
        read_file_part(&mut multipart, &state.upload, state.spool_dir.as_deref()).await?;
    let AcceptedFile {
        filename,
        declared_type,
        body,
    } = accepted;

    let key = object_key(user.uid, &filename);
    let content_type = resolve_content_type(declared_type.as_deref(), &filename);

    let url = state
        .storage
        .upload(&key, body.file.path(), body.size, &content_type)
        .await
        .map_err(|err| {
            error!(uid = user.uid, key = %key, error = %err, "failed to upload to object storage");
            ApiError::Internal("Failed to upload to object storage")
        })?;

    if let Err(err) = state.files.record(user.uid, &filename, &url).await {
        error!(
            uid = user.uid,
            key = %key,
            url = %url,
            error = %err,
            "orphaned object: stored without a metadata record"
        );
        return Err(ApiError::Internal("Failed to record file metadata"));
    }

    info!(
        uid = user.uid,
        filename = %filename,
        size = body.size,
        url = %url,
        "file uploaded"
    );

    Ok(Json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        filename,
        size: body.size,
        url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{multipart_body, register, send, TestApp, BOUNDARY};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};

    fn upload_request(
        token: Option<&str>,
        filename: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Request<Body> {
        let mut builder = Request::post("/api/v1/upload").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, token);
        }
        builder
            .body(Body::from(multipart_body(FILE_FIELD, filename, content_type, data)))
            .unwrap()
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.TXT"), ".txt");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("README"), "");
        assert_eq!(extension(".png"), ".png");
    }

    #[test]
    fn test_policy_case_insensitive() {
        let policy = UploadPolicy::new(10, &[".TXT".to_string(), ".png".to_string()]);
        assert!(policy.is_allowed("notes.txt"));
        assert!(policy.is_allowed("IMAGE.PNG"));
        assert!(!policy.is_allowed("run.exe"));
        assert!(!policy.is_allowed("txt"));
        assert!(!policy.is_allowed("file.txt.exe"));
    }

    #[test]
    fn test_resolve_content_type() {
        assert_eq!(resolve_content_type(Some("image/webp"), "a.png"), "image/webp");
        assert_eq!(resolve_content_type(None, "a.png"), "image/png");
        assert_eq!(resolve_content_type(Some("  "), "a.txt"), "text/plain");
        assert_eq!(resolve_content_type(None, "a.unknownext"), OCTET_STREAM);
        assert_eq!(resolve_content_type(None, "noext"), OCTET_STREAM);
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key(7, "a.txt"), "uid_7/a.txt");
        assert_ne!(object_key(1, "F.txt"), object_key(2, "F.txt"));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a.txt").as_deref(), Some("a.txt"));
        assert_eq!(base_name("../../etc/passwd.txt").as_deref(), Some("passwd.txt"));
        assert_eq!(base_name("C:\\Users\\me\\a.png").as_deref(), Some("a.png"));
        assert_eq!(base_name("dir/"), None);
        assert_eq!(base_name(".."), None);
        assert_eq!(base_name(""), None);
    }

    #[tokio::test]
    async fn test_upload_happy_path_round_trip() {
        let app = TestApp::new(1024 * 1024, &[".txt", ".png"]);
        let uid = register(&app, "alice", "secret123").await;

        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "hello.txt", Some("text/plain"), b"0123456789"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["message"], "File uploaded successfully");
        assert_eq!(body["filename"], "hello.txt");
        assert_eq!(body["size"], 10);
        let url = body["url"].as_str().unwrap();
        assert!(url.contains(&format!("uid_{uid}/hello.txt")), "{url}");

        let object = app.store.get_by_url(url).unwrap();
        assert_eq!(object.data, b"0123456789");
        assert_eq!(object.content_type, "text/plain");

        let records = app.state.files.list_for_user(uid).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_url, url);
    }

    #[tokio::test]
    async fn test_content_type_inferred_from_extension() {
        let app = TestApp::new(1024, &[".png"]);
        register(&app, "alice", "secret123").await;
        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "pic.PNG", None, b"\x89PNG"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let object = app.store.get_by_url(body["url"].as_str().unwrap()).unwrap();
        assert_eq!(object.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_missing_or_malformed_auth_is_401_without_io() {
        let app = TestApp::new(1024, &[".txt"]);
        register(&app, "alice", "secret123").await;

        for (token, message) in [
            (None, "Authorization header is required"),
            (Some("token_alice"), "Invalid authorization header format"),
            (Some("Bearer alice"), "Invalid token"),
            (Some("Bearer token_ghost"), "Invalid user"),
            (Some("Bearer token_"), "Invalid user"),
        ] {
            let (status, body) =
                send(&app.router(), upload_request(token, "a.txt", None, b"abc")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{token:?}");
            assert_eq!(body["error"], message);
        }
        assert_eq!(app.store.upload_calls(), 0);
        assert_eq!(app.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_oversize_rejected_before_storage() {
        let app = TestApp::new(1024 * 1024, &[".txt", ".png"]);
        register(&app, "alice", "secret123").await;
        let data = vec![b'x'; 2 * 1024 * 1024];
        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "big.txt", None, &data),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "File size exceeds limit of 1048576 bytes");
        assert_eq!(app.store.upload_calls(), 0);
        assert_eq!(app.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_exactly_max_size_accepted() {
        let app = TestApp::new(16, &[".txt"]);
        register(&app, "alice", "secret123").await;
        let (status, _) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "a.txt", None, &[b'x'; 16]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disallowed_extension_rejected() {
        let app = TestApp::new(1024 * 1024, &[".txt", ".png"]);
        register(&app, "alice", "secret123").await;
        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "setup.exe", None, b"MZ"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "File type not allowed");
        assert_eq!(app.store.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_part() {
        let app = TestApp::new(1024, &[".txt"]);
        register(&app, "alice", "secret123").await;
        let request = Request::post("/api/v1/upload")
            .header(header::AUTHORIZATION, "Bearer token_alice")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body("other", "a.txt", None, b"abc")))
            .unwrap();
        let (status, body) = send(&app.router(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file provided");
    }

    fn json_upload(token: &str) -> Request<Body> {
        Request::post("/api/v1/upload")
            .header(header::AUTHORIZATION, token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"file":"a.txt"}"#))
            .unwrap()
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_json_400() {
        let app = TestApp::new(1024, &[".txt"]);
        register(&app, "alice", "secret123").await;
        let (status, body) = send(&app.router(), json_upload("Bearer token_alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file provided");
        assert_eq!(app.store.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_checked_before_content_type() {
        let app = TestApp::new(1024, &[".txt"]);
        let (status, body) = send(&app.router(), json_upload("Bearer token_ghost")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid user");
    }

    #[tokio::test]
    async fn test_upload_route_not_capped_by_default_body_limit() {
        let app = TestApp::new(4 * 1024 * 1024, &[".bin"]);
        register(&app, "alice", "secret123").await;
        let data = vec![7u8; 3 * 1024 * 1024];
        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "blob.bin", None, &data),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["size"], 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_store_failure_writes_no_record() {
        let app = TestApp::new(1024, &[".txt"]);
        register(&app, "alice", "secret123").await;
        app.store.set_unavailable(true);
        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "a.txt", None, b"abc"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to upload to object storage");
        assert_eq!(app.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_record_failure_leaves_object_and_returns_500() {
        let app = TestApp::new(1024, &[".txt"]);
        let uid = register(&app, "alice", "secret123").await;
        app.conn
            .lock()
            .await
            .execute("DROP TABLE minio_files", [])
            .unwrap();
        let (status, body) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "a.txt", None, b"abc"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to record file metadata");
        assert!(app.store.get(&object_key(uid, "a.txt")).is_some());
    }

    #[tokio::test]
    async fn test_users_do_not_collide_on_same_filename() {
        let app = TestApp::new(1024, &[".txt"]);
        let alice = register(&app, "alice", "secret123").await;
        let bob = register(&app, "bob", "hunter22").await;

        let (_, a) = send(
            &app.router(),
            upload_request(Some("Bearer token_alice"), "F.txt", None, b"alice"),
        )
        .await;
        let (_, b) = send(
            &app.router(),
            upload_request(Some("Bearer token_bob"), "F.txt", None, b"bob"),
        )
        .await;
        assert_ne!(a["url"], b["url"]);
        assert_eq!(app.store.get(&object_key(alice, "F.txt")).unwrap().data, b"alice");
        assert_eq!(app.store.get(&object_key(bob, "F.txt")).unwrap().data, b"bob");
        assert_eq!(app.state.files.list_for_user(alice).await.unwrap().len(), 1);
        assert_eq!(app.state.files.list_for_user(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_user_same_name_overwrites_object_and_appends_record() {
        let app = TestApp::new(1024, &[".txt"]);
        let uid = register(&app, "alice", "secret123").await;
        for data in [&b"first"[..], &b"second"[..]] {
            let (status, _) = send(
                &app.router(),
                upload_request(Some("Bearer token_alice"), "a.txt", None, data),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(app.store.get(&object_key(uid, "a.txt")).unwrap().data, b"second");
        assert_eq!(app.state.files.list_for_user(uid).await.unwrap().len(), 2);
    }
}
