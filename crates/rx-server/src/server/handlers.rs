//! Route handlers

use std::convert::Infallible;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderMap},
    response::Response,
    Json,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

use rx_core::transfer::{pack_tar, unpack_tar};
use rx_core::TransferError;
use rx_protocol::envelope;
use rx_protocol::{
    encode_output_line, DownloadQuery, EncryptedEnvelope, ExecRequest, ExitStatus, KillRequest,
    KillResponse, TokenRequest, TokenResponse, UploadAck, BASE_PATH_HEADER, PROCESS_ID_HEADER,
};

use super::ApiError;
use crate::auth::{authenticate, request_new_session};
use crate::executor::RunningProcess;
use crate::session::Session;
use crate::state::ServerState;

/// Size of the pipe between the tar packer and the response body
const DOWNLOAD_PIPE_BYTES: usize = 64 * 1024;

/// Extractor for the session named by the bearer credential
pub struct AuthSession(pub Arc<Session>);

#[async_trait]
impl FromRequestParts<Arc<ServerState>> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Ok(AuthSession(authenticate(state, header)?))
    }
}

pub(super) async fn health() -> &'static str {
    "ok"
}

pub(super) async fn token(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let (_, response) = request_new_session(&state, &request)?;
    Ok(Json(response))
}

pub(super) async fn exec(
    State(state): State<Arc<ServerState>>,
    AuthSession(session): AuthSession,
    Json(body): Json<EncryptedEnvelope>,
) -> Result<Response, ApiError> {
    let request: ExecRequest = envelope::unwrap(&session.token, &body)?;
    let executor = state.executors.get(&request.executor)?;

    tracing::info!(
        "Session {} exec {:?} {:?} via {}",
        session.id,
        request.exe,
        request.args,
        request.executor
    );
    let process = executor.spawn(&request.exe, &request.args).await?;
    state.processes.track(&process);
    let pid = process.pid;

    Response::builder()
        .header(PROCESS_ID_HEADER, pid)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(output_stream(process)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Output lines followed by the exit trailer.
///
/// Dropping the stream before the trailer is sent kills the process.
fn output_stream(process: RunningProcess) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let guard = process.kill_token().drop_guard();

    futures::stream::unfold(Some((process, guard)), |state| async move {
        let (mut process, guard) = state?;
        match process.lines.recv().await {
            Some(line) => Some((
                Ok(Bytes::from(encode_output_line(&line))),
                Some((process, guard)),
            )),
            None => {
                let status = process.exit.await.unwrap_or(ExitStatus::Signal);
                guard.disarm();
                let mut trailer = status.to_trailer();
                trailer.push('\n');
                Some((Ok(Bytes::from(trailer)), None))
            }
        }
    })
}

pub(super) async fn kill(
    State(state): State<Arc<ServerState>>,
    AuthSession(session): AuthSession,
    Json(body): Json<EncryptedEnvelope>,
) -> Result<Json<KillResponse>, ApiError> {
    let request: KillRequest = envelope::unwrap(&session.token, &body)?;
    let killed = state.processes.kill(request.pid);

    tracing::info!(
        "Session {} kill {}: {}",
        session.id,
        request.pid,
        if killed { "killed" } else { "not running" }
    );
    Ok(Json(KillResponse {
        pid: request.pid,
        killed,
    }))
}

pub(super) async fn upload_tar(
    AuthSession(session): AuthSession,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadAck>, ApiError> {
    let base = headers
        .get(BASE_PATH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", BASE_PATH_HEADER)))?;

    tracing::info!("Session {} upload into {:?}", session.id, base);

    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(stream));
    let ack = tokio::task::spawn_blocking(move || unpack_tar(reader, &base))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(ack))
}

pub(super) async fn download_tar(
    AuthSession(session): AuthSession,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let dir = PathBuf::from(&query.dir);
    match tokio::fs::metadata(&dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(ApiError::NotFound(query.dir)),
    }

    tracing::info!(
        "Session {} download {:?} (pattern {:?})",
        session.id,
        dir,
        query.pattern
    );

    let (writer, reader) = tokio::io::duplex(DOWNLOAD_PIPE_BYTES);
    let writer = SyncIoBridge::new(writer);
    let pattern = query.pattern;
    let (done_tx, done_rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let packed = pack_tar(writer, &dir, pattern.as_deref());
        if let Err(e) = &packed {
            tracing::warn!("Packing {:?} failed: {}", dir, e);
        }
        let _ = done_tx.send(packed);
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-tar")
        .body(Body::from_stream(tar_body(reader, done_rx)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Archive bytes followed by an error item if packing failed, so the
/// response is aborted instead of ending cleanly
fn tar_body<R>(
    reader: R,
    done: oneshot::Receiver<Result<u64, TransferError>>,
) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    R: AsyncRead + Send,
{
    let outcome = futures::stream::once(async move {
        match done.await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(Err(io::Error::other(e.to_string()))),
            Err(_) => Some(Err(io::Error::other("archive task stopped"))),
        }
    })
    .filter_map(futures::future::ready);

    ReaderStream::new(reader).chain(outcome)
}
