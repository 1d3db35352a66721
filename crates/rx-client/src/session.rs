//! An authenticated session and the operations it carries

use std::io;
use std::path::Path;

use futures::{StreamExt, TryStreamExt};
use reqwest::header::AUTHORIZATION;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

use rx_core::transfer::{pack_tar, receive_tar, DirectoryReceiver, TarReceiver};
use rx_core::TransferError;
use rx_protocol::envelope;
use rx_protocol::{
    DownloadQuery, ExecRequest, KillRequest, KillResponse, SessionId, SessionToken, UploadAck,
    VerifyingKey, BASE_PATH_HEADER, PROCESS_ID_HEADER,
};

use crate::error::{check_status, ClientError, ClientResult};
use crate::exec::ExecResponse;

/// Size of the pipe between the tar packer and the request body
const UPLOAD_PIPE_BYTES: usize = 64 * 1024;

/// A live session with a server
pub struct Session {
    http: reqwest::Client,
    base_url: String,
    id: SessionId,
    token: SessionToken,
    server_key: VerifyingKey,
}

impl Session {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: String,
        id: SessionId,
        token: SessionToken,
        server_key: VerifyingKey,
    ) -> Self {
        Self {
            http,
            base_url,
            id,
            token,
            server_key,
        }
    }

    /// Session id assigned by the server
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Key the server signed the handshake with
    pub fn server_key(&self) -> &VerifyingKey {
        &self.server_key
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/{}", self.base_url, path)
    }

    /// Start a remote process and stream its output
    pub async fn exec(&self, request: &ExecRequest) -> ClientResult<ExecResponse> {
        let body = envelope::wrap(&self.token, request)?;
        let response = self
            .http
            .post(self.url("exec"))
            .header(AUTHORIZATION, self.id.to_bearer())
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let pid = response
            .headers()
            .get(PROCESS_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or(ClientError::MissingProcessId)?;

        tracing::debug!("Remote process {} started", pid);
        Ok(ExecResponse::from_stream(pid, response.bytes_stream()))
    }

    /// Ask the server to kill a process
    pub async fn kill(&self, pid: u32) -> ClientResult<KillResponse> {
        let body = envelope::wrap(&self.token, &KillRequest { pid })?;
        let response = self
            .http
            .post(self.url("kill"))
            .header(AUTHORIZATION, self.id.to_bearer())
            .json(&body)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Pack `local_dir` and unpack it under `remote_dir` on the server
    pub async fn upload_dir(&self, local_dir: &Path, remote_dir: &str) -> ClientResult<UploadAck> {
        if !local_dir.is_dir() {
            return Err(TransferError::NotADirectory(local_dir.to_path_buf()).into());
        }

        let (writer, reader) = tokio::io::duplex(UPLOAD_PIPE_BYTES);
        let writer = SyncIoBridge::new(writer);
        let source = local_dir.to_path_buf();
        let packer = tokio::task::spawn_blocking(move || pack_tar(writer, &source, None));

        let response = self
            .http
            .post(self.url("upload-tar"))
            .header(AUTHORIZATION, self.id.to_bearer())
            .header(BASE_PATH_HEADER, remote_dir)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(reader)))
            .send()
            .await;

        let packed = packer.await.map_err(io::Error::from)?;
        let ack: UploadAck = check_status(response?).await?.json().await?;
        let files = packed?;
        tracing::debug!(
            "Uploaded {} files from {:?}: {} written, {} rejected",
            files,
            local_dir,
            ack.written,
            ack.rejected.len()
        );
        Ok(ack)
    }

    /// Download `remote_dir` as an archive and hand its entries to `receiver`
    pub async fn download_into<R>(
        &self,
        remote_dir: &str,
        pattern: Option<&str>,
        mut receiver: R,
    ) -> ClientResult<(R, UploadAck)>
    where
        R: TarReceiver + Send + 'static,
    {
        let query = DownloadQuery {
            dir: remote_dir.to_string(),
            pattern: pattern.map(str::to_string),
        };
        let response = self
            .http
            .get(self.url("download-tar"))
            .header(AUTHORIZATION, self.id.to_bearer())
            .query(&query)
            .send()
            .await?;
        let response = check_status(response).await?;

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        let mut reader = SyncIoBridge::new(StreamReader::new(stream));
        let (receiver, ack) = tokio::task::spawn_blocking(move || {
            let ack = receive_tar(&mut reader, &mut receiver)?;
            // A failed archive still ends with a valid trailer; the error
            // only shows once the body is read to the end
            io::copy(&mut reader, &mut io::sink())?;
            Ok::<_, TransferError>((receiver, ack))
        })
        .await
        .map_err(io::Error::from)??;

        Ok((receiver, ack))
    }

    /// Download `remote_dir` into `local_dir`, creating it if missing
    pub async fn download_dir(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        pattern: Option<&str>,
    ) -> ClientResult<UploadAck> {
        tokio::fs::create_dir_all(local_dir).await?;
        let (_, ack) = self
            .download_into(remote_dir, pattern, DirectoryReceiver::new(local_dir))
            .await?;
        Ok(ack)
    }
}
