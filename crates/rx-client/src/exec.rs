//! Reading an exec response body

use std::io;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

use rx_protocol::{BodyLine, ExitStatus, MAX_LINE_BYTES};

/// How an exec stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The server reported the process exit
    Exited(ExitStatus),
    /// The stream ended without an exit report
    Truncated,
}

impl ExecOutcome {
    /// Exit code to report locally
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecOutcome::Exited(ExitStatus::Code(code)) => *code,
            ExecOutcome::Exited(ExitStatus::Signal) | ExecOutcome::Truncated => 1,
        }
    }
}

type BodyReader = BufReader<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>>;

/// A running remote process: its pid and the stream of its output lines
pub struct ExecResponse {
    pid: u32,
    reader: BodyReader,
    outcome: Option<ExecOutcome>,
    buf: Vec<u8>,
}

impl ExecResponse {
    /// Wrap a response body
    pub fn from_stream<S, E>(pid: u32, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let stream = body.map_err(io::Error::other).boxed();
        Self {
            pid,
            reader: BufReader::new(StreamReader::new(stream)),
            outcome: None,
            buf: Vec::new(),
        }
    }

    /// Remote process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next output line, or None once the stream has ended
    pub async fn next_line(&mut self) -> Option<String> {
        if self.outcome.is_some() {
            return None;
        }

        self.buf.clear();
        // Room for an escape byte and the newline on a full-length line
        let limit = (MAX_LINE_BYTES + 2) as u64;
        match (&mut self.reader).take(limit).read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.outcome = Some(ExecOutcome::Truncated);
                None
            }
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                let line = String::from_utf8_lossy(&self.buf);
                match BodyLine::decode(&line) {
                    BodyLine::Exit(status) => {
                        self.outcome = Some(ExecOutcome::Exited(status));
                        None
                    }
                    BodyLine::Output(text) => Some(text.to_string()),
                }
            }
            Err(e) => {
                tracing::warn!("Exec stream for pid {} failed: {}", self.pid, e);
                self.outcome = Some(ExecOutcome::Truncated);
                None
            }
        }
    }

    /// How the stream ended; None while lines remain
    pub fn outcome(&self) -> Option<ExecOutcome> {
        self.outcome
    }

    /// Read all remaining lines
    pub async fn collect(mut self) -> (Vec<String>, ExecOutcome) {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await {
            lines.push(line);
        }
        (lines, self.outcome.unwrap_or(ExecOutcome::Truncated))
    }
}
