//! Message types for the remexec HTTP protocol
//!
//! Request and response bodies exchanged between the client and the server.
//! Everything here is JSON on the wire; the exec and kill requests travel
//! inside an [`EncryptedEnvelope`](crate::envelope::EncryptedEnvelope).
//!
//! # Message Flow
//!
//! 1. Client posts a signed `TokenRequest` to `/token`, server answers with a
//!    `TokenResponse` carrying the session id and the sealed session token
//! 2. Client posts an enveloped `ExecRequest` to `/auth/exec`; the pid comes
//!    back in the `X-Process-Id` header, output lines stream in the body and
//!    the body ends with an exit trailer line
//! 3. Optionally, client posts an enveloped `KillRequest` to `/auth/kill`
//! 4. Tar transfers use raw bodies on `/auth/upload-tar` and `/auth/download-tar`

use serde::{Deserialize, Serialize};

/// Response header carrying the OS process id of an exec
pub const PROCESS_ID_HEADER: &str = "x-process-id";

/// Request header selecting the destination root of an upload
pub const BASE_PATH_HEADER: &str = "x-base-path";

/// Prefix of the final line of an exec body.
///
/// Starts with the ASCII record separator. Output lines that start with it
/// are escaped by [`encode_output_line`], so only the server writes it.
pub const EXIT_TRAILER_PREFIX: &str = "\u{1e}rx-exit:";

/// Longest output line sent in an exec body, in bytes.
///
/// Longer output without a newline is split into lines of this size. A
/// split can fall inside a multi-byte character.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const RECORD_SEPARATOR: char = '\u{1e}';

/// Encode one output line for an exec body, newline included
pub fn encode_output_line(line: &str) -> String {
    let mut encoded = String::with_capacity(line.len() + 2);
    if line.starts_with(RECORD_SEPARATOR) {
        encoded.push(RECORD_SEPARATOR);
    }
    encoded.push_str(line);
    encoded.push('\n');
    encoded
}

/// One decoded line of an exec body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLine<'a> {
    /// Process output
    Output(&'a str),
    /// The exit trailer
    Exit(ExitStatus),
}

impl<'a> BodyLine<'a> {
    /// Decode a body line whose newline has been removed
    pub fn decode(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix(RECORD_SEPARATOR) {
            if rest.starts_with(RECORD_SEPARATOR) {
                return BodyLine::Output(rest);
            }
            if let Some(status) = ExitStatus::parse_trailer(line) {
                return BodyLine::Exit(status);
            }
        }
        BodyLine::Output(line)
    }
}

/// A command to run on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Name of the executor that should run the command
    pub executor: String,
    /// Executable path or name
    pub exe: String,
    /// Ordered argument list
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExecRequest {
    /// Create a new exec request
    pub fn new(executor: impl Into<String>, exe: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executor: executor.into(),
            exe: exe.into(),
            args,
        }
    }
}

/// Request to terminate a process started by a previous exec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRequest {
    /// Process id from the `X-Process-Id` header
    pub pid: u32,
}

/// Result of a kill request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillResponse {
    /// Process id that was targeted
    pub pid: u32,
    /// False if the process had already finished
    pub killed: bool,
}

/// Signed session establishment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Client Ed25519 public key (hex)
    pub public_key: String,
    /// Client ephemeral X25519 public key (base64)
    pub ephemeral_public: String,
    /// Unix timestamp in seconds at signing time
    pub timestamp: u64,
    /// Ed25519 signature over the handshake message (base64)
    pub signature: String,
}

/// Session establishment response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Numeric session id for the bearer credential
    pub session_id: u32,
    /// Server Ed25519 public key (hex)
    pub server_public_key: String,
    /// Server ephemeral X25519 public key (base64)
    pub ephemeral_public: String,
    /// Session token sealed under the X25519 shared secret (base64 nonce || ciphertext)
    pub sealed_token: String,
    /// Server Ed25519 signature over the reply message (base64)
    pub signature: String,
}

/// Acknowledgment of a tar upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    /// Number of entries written under the base path
    pub written: usize,
    /// Entry paths that were refused because they escape the base path
    #[serde(default)]
    pub rejected: Vec<String>,
}

/// Query string of a tar download
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadQuery {
    /// Directory to pack
    pub dir: String,
    /// Optional file name wildcard (`*` and `?`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// How a remote process ended, as reported by the exit trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Process exited with a code
    Code(i32),
    /// Process was terminated by a signal (or the code is otherwise unavailable)
    Signal,
}

impl ExitStatus {
    /// Build from an optional exit code
    pub fn from_code(code: Option<i32>) -> Self {
        code.map_or(Self::Signal, Self::Code)
    }

    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Render the trailer line (without newline)
    pub fn to_trailer(&self) -> String {
        match self {
            Self::Code(code) => format!("{}{}", EXIT_TRAILER_PREFIX, code),
            Self::Signal => format!("{}signal", EXIT_TRAILER_PREFIX),
        }
    }

    /// Parse a trailer line; returns None for ordinary output
    pub fn parse_trailer(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(EXIT_TRAILER_PREFIX)?;
        if rest == "signal" {
            return Some(Self::Signal);
        }
        rest.parse().ok().map(Self::Code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_request_args_default() {
        let req: ExecRequest = serde_json::from_str(r#"{"executor":"exec","exe":"true"}"#).unwrap();
        assert!(req.args.is_empty());
    }

    #[test]
    fn test_exit_trailer() {
        assert_eq!(ExitStatus::Code(3).to_trailer(), "\u{1e}rx-exit:3");
        assert_eq!(
            ExitStatus::parse_trailer("\u{1e}rx-exit:signal"),
            Some(ExitStatus::Signal)
        );
        assert_eq!(
            ExitStatus::parse_trailer(&ExitStatus::Code(-1).to_trailer()),
            Some(ExitStatus::Code(-1))
        );
        assert_eq!(ExitStatus::parse_trailer("rx-exit:0"), None);
        assert_eq!(ExitStatus::parse_trailer("hello"), None);
    }

    #[test]
    fn test_output_that_looks_like_a_trailer() {
        let fake = ExitStatus::Code(0).to_trailer();
        let encoded = encode_output_line(&fake);
        assert_eq!(encoded, format!("\u{1e}{}\n", fake));

        let line = encoded.trim_end_matches('\n');
        assert_eq!(BodyLine::decode(line), BodyLine::Output(fake.as_str()));
        assert_eq!(
            BodyLine::decode(&fake),
            BodyLine::Exit(ExitStatus::Code(0))
        );
    }

    #[test]
    fn test_plain_output_is_unchanged() {
        assert_eq!(encode_output_line("hello"), "hello\n");
        assert_eq!(BodyLine::decode("hello"), BodyLine::Output("hello"));
        assert_eq!(BodyLine::decode("\u{1e}other"), BodyLine::Output("\u{1e}other"));
        assert_eq!(
            BodyLine::decode(&encode_output_line("\u{1e}\u{1e}x").trim_end_matches('\n')),
            BodyLine::Output("\u{1e}\u{1e}x")
        );
    }

    #[test]
    fn test_download_query_omits_empty_pattern() {
        let query = DownloadQuery {
            dir: "/tmp".to_string(),
            pattern: None,
        };
        assert_eq!(serde_json::to_string(&query).unwrap(), r#"{"dir":"/tmp"}"#);
    }
}
