use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use frame_pacer_common::frame::{Frame, FrameError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

/// A long-lived model process spoken to over newline-delimited JSON.
///
/// Protocol: one request object per line on the child's stdin, carrying a
/// numeric `id`. The child answers with one object per line on its stdout
/// echoing that `id`. A response of the form `{"id": n, "error": "..."}`
/// reports a failed request; the process stays usable. Stdout lines that are
/// not an object with the current `id` (banners, prints, late replies to an
/// earlier request) are skipped. The child's stderr is inherited so its
/// diagnostics land next to ours.
pub struct SidecarProcess {
    name: String,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("sidecar command is empty")]
    EmptyCommand,
    #[error("failed to spawn sidecar {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("could not get stdio handles for sidecar {0}")]
    Stdio(String),
    #[error("failed to write request: {0}")]
    Write(std::io::Error),
    #[error("failed to read response: {0}")]
    Read(std::io::Error),
    #[error("sidecar closed its stdout")]
    Closed,
    #[error("malformed sidecar message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sidecar reported an error: {0}")]
    Remote(String),
    #[error("bad frame payload: {0}")]
    Payload(String),
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    id: u64,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply<T> {
    Failure { error: String },
    Success(T),
}

impl SidecarProcess {
    /// Spawn `argv[0]` with the remaining arguments.
    pub fn spawn(argv: &[String]) -> Result<Self, SidecarError> {
        let (program, args) = argv.split_first().ok_or(SidecarError::EmptyCommand)?;
        let name = argv.join(" ");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SidecarError::Spawn(name.clone(), e))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(SidecarError::Stdio(name));
        };

        info!(sidecar = name, pid = child.id(), "sidecar started");

        Ok(Self {
            name,
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one request and block until the response with its `id` arrives.
    pub fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, SidecarError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&Envelope { id, body: request })?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(SidecarError::Write)?;

        let reply = self.read_reply(id)?;
        debug!(sidecar = self.name, id, request_bytes = line.len(), "sidecar call");

        match serde_json::from_value::<Reply<Resp>>(reply)? {
            Reply::Failure { error } => Err(SidecarError::Remote(error)),
            Reply::Success(resp) => Ok(resp),
        }
    }

    /// Read stdout lines until the reply tagged `id` shows up.
    fn read_reply(&mut self, id: u64) -> Result<Value, SidecarError> {
        let mut response = String::new();
        loop {
            response.clear();
            let n = self
                .stdout
                .read_line(&mut response)
                .map_err(SidecarError::Read)?;
            if n == 0 {
                return Err(SidecarError::Closed);
            }
            match reply_id(&response) {
                Some((got, value)) if got == id => return Ok(value),
                Some((got, _)) => {
                    warn!(
                        sidecar = self.name,
                        expected = id,
                        got,
                        "discarding stale sidecar reply"
                    );
                }
                None => {
                    warn!(
                        sidecar = self.name,
                        line = response.trim_end(),
                        "ignoring non-protocol line on sidecar stdout"
                    );
                }
            }
        }
    }
}

/// The `id` of a protocol line, with the parsed object.
fn reply_id(line: &str) -> Option<(u64, Value)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let id = value.as_object()?.get("id")?.as_u64()?;
    Some((id, value))
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(sidecar = self.name, error = %e, "sidecar already exited");
        }
        if let Err(e) = self.child.wait() {
            warn!(sidecar = self.name, error = %e, "failed to reap sidecar");
        }
    }
}

/// A frame as it travels to and from a sidecar.
///
/// `data` is the raw interleaved pixel buffer, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: String,
}

impl WireFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
            data: STANDARD.encode(frame.data()),
        }
    }

    pub fn into_frame(self) -> Result<Frame, SidecarError> {
        let data = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| SidecarError::Payload(e.to_string()))?;
        Frame::new(self.width, self.height, self.channels, data)
            .map_err(|e: FrameError| SidecarError::Payload(e.to_string()))
    }
}

/// `sh` sidecar that runs `before` once, then answers every request with
/// `{"id": <request id>, <body>}`. `$id` is available to `body`.
#[cfg(test)]
pub(crate) fn scripted_sidecar(before: &str, body: &str) -> Vec<String> {
    let script = format!(
        r#"{before}
while read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{{"id":\([0-9]*\).*/\1/')
  printf '{{"id":%s,%s}}\n' "$id" "{body}"
done"#
    );
    vec!["sh".into(), "-c".into(), script]
}
