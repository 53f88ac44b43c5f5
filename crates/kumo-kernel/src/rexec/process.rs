//! Line-delimited JSON channel over a child process's stdio.
//!
//! Each request is one JSON object per line on the child's stdin; each
//! response is one line on its stdout. Requests are serialized, so a reply
//! always belongs to the request just written.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Dispatcher, RemoteError, RemoteExec};

/// One request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub options: Value,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: u64, error: RemoteError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    fn into_result(self) -> Result<Value, RemoteError> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| RemoteError::transport("proxy reported failure without detail")))
        }
    }
}

struct Pipe {
    next_id: u64,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// [`RemoteExec`] over a spawned proxy (normally `kumo serve`).
pub struct ProcessExec {
    pipe: Mutex<Pipe>,
    // Held so the child is killed when the channel drops.
    _child: Child,
}

impl std::fmt::Debug for ProcessExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessExec").finish_non_exhaustive()
    }
}

impl ProcessExec {
    /// Spawn `program args...` with piped stdio.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, RemoteError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::transport(format!("failed to spawn proxy {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RemoteError::transport("proxy stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::transport("proxy stdout not captured"))?;
        info!(program, "spawned proxy");
        Ok(Self {
            pipe: Mutex::new(Pipe {
                next_id: 1,
                stdin,
                stdout: BufReader::new(stdout),
            }),
            _child: child,
        })
    }
}

#[async_trait]
impl RemoteExec for ProcessExec {
    async fn exec(&self, command: &str, options: Value) -> Result<Value, RemoteError> {
        let mut pipe = self.pipe.lock().await;
        let id = pipe.next_id;
        pipe.next_id += 1;

        let request = Request {
            id,
            command: command.to_string(),
            options,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| RemoteError::transport(format!("failed to encode request: {e}")))?;
        line.push('\n');
        pipe.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RemoteError::transport(format!("proxy write failed: {e}")))?;
        pipe.stdin
            .flush()
            .await
            .map_err(|e| RemoteError::transport(format!("proxy write failed: {e}")))?;

        let mut reply = String::new();
        let n = pipe
            .stdout
            .read_line(&mut reply)
            .await
            .map_err(|e| RemoteError::transport(format!("proxy read failed: {e}")))?;
        if n == 0 {
            return Err(RemoteError::transport("proxy closed its stdout"));
        }
        let response: Response = serde_json::from_str(&reply)
            .map_err(|e| RemoteError::transport(format!("bad proxy reply: {e}")))?;
        if response.id != id {
            return Err(RemoteError::transport(format!(
                "proxy replied to request {} while {id} was pending",
                response.id
            )));
        }
        response.into_result()
    }
}

/// Serve requests from `reader` until EOF, writing one response per line.
///
/// A malformed line gets an error response with id 0 and the loop
/// continues.
pub async fn serve_lines<R, W>(reader: R, mut writer: W, dispatcher: &Dispatcher) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                debug!(id = req.id, command = %req.command, "serving request");
                match dispatcher.dispatch(&req.command, req.options).await {
                    Ok(result) => Response::success(req.id, result),
                    Err(e) => Response::failure(req.id, e),
                }
            }
            Err(e) => {
                warn!(error = %e, "malformed request line");
                Response::failure(0, RemoteError::bad_request(format!("malformed request: {e}")))
            }
        };
        let mut out = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use crate::vfs::{ErrorKind, MountTable, StorageMount, StorageResponder, Vfs};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, duplex};

    async fn dispatcher() -> Dispatcher {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("logs", "app.log", b"ok\nerror: disk\n".to_vec());
        let mut builder = MountTable::builder();
        builder.mount_backend(Arc::new(StorageResponder::new(
            StorageMount::new("minio"),
            store,
        )));
        Dispatcher::new(Vfs::new(builder.build().await.unwrap()))
    }

    async fn serve(input: &str) -> Vec<Response> {
        let d = dispatcher().await;
        let (mut client, server) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server);
        client.write_all(input.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        serve_lines(BufReader::new(read_half), write_half, &d).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_serve_lines_answers_in_order() {
        let req1 = Request {
            id: 1,
            command: "vfs-s3 ls %2Fs3%2Fminio %2Fs3%2Fminio".into(),
            options: json!({}),
        };
        let req2 = Request {
            id: 2,
            command: "vfs-s3 rm %2Fs3%2Fminio %2Fs3%2Fminio%2Flogs".into(),
            options: json!({}),
        };
        let input = format!(
            "{}\n\n{}\n",
            serde_json::to_string(&req1).unwrap(),
            serde_json::to_string(&req2).unwrap()
        );
        let responses = serve(&input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, 1);
        assert!(responses[0].ok);
        assert_eq!(responses[0].result.as_ref().unwrap()[0]["name"], "logs");
        assert_eq!(responses[1].id, 2);
        assert!(!responses[1].ok);
        assert_eq!(responses[1].error.as_ref().unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_the_loop() {
        let good = Request {
            id: 7,
            command: "vfs-s3 ls %2Fs3%2Fminio %2Fs3%2Fminio".into(),
            options: Value::Null,
        };
        let input = format!("not json\n{}\n", serde_json::to_string(&good).unwrap());
        let responses = serve(&input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, 0);
        assert!(!responses[0].ok);
        assert_eq!(responses[1].id, 7);
        assert!(responses[1].ok);
    }

    #[test]
    fn test_response_into_result() {
        let r = Response::failure(3, RemoteError::bad_request("nope"));
        assert_eq!(r.into_result().unwrap_err().message, "nope");
        let r = Response::success(4, json!([1]));
        assert_eq!(r.into_result().unwrap(), json!([1]));
    }
}
