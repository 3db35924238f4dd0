//! OCR runner: executes the active engine against a receipt image.
//!
//! Two backends behind one `extract` contract:
//! - local: spawns the active engine script as a subprocess with
//!   `--input <path> --json`, captures stdout, enforces a hard wall-clock
//!   timeout after which the process is forcibly killed;
//! - remote: POSTs the base64-encoded file to a configured endpoint with
//!   optional bearer auth, same timeout discipline via request cancellation.
//!
//! Both parse output through [`crate::parse::parse_engine_output`].

use crate::engine::EngineRegistry;
use crate::error::ExtractionError;
use crate::parse::{parse_engine_output, OcrOutput, ParseOutcome};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Hard wall-clock timeout for a single extraction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Backend selection, driven by runtime configuration. Default is local.
#[derive(Debug, Clone)]
pub enum Backend {
    Local {
        /// Interpreter for engine scripts (default `python3`)
        interpreter: String,
        registry: EngineRegistry,
    },
    Remote {
        endpoint: String,
        token: Option<String>,
    },
}

/// Pure extraction engine: no persisted state, just external I/O.
pub struct OcrRunner {
    backend: Backend,
    timeout: Duration,
    http: reqwest::Client,
}

impl OcrRunner {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            timeout: DEFAULT_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    /// Override the timeout (tests, operator tuning).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extract a monetary total from the receipt image at `file_path`.
    pub async fn extract(&self, file_path: &Path) -> Result<OcrOutput, ExtractionError> {
        match &self.backend {
            Backend::Local {
                interpreter,
                registry,
            } => self.extract_local(interpreter, registry, file_path).await,
            Backend::Remote { endpoint, token } => {
                self.extract_remote(endpoint, token.as_deref(), file_path).await
            }
        }
    }

    async fn extract_local(
        &self,
        interpreter: &str,
        registry: &EngineRegistry,
        file_path: &Path,
    ) -> Result<OcrOutput, ExtractionError> {
        let script = registry.active_script();
        debug!(script = %script.display(), input = %file_path.display(), "Running local OCR");

        let child = Command::new(interpreter)
            .arg(&script)
            .arg("--input")
            .arg(file_path)
            .arg("--json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must take the process with it
            .kill_on_drop(true)
            .spawn()
            .map_err(ExtractionError::Spawn)?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(ExtractionError::Io)?,
            Err(_) => return Err(ExtractionError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return match output.status.code() {
                Some(code) => Err(ExtractionError::Backend { code, stderr }),
                None => Err(ExtractionError::Signal { stderr }),
            };
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_engine_output(&stdout) {
            ParseOutcome::Parsed(result) => Ok(result),
            ParseOutcome::Unparseable(err) => Err(ExtractionError::Malformed(err)),
        }
    }

    async fn extract_remote(
        &self,
        endpoint: &str,
        token: Option<&str>,
        file_path: &Path,
    ) -> Result<OcrOutput, ExtractionError> {
        let bytes = tokio::fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let payload = json!({
            "file_name": file_name,
            "file_base64": BASE64.encode(&bytes),
        });

        debug!(endpoint, file = %file_name, "Running remote OCR");

        let mut request = self
            .http
            .post(endpoint)
            // Cancels the in-flight request on expiry rather than letting it
            // complete in the background
            .timeout(self.timeout)
            .json(&payload);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout(self.timeout)
            } else {
                ExtractionError::Transport(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(ExtractionError::Transport)?;

        if !status.is_success() {
            return Err(ExtractionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        match parse_engine_output(&body) {
            ParseOutcome::Parsed(result) => Ok(result),
            ParseOutcome::Unparseable(err) => Err(ExtractionError::Malformed(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Build a runner whose "engine" is a shell script, so tests don't
    /// depend on a Python installation.
    fn sh_runner(tmp: &TempDir, script_body: &str) -> OcrRunner {
        let dir = tmp.path().join("ocr-engine");
        fs::create_dir_all(&dir).unwrap();
        let script = dir.join("smartopex-engine-v1.py");
        fs::write(&script, script_body).unwrap();

        let registry = EngineRegistry::new(&dir, &script);
        OcrRunner::new(Backend::Local {
            interpreter: "sh".into(),
            registry,
        })
    }

    fn input(tmp: &TempDir) -> std::path::PathBuf {
        let path = tmp.path().join("receipt.jpg");
        fs::write(&path, b"fake image").unwrap();
        path
    }

    #[tokio::test]
    async fn local_backend_parses_json_stdout() {
        let tmp = TempDir::new().unwrap();
        let runner = sh_runner(&tmp, "echo '{\"grand_total\": 123.45, \"confidence\": 0.9}'\n");

        let out = runner.extract(&input(&tmp)).await.unwrap();
        assert_eq!(out.amount, Some(123.45));
        assert_eq!(out.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn local_backend_tolerates_diagnostic_lines() {
        let tmp = TempDir::new().unwrap();
        let runner = sh_runner(
            &tmp,
            "echo 'loading model...'\necho '{\"amount\": 7.5}'\n",
        );

        let out = runner.extract(&input(&tmp)).await.unwrap();
        assert_eq!(out.amount, Some(7.5));
    }

    #[tokio::test]
    async fn nonzero_exit_is_backend_error_with_stderr() {
        let tmp = TempDir::new().unwrap();
        let runner = sh_runner(&tmp, "echo 'model blew up' >&2\nexit 3\n");

        let err = runner.extract(&input(&tmp)).await.unwrap_err();
        match err {
            ExtractionError::Backend { code, stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("model blew up"));
            }
            other => panic!("expected Backend error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn garbage_stdout_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let runner = sh_runner(&tmp, "echo 'not json at all'\n");

        let err = runner.extract(&input(&tmp)).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_engine_hits_hard_timeout() {
        let tmp = TempDir::new().unwrap();
        let runner =
            sh_runner(&tmp, "sleep 30\n").with_timeout(Duration::from_millis(200));

        let err = runner.extract(&input(&tmp)).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout(_)));
    }

    /// One-shot HTTP stub: answers the first connection with the given
    /// status and body, and hands back the raw request for assertions.
    async fn http_stub(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };

            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        (format!("http://{}", addr), rx)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| {
                let lower = line.to_ascii_lowercase();
                let value = lower.strip_prefix("content-length:")?;
                value.trim().parse::<usize>().ok()
            })
            .next()
            .unwrap_or(0);
        text.len() - (header_end + 4) >= content_length
    }

    #[tokio::test]
    async fn remote_backend_posts_payload_and_parses_response() {
        let tmp = TempDir::new().unwrap();
        let (endpoint, request) = http_stub("200 OK", r#"{"grand_total": 88.5}"#).await;

        let runner = OcrRunner::new(Backend::Remote {
            endpoint,
            token: Some("secret-token".into()),
        });

        let out = runner.extract(&input(&tmp)).await.unwrap();
        assert_eq!(out.amount, Some(88.5));

        let raw = request.await.unwrap().to_ascii_lowercase();
        assert!(raw.contains("authorization: bearer secret-token"));
        assert!(raw.contains("\"file_name\":\"receipt.jpg\""));
        assert!(raw.contains("\"file_base64\":"));
    }

    #[tokio::test]
    async fn remote_non_success_is_http_error_with_body() {
        let tmp = TempDir::new().unwrap();
        let (endpoint, _request) = http_stub("500 Internal Server Error", "engine exploded").await;

        let runner = OcrRunner::new(Backend::Remote {
            endpoint,
            token: None,
        });

        let err = runner.extract(&input(&tmp)).await.unwrap_err();
        match err {
            ExtractionError::Http { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("engine exploded"));
            }
            other => panic!("expected Http error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn remote_unanswered_request_hits_hard_timeout() {
        let tmp = TempDir::new().unwrap();

        // Accepts the connection, then never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            }
        });

        let runner = OcrRunner::new(Backend::Remote {
            endpoint: format!("http://{}", addr),
            token: None,
        })
        .with_timeout(Duration::from_millis(200));

        let err = runner.extract(&input(&tmp)).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_interpreter_is_spawn_failure() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ocr-engine");
        fs::create_dir_all(&dir).unwrap();
        let script = dir.join("smartopex-engine-v1.py");
        fs::write(&script, "echo hi").unwrap();

        let runner = OcrRunner::new(Backend::Local {
            interpreter: "definitely-not-a-real-binary".into(),
            registry: EngineRegistry::new(&dir, &script),
        });

        let err = runner.extract(&input(&tmp)).await.unwrap_err();
        assert!(err.is_infrastructure());
    }
}
