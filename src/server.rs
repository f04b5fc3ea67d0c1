//! Request loop over stdin/stdout.
//!
//! Reads one request line, runs it to completion, writes one response
//! line, and repeats until the input closes. Requests that arrive while
//! one is running wait in the pipe. No request can end the loop: every
//! failure becomes an error response.
//!
//! stdout carries only responses; diagnostics go to stderr through
//! `tracing`.

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::LibraryError;
use crate::picker::FilePicker;
use crate::protocol::{self, AnswerPayload, Outcome, Request, Response};
use crate::session::Session;

pub struct Server {
    session: Session,
    picker: Box<dyn FilePicker>,
}

impl Server {
    pub fn new(session: Session, picker: Box<dyn FilePicker>) -> Self {
        Self { session, picker }
    }

    /// Handle one raw line. Blank lines produce no response.
    pub async fn handle_line(&mut self, line: &str) -> Option<Response> {
        if line.trim().is_empty() {
            return None;
        }

        match protocol::parse_request(line) {
            Ok(request) => Some(self.dispatch(request).await),
            Err(e) => {
                tracing::warn!(error = %e, "rejected request");
                Some(Response::error(e.to_string()))
            }
        }
    }

    /// Run a parsed request against the session.
    pub async fn dispatch(&mut self, request: Request) -> Response {
        let action = request.action();
        tracing::info!(action, "handling request");

        match request {
            Request::CheckInitialState => {
                Response::success(action, json!({ "status": self.session.status() }))
            }
            Request::SaveAndValidateKey { key } => {
                let outcome = match self.session.save_and_validate_key(&key).await {
                    Ok(message) => Outcome {
                        success: true,
                        message: message.to_string(),
                    },
                    Err(e) => {
                        log_failure(action, &e);
                        Outcome {
                            success: false,
                            message: e.to_string(),
                        }
                    }
                };
                Response::success(action, outcome)
            }
            Request::SelectPdfFiles => match self.picker.pick_pdfs().await {
                Ok(paths) => Response::success(action, paths),
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "file dialog failed");
                    Response::error(format!("Error opening dialog: {:#}", e))
                }
            },
            Request::LoadDocuments {
                file_paths,
                api_key,
            } => {
                let outcome = match self.session.load_documents(&file_paths, &api_key).await {
                    Ok(message) => Outcome {
                        success: true,
                        message,
                    },
                    Err(e) => {
                        log_failure(action, &e);
                        Outcome {
                            success: false,
                            message: e.to_string(),
                        }
                    }
                };
                Response::success(action, outcome)
            }
            Request::AskQuestion { question } => {
                let payload = match self.session.ask(&question).await {
                    Ok(answer) => AnswerPayload::Answer { answer },
                    Err(e) => {
                        log_failure(action, &e);
                        AnswerPayload::Error {
                            error: e.to_string(),
                        }
                    }
                };
                Response::success(action, payload)
            }
            Request::CheckLicense => match self.session.license_status() {
                Ok(status) => Response::success(action, status),
                Err(e) => Response::error(format!("Error checking license: {:#}", e)),
            },
            Request::ActivateLicense { key } => {
                Response::success(action, self.session.activate_license(&key))
            }
        }
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`.
    pub async fn run<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            // Invalid UTF-8 is replaced rather than fatal; the line is then malformed JSON.
            let line = String::from_utf8_lossy(&buf);
            if let Some(response) = self.handle_line(&line).await {
                let mut out = response.to_line();
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        tracing::info!("input closed, shutting down");
        Ok(())
    }
}

/// Expected failures are user mistakes and log as warnings; wrapped
/// failures log at error level with their cause chain.
fn log_failure(action: &str, err: &LibraryError) {
    if err.is_expected() {
        tracing::warn!(action, kind = ?err.kind(), error = %err, "request failed");
    } else {
        tracing::error!(action, kind = ?err.kind(), error = ?err, "request failed");
    }
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(mut server: Server) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    server.run(stdin, stdout).await
}
