//! Line-delimited JSON protocol spoken with the front end.
//!
//! Each request is one line:
//!
//! ```json
//! {"action": "carregar_documentos", "data": {"filePaths": ["/a.pdf"], "apiKey": "sk-..."}}
//! ```
//!
//! Each response is one line, either
//! `{"status":"success","action":...,"result":...}` or
//! `{"status":"error","message":...}`.
//!
//! | Action | `data` | `result` |
//! |--------|--------|----------|
//! | `verificar_estado_inicial` | none | `{status}` |
//! | `salvar_e_validar_chave` | key string | `{success, message}` |
//! | `select_pdf_files` | none | list of paths |
//! | `carregar_documentos` | `{filePaths, apiKey}` | `{success, message}` |
//! | `processar_pergunta` | `{pergunta}` | `{answer}` or `{error}` |
//! | `verificar_licenca` | none | license status |
//! | `ativar_licenca` | key string | `{success, message}` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CheckInitialState,
    SaveAndValidateKey { key: String },
    SelectPdfFiles,
    LoadDocuments { file_paths: Vec<PathBuf>, api_key: String },
    AskQuestion { question: String },
    CheckLicense,
    ActivateLicense { key: String },
}

impl Request {
    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            Request::CheckInitialState => "verificar_estado_inicial",
            Request::SaveAndValidateKey { .. } => "salvar_e_validar_chave",
            Request::SelectPdfFiles => "select_pdf_files",
            Request::LoadDocuments { .. } => "carregar_documentos",
            Request::AskQuestion { .. } => "processar_pergunta",
            Request::CheckLicense => "verificar_licenca",
            Request::ActivateLicense { .. } => "ativar_licenca",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Error decoding JSON: {0}")]
    Malformed(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid data for '{action}': {reason}")]
    InvalidPayload {
        action: &'static str,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    action: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct LoadPayload {
    #[serde(default, rename = "filePaths")]
    file_paths: Vec<PathBuf>,
    #[serde(default, rename = "apiKey")]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    pergunta: String,
}

/// Parse one request line.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(line.trim())
        .map_err(|_| ProtocolError::Malformed(line.trim().to_string()))?;

    let Some(action) = envelope.action else {
        return Err(ProtocolError::Malformed(line.trim().to_string()));
    };
    let data = envelope.data;

    match action.as_str() {
        "verificar_estado_inicial" => Ok(Request::CheckInitialState),
        "salvar_e_validar_chave" => Ok(Request::SaveAndValidateKey {
            key: string_payload("salvar_e_validar_chave", data)?,
        }),
        "select_pdf_files" => Ok(Request::SelectPdfFiles),
        "carregar_documentos" => {
            let payload: LoadPayload = if data.is_null() {
                LoadPayload::default()
            } else {
                serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
                    action: "carregar_documentos",
                    reason: e.to_string(),
                })?
            };
            Ok(Request::LoadDocuments {
                file_paths: payload.file_paths,
                api_key: payload.api_key.unwrap_or_default(),
            })
        }
        "processar_pergunta" => {
            let payload: QuestionPayload =
                serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
                    action: "processar_pergunta",
                    reason: e.to_string(),
                })?;
            Ok(Request::AskQuestion {
                question: payload.pergunta,
            })
        }
        "verificar_licenca" => Ok(Request::CheckLicense),
        "ativar_licenca" => Ok(Request::ActivateLicense {
            key: string_payload("ativar_licenca", data)?,
        }),
        _ => Err(ProtocolError::UnknownAction(action)),
    }
}

/// A string `data` field; absent means empty.
fn string_payload(action: &'static str, data: Value) -> Result<String, ProtocolError> {
    match data {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        other => Err(ProtocolError::InvalidPayload {
            action,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Success { action: String, result: Value },
    Error { message: String },
}

impl Response {
    pub fn success(action: &str, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Response::Success {
                action: action.to_string(),
                result,
            },
            Err(e) => Response::error(format!("Failed to encode result: {}", e)),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Serialize as a single line, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"status\":\"error\",\"message\":\"Failed to encode response: {}\"}}",
                e
            )
        })
    }
}

/// Result payload of key validation, document loading, and license activation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

/// Result payload of a question.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnswerPayload {
    Answer { answer: String },
    Error { error: String },
}
