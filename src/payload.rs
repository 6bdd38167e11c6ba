//! External-interface data types: the opaque IPC/handler payload, the
//! handler input envelope, and the handler result envelope agents return.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque content carried by IPC messages and handler I/O, replacing a
/// dynamic `any` with a tagged sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text { content: String },
    Json { content: serde_json::Value },
    Bytes { content: Vec<u8> },
    Error { reason: String },
    Artifact { id: String },
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Payload::Text {
            content: content.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { content } => Some(content),
            _ => None,
        }
    }
}

/// Generation tuning knobs forwarded to a `ModelBackend`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub input: String,
    pub output: String,
}

/// The envelope a workflow serializes as input to a handler. Handlers that
/// only understand a plain string treat it as `query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerInput {
    pub query: Option<String>,
    pub objective: Option<String>,
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
    pub generation: Option<GenerationOptions>,
}

impl HandlerInput {
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }
}

/// The tagged result an agent handler produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerResultKind {
    Text {
        content: String,
    },
    Code {
        files: Vec<CodeFile>,
    },
    Artifact {
        id: String,
    },
    Error {
        reason: String,
    },
    Html {
        content: String,
    },
    Json {
        content: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    pub content: String,
}

/// The envelope an agent returns from its handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResult {
    pub ok: bool,
    pub agent: String,
    pub result: HandlerResultKind,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl HandlerResult {
    pub fn text(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            ok: true,
            agent: agent.into(),
            result: HandlerResultKind::Text {
                content: content.into(),
            },
            meta: HashMap::new(),
        }
    }

    pub fn error(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            agent: agent.into(),
            result: HandlerResultKind::Error {
                reason: reason.into(),
            },
            meta: HashMap::new(),
        }
    }
}
