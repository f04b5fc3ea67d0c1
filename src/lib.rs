//! # Intelligent Library
//!
//! Backend for a desktop "chat with your PDFs" assistant.
//!
//! The front end sends line-delimited JSON commands over stdin. The
//! backend stages the chosen PDFs, splits them into overlapping chunks,
//! embeds the chunks with a local multilingual model, and stores them in
//! an on-disk vector index. Questions are answered by a tool-calling agent
//! whose only tool is semantic search over that index, so answers stay
//! grounded in the documents and cite their sources.
//!
//! ## Architecture
//!
//! ```text
//!  stdin ──▶ ┌──────────┐   ┌─────────┐   ┌───────────────┐
//!            │ protocol │──▶│ session │──▶│ stage+extract │
//!  stdout ◀─ │  server  │   │         │   │    +chunk     │
//!            └──────────┘   └────┬────┘   └───────┬───────┘
//!                                │                ▼
//!                           ┌────┴────┐     ┌───────────┐
//!                           │  agent  │◀───▶│   index   │
//!                           │ (+llm)  │tool │  SQLite   │
//!                           └─────────┘     └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy reported to the front end |
//! | [`models`] | Core data types |
//! | [`stage`] | Copying selected files into the documents folder |
//! | [`extract`] | PDF text extraction, per page |
//! | [`chunk`] | Recursive character text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | SQLite vector index build and search |
//! | [`tools`] | Tool trait, registry, and the retrieval tool |
//! | [`llm`] | Chat-completion client |
//! | [`agent`] | Bounded tool-calling agent loop |
//! | [`credential`] | API key validation and storage |
//! | [`license`] | Offline trial and license state |
//! | [`session`] | Application state and operations |
//! | [`protocol`] | Request and response wire format |
//! | [`server`] | stdin/stdout request loop |
//! | [`picker`] | Native file-selection dialog |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod credential;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod license;
pub mod llm;
pub mod models;
pub mod picker;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stage;
pub mod tools;
