pub mod config;
pub mod context;
pub mod database;
pub mod deadlines;
pub mod error;
pub mod llm_client;
pub mod oracle;
pub mod profile;
pub mod runtime;
pub mod sentiment;
pub mod server;
pub mod session;
pub mod summarizer;
pub mod wellness;
