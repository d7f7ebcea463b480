//! Brainvault - Knowledge Retrieval & Curation Engine
//!
//! Accumulates short knowledge snippets (meeting notes, policy reminders, parsed
//! documents), keeps only the most authoritative record per topic, and retrieves the
//! most relevant, currently-valid ones for a natural-language question.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod curator;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod retrieval;
pub mod source;
pub mod temporal;

pub use error::{Result, VaultError};
