//! Transcription use-case services.
//!
//! # Responsibility
//! - Orchestrate oracle, engine, commit and gateway into page passes.
//! - Serialize passes and edits per page.

pub mod oracle;
pub mod page_lock;
pub mod transcription_service;
