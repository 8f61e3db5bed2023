//! Manifest Translator
//!
//! Parses a multi-service declarative manifest and normalizes it into
//! per-service deployment specs scoped to one application.

pub mod compose;
pub mod envfile;
pub mod translate;
