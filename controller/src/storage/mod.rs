//! On-disk storage: layout, settings and state snapshots

pub mod layout;
pub mod settings;
pub mod snapshot;
