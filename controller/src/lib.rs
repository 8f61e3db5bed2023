//! swarmsync Library
//!
//! Reconciliation engine of a GitOps controller for Docker Swarm.

pub mod app;
pub mod cluster;
pub mod credentials;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod manifest;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod source;
pub mod storage;
pub mod utils;
