//! Data models shared across the controller

pub mod application;
pub mod credential;
