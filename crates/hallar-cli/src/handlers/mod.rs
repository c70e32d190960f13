//! Command handlers

pub mod config;
pub mod health;
pub mod locate;
pub mod session;
pub mod stats;
