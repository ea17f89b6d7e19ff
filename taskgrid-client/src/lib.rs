//! TASKGRID client library exports.

pub mod api_client;
pub mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod notifications;
pub mod notify;
pub mod persistence;
pub mod realtime;
pub mod state;
