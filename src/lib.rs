//! Asynchronous object detection jobs
//!
//! Images are admitted by intake, queued, processed by workers that run
//! label detection and draw the detected boxes, and polled by clients
//! through a status query backed by the job status store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
