//! Reelforge - video composition service
//!
//! Turns "photo + audio track" and "photo slideshow" requests into
//! supervised ffmpeg runs, persisting every task and streaming its progress
//! to any number of observers.
//!
//! This library crate exposes the core functionality for integration testing.

pub mod app;
pub mod config;
pub mod fetch;
pub mod hub;
pub mod orchestrator;
pub mod server;
pub mod storage;
pub mod tasks;
