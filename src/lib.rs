//! Session-state core of a GDB/MI debugger front-end.
//!
//! Tracks identity and run state of debugged processes and threads, caches command results,
//! and implements compound navigation operations (run-to-line, step into selection) on top of
//! an asynchronous command channel to the backend.

pub mod config;
pub mod log;
pub mod replay;
pub mod service;
pub mod session;
pub mod version;
