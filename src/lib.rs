//! GIVE server plumbing
//!
//! Shared pieces of the GIVE genome browser web service: per-request MySQL
//! sessions, content-type aware request decoding, the error boundary that
//! renders every failure as JSON, and small coordinate/bit helpers.

pub mod boundary;
pub mod config;
pub mod database;
pub mod error;
pub mod numeric;
pub mod request;
pub mod server;
