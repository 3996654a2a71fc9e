//! Data models for the upload gateway.
//!
//! `session` is the state tracked between API calls; `upload` holds the JSON
//! bodies exchanged with clients.

pub mod session;
pub mod upload;
