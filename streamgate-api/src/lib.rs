//! HTTP front door for the streamgate gateway.
//!
//! Routes playback clients to the playlist, key, segment, and nested
//! manifest handlers, with the security gate applied before any upstream
//! work.

pub mod http;
