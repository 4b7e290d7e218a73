//! clipforge library crate.
//!
//! Orchestrates third-party text-to-speech, image-generation, and
//! lip-sync-video services behind one pipeline: pick a provider, call it,
//! fall back to alternates on failure, return a media artifact reference.

pub mod config;
pub mod paths;
pub mod pipeline;
pub mod providers;
