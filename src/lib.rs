//! ffpreview - per-stream previews of media files rendered by ffmpeg.
//!
//! This library crate exposes the binary's building blocks for integration
//! testing.

pub mod config;
pub mod render;
