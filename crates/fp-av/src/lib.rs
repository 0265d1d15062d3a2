//! # fp-av
//!
//! ffmpeg and ffprobe integration for ffpreview.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- resolve `ffmpeg` and `ffprobe`
//!   once from configuration overrides or `PATH`.
//! - **Command compiler** ([`FfmpegCommand`]) -- a declarative model of
//!   inputs, outputs, maps and a [`FilterGraph`] compiled into a stable
//!   argument vector, with in-process streams routed through extra
//!   descriptors.
//! - **Progress decoding** ([`Progress`]) -- records rebuilt from ffmpeg's
//!   `-progress` key/value protocol.
//! - **Probing** ([`FfprobeCommand`], [`ProbeResult`]) -- typed ffprobe JSON
//!   with the raw document kept alongside.
//! - **Preview planning** ([`PreviewPlan`]) -- one filter graph rendering
//!   every stream of a file into a stacked PNG.

pub mod command;
pub mod filter;
pub mod kvargs;
pub mod metadata;
pub mod position;
pub mod preview;
pub mod probe;
pub mod progress;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{FfmpegCommand, Input, InputId, Map, Output, Sink, Source};
pub use filter::{Filter, FilterChain, FilterGraph};
pub use kvargs::Options;
pub use metadata::Metadata;
pub use position::{duration_to_position, parse_position};
pub use preview::{Cut, PreviewPlan, Resolution, Strip};
pub use probe::{FfprobeCommand, ProbeFormat, ProbeResult, ProbeStream};
pub use progress::{Progress, ProgressOutput, ProgressStream};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry, FFMPEG, FFPROBE};
