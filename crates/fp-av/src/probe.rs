//! ffprobe command and result types.
//!
//! [`FfprobeCommand`] runs `ffprobe -hide_banner -print_format json
//! -show_format -show_streams` on one input and decodes the JSON document
//! into a [`ProbeResult`], keeping the raw document alongside.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fp_core::config::DEFAULT_STDERR_LINES;
use fp_core::{Error, Result};
use fp_exec::{BoxWriter, CancellationToken, CloseOnce, ExtraCommand, LastLines, ProcessUnit};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::command::{Input, Source};
use crate::kvargs::option_args;
use crate::metadata::Metadata;
use crate::tools::{ToolRegistry, FFPROBE};

/// Side data type carrying the rotation of a video stream.
pub const SIDE_DATA_DISPLAY_MATRIX: &str = "Display Matrix";

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

/// Decoded ffprobe output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub format: ProbeFormat,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    /// The whole document as decoded JSON, including fields not mapped
    /// above.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeFormat {
    pub filename: Option<String>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub start_time: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    pub probe_score: Option<u32>,
    #[serde(default)]
    pub tags: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub index: u32,
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    pub profile: Option<String>,
    pub codec_type: Option<String>,
    pub codec_tag_string: Option<String>,
    pub sample_fmt: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub bits_per_sample: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub coded_width: Option<u32>,
    pub coded_height: Option<u32>,
    pub sample_aspect_ratio: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub pix_fmt: Option<String>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub time_base: Option<String>,
    pub start_time: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub nb_frames: Option<String>,
    #[serde(default)]
    pub tags: Metadata,
    #[serde(default)]
    pub side_data_list: Vec<SideData>,
}

/// Union of the side data fields we look at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideData {
    pub side_data_type: Option<String>,
    pub displaymatrix: Option<String>,
    /// Counter-clockwise rotation in degrees.
    pub rotation: Option<i32>,
}

impl ProbeStream {
    pub fn codec_type(&self) -> &str {
        self.codec_type.as_deref().unwrap_or("")
    }

    pub fn codec_name(&self) -> &str {
        self.codec_name.as_deref().unwrap_or("")
    }

    /// Rotation from the display matrix side data, 0 if absent.
    pub fn rotation(&self) -> i32 {
        self.side_data_list
            .iter()
            .find(|s| s.side_data_type.as_deref() == Some(SIDE_DATA_DISPLAY_MATRIX))
            .and_then(|s| s.rotation)
            .unwrap_or(0)
    }

    fn is_rotated(&self) -> bool {
        matches!(self.rotation(), 90 | -90 | 270 | -270)
    }

    /// Width as displayed, accounting for rotation.
    pub fn display_width(&self) -> u32 {
        if self.is_rotated() {
            self.height.unwrap_or(0)
        } else {
            self.width.unwrap_or(0)
        }
    }

    /// Height as displayed, accounting for rotation.
    pub fn display_height(&self) -> u32 {
        if self.is_rotated() {
            self.width.unwrap_or(0)
        } else {
            self.height.unwrap_or(0)
        }
    }

    /// Whether the stream is a still image such as embedded cover art.
    pub fn is_image(&self) -> bool {
        self.codec_type() == "video" && matches!(self.codec_name(), "png" | "jpeg")
    }

    /// Frame rate from `r_frame_rate`, e.g. `24000/1001`.
    pub fn frame_rate(&self) -> Option<f64> {
        self.r_frame_rate.as_deref().and_then(parse_frame_rate)
    }
}

impl ProbeResult {
    /// Decode an ffprobe JSON document. The raw form is kept whenever the
    /// document is valid JSON, even if the typed mapping fails.
    pub fn from_json(bytes: &[u8]) -> std::result::Result<Self, (Option<serde_json::Value>, Error)> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| (None, Error::decode(FFPROBE, e.to_string())))?;
        match ProbeResult::deserialize(&raw) {
            Ok(mut result) => {
                result.raw = raw;
                Ok(result)
            }
            Err(e) => Err((Some(raw), Error::decode(FFPROBE, e.to_string()))),
        }
    }

    /// First stream of `codec_type`.
    pub fn find_first_stream(&self, codec_type: &str) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.codec_type() == codec_type)
    }

    /// Codec name of the first video stream.
    pub fn first_video_codec(&self) -> Option<&str> {
        self.find_first_stream("video").map(|s| s.codec_name())
    }

    /// Codec name of the first audio stream.
    pub fn first_audio_codec(&self) -> Option<&str> {
        self.find_first_stream("audio").map(|s| s.codec_name())
    }

    /// Probed format name, the first value if comma separated.
    pub fn format_name(&self) -> &str {
        self.format
            .format_name
            .as_deref()
            .and_then(|n| n.split(',').next())
            .unwrap_or("")
    }

    /// Probed duration, zero if unknown.
    pub fn duration(&self) -> Duration {
        self.format
            .duration
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default()
    }
}

/// `format:codec:codec...`
impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_name())?;
        for s in &self.streams {
            write!(f, ":{}", s.codec_name())?;
        }
        Ok(())
    }
}

fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den != 0.0).then(|| num / den);
    }
    rate_str.parse().ok()
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// An ffprobe invocation on one input.
pub struct FfprobeCommand {
    program: PathBuf,
    /// Global flags, emitted after the fixed output options.
    pub flags: Vec<String>,
    pub input: Input,

    stderr_lines: usize,
    stderr_sinks: Vec<BoxWriter>,
    cancel: Option<CancellationToken>,

    cmd: Option<ExtraCommand>,
    stdout: Option<CloseOnce<Vec<u8>>>,
    stderr_tail: Option<CloseOnce<LastLines>>,
    result: Option<ProbeResult>,
    raw: Option<serde_json::Value>,
}

impl FfprobeCommand {
    /// Probe `input` with the `ffprobe` found by `tools`.
    pub fn new(tools: &ToolRegistry, input: Input) -> Result<Self> {
        Ok(Self::with_program(tools.ffprobe()?, input))
    }

    /// Probe `input` with `program`.
    pub fn with_program(program: impl Into<PathBuf>, input: Input) -> Self {
        Self {
            program: program.into(),
            flags: Vec::new(),
            input,
            stderr_lines: DEFAULT_STDERR_LINES,
            stderr_sinks: Vec::new(),
            cancel: None,
            cmd: None,
            stdout: None,
            stderr_tail: None,
            result: None,
            raw: None,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn flags(&mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn stderr(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> &mut Self {
        self.stderr_sinks.push(Box::new(writer));
        self
    }

    pub fn stderr_lines(&mut self, lines: usize) -> &mut Self {
        self.stderr_lines = if lines == 0 { DEFAULT_STDERR_LINES } else { lines };
        self
    }

    pub fn cancel_token(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// The argument vector. A stream input is passed as `pipe:0`.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.extend(self.flags.iter().cloned());
        args.extend(option_args(&self.input.options, ""));
        args.extend(self.input.flags.iter().cloned());
        if let Some(format) = &self.input.format {
            args.push("-f".into());
            args.push(format.clone());
        }
        args.push(match &self.input.source {
            Source::Path(p) => p.clone(),
            Source::Stream(_) => "pipe:0".into(),
        });
        args
    }

    pub fn start(&mut self) -> Result<()> {
        if self.cmd.is_some() || self.stdout.is_some() {
            return Err(Error::State("ffprobe command already started".into()));
        }

        let mut cmd = ExtraCommand::new(&self.program);
        cmd.args(self.args());
        if let Some(token) = &self.cancel {
            cmd.cancel_token(token.clone());
        }

        if matches!(self.input.source, Source::Stream(_)) {
            let bound = Source::Path("pipe:0".into());
            if let Source::Stream(stream) = std::mem::replace(&mut self.input.source, bound) {
                cmd.stdin(stream);
            }
        }

        let stdout = CloseOnce::new(Vec::new());
        cmd.stdout(stdout.clone());
        self.stdout = Some(stdout);

        let tail = CloseOnce::new(LastLines::last_lines(self.stderr_lines));
        cmd.stderr(tail.clone());
        for sink in self.stderr_sinks.drain(..) {
            cmd.stderr(sink);
        }
        self.stderr_tail = Some(tail);

        tracing::debug!("{cmd}");
        cmd.start()?;
        self.cmd = Some(cmd);
        Ok(())
    }

    /// Wait for ffprobe and decode its output. A process failure wins over
    /// a decode failure; both carry the stderr tail.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(cmd) = self.cmd.as_mut() else {
            return Err(Error::State("ffprobe command not started".into()));
        };
        let result = cmd.wait().await;
        if let Some(tail) = &self.stderr_tail {
            if let Err(e) = tail.close() {
                tracing::debug!("close failed: {e}");
            }
        }
        if let Err(e) = result {
            return Err(e.with_stderr(self.stderr_tail()));
        }

        let bytes = self
            .stdout
            .as_ref()
            .map(|out| out.with(std::mem::take))
            .unwrap_or_default();
        match ProbeResult::from_json(&bytes) {
            Ok(result) => {
                self.raw = Some(result.raw.clone());
                self.result = Some(result);
                Ok(())
            }
            Err((raw, e)) => {
                self.raw = raw;
                Err(e.with_stderr(self.stderr_tail()))
            }
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.start()?;
        self.wait().await
    }

    /// Run and return the decoded result.
    pub async fn result(&mut self) -> Result<ProbeResult> {
        self.run().await?;
        self.result
            .clone()
            .ok_or_else(|| Error::State("ffprobe produced no result".into()))
    }

    /// The decoded result after a successful wait.
    pub fn probe_result(&self) -> Option<&ProbeResult> {
        self.result.as_ref()
    }

    /// The raw JSON document, kept even when the typed mapping failed.
    pub fn raw(&self) -> Option<&serde_json::Value> {
        self.raw.as_ref()
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .as_ref()
            .map(|t| t.with(|lines| lines.render()))
            .unwrap_or_default()
    }
}

impl fmt::Debug for FfprobeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfprobeCommand")
            .field("program", &self.program)
            .field("flags", &self.flags)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProcessUnit for FfprobeCommand {
    async fn start(&mut self) -> Result<()> {
        FfprobeCommand::start(self)
    }

    async fn wait(&mut self) -> Result<()> {
        FfprobeCommand::wait(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SAMPLE: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "24000/1001",
                "nb_frames": "120",
                "side_data_list": [
                    {"side_data_type": "Display Matrix", "displaymatrix": "...", "rotation": -90}
                ]
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "44100",
                "channels": 2,
                "tags": {"language": "eng", "handler_name": "SoundHandler"}
            },
            {
                "index": 2,
                "codec_name": "mov_text",
                "codec_type": "subtitle",
                "disposition": {"default": 0}
            }
        ],
        "format": {
            "filename": "video.mp4",
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "12.500000",
            "probe_score": 100,
            "tags": {"title": "A title"}
        }
    }"#;

    #[test]
    fn decodes_sample() {
        let r = ProbeResult::from_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(r.streams.len(), 3);
        assert_eq!(r.format_name(), "mov");
        assert_eq!(r.duration(), Duration::from_millis(12_500));
        assert_eq!(r.first_video_codec(), Some("h264"));
        assert_eq!(r.first_audio_codec(), Some("aac"));
        assert_eq!(r.format.tags.title, "A title");
        assert_eq!(r.streams[1].tags.language, "eng");
        assert_eq!(r.to_string(), "mov:h264:aac:mov_text");
        assert_eq!(r.raw["streams"][2]["disposition"]["default"], 0);
    }

    #[test]
    fn rotation_swaps_display_size() {
        let r = ProbeResult::from_json(SAMPLE.as_bytes()).unwrap();
        let v = &r.streams[0];
        assert_eq!(v.rotation(), -90);
        assert_eq!((v.display_width(), v.display_height()), (1080, 1920));
        assert!((v.frame_rate().unwrap() - 23.976).abs() < 0.01);
        assert!(!v.is_image());
    }

    #[test]
    fn syntax_error_has_no_raw() {
        let (raw, err) = ProbeResult::from_json(b"{not json").unwrap_err();
        assert!(raw.is_none());
        assert_matches!(err, Error::Decode { .. });
    }

    #[test]
    fn type_error_keeps_raw() {
        let (raw, err) = ProbeResult::from_json(br#"{"streams": "nope"}"#).unwrap_err();
        assert_eq!(raw.unwrap()["streams"], "nope");
        assert_matches!(err, Error::Decode { .. });
    }

    #[test]
    fn empty_result_defaults() {
        let r = ProbeResult::default();
        assert_eq!(r.format_name(), "");
        assert_eq!(r.duration(), Duration::ZERO);
        assert!(r.find_first_stream("video").is_none());
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }

    #[test]
    fn args_for_path_and_stream() {
        let cmd = FfprobeCommand::with_program(
            "ffprobe",
            Input::path("in.mkv").option("probesize", "32").format("matroska"),
        );
        assert_eq!(
            cmd.args(),
            vec![
                "-hide_banner", "-print_format", "json", "-show_format", "-show_streams",
                "-probesize", "32", "-f", "matroska", "in.mkv",
            ]
        );

        let mut cmd = FfprobeCommand::with_program("ffprobe", Input::reader(tokio::io::empty()));
        cmd.flags(["-v", "error"]);
        let args = cmd.args();
        assert_eq!(args.last().map(String::as_str), Some("pipe:0"));
        assert!(args.windows(2).any(|w| w == ["-v", "error"]));
    }

    #[tokio::test]
    async fn missing_program_is_start_error() {
        let mut cmd = FfprobeCommand::with_program("/nonexistent/ffprobe-xyz", Input::path("x"));
        assert_matches!(cmd.run().await, Err(Error::Start { .. }));
    }
}
