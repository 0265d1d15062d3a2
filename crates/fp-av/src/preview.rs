//! Preview planning.
//!
//! A [`PreviewPlan`] turns a probe result, a target [`Resolution`] and a
//! [`Cut`] into a filter graph that renders every stream of a file into one
//! PNG: audio streams as waveforms, video streams as a row of tiles, and
//! subtitle streams overlaid onto a grey box cut from the first video
//! stream. The strips are stacked vertically, top to bottom in stream order,
//! and [`PreviewPlan::strips`] records each strip's height so the image can
//! be cut back apart.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fp_core::config::PreviewConfig;
use fp_core::{Error, Result};
use tokio::io::AsyncWrite;

use crate::command::{FfmpegCommand, Input, Map, Output};
use crate::filter::{Filter, FilterGraph};
use crate::position::parse_position;
use crate::probe::{ProbeResult, ProbeStream};

const DEFAULT_TILE_WIDTH: u32 = 320;
const DEFAULT_TILE_HEIGHT: u32 = 200;
const AUDIO_CHANNEL_HEIGHT: u32 = 100;
const SUBTITLE_BOX_COLOR: &str = "#707070";
/// Upper bound on tiles per video strip.
pub const MAX_FRAMES: u32 = 1000;

/// Pixel budget for a preview and the cell size sizes are aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub width_align: u32,
    pub height_align: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            width_align: 1,
            height_align: 1,
        }
    }
}

impl From<&PreviewConfig> for Resolution {
    fn from(cfg: &PreviewConfig) -> Self {
        Self {
            width: cfg.width,
            height: cfg.height,
            width_align: cfg.width_align,
            height_align: cfg.height_align,
        }
    }
}

/// Time range to preview, in seconds.
///
/// Parsed from `[[hh:]mm:]ss[,delta[,duration]]`; a negative offset counts
/// back from the end of the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cut {
    pub offset: f64,
    pub delta: f64,
    pub duration: f64,
}

impl Default for Cut {
    fn default() -> Self {
        Self {
            offset: 0.0,
            delta: 1.0,
            duration: 5.0,
        }
    }
}

impl From<&PreviewConfig> for Cut {
    fn from(cfg: &PreviewConfig) -> Self {
        Self {
            offset: cfg.offset,
            delta: cfg.delta,
            duration: cfg.duration,
        }
    }
}

impl Cut {
    /// Resolve a negative offset against the probed file duration. The
    /// result is never before the start of the file.
    pub fn resolve(&self, file_duration: Duration) -> Cut {
        let mut cut = *self;
        if cut.offset < 0.0 {
            cut.offset = (file_duration.as_secs_f64() + cut.offset).max(0.0);
        }
        cut
    }

    /// Number of tiles per video strip, at least one.
    pub fn frames(&self) -> u32 {
        ((self.duration / self.delta) as u32).max(1)
    }

    fn validate(&self) -> Result<()> {
        if !(self.delta > 0.0 && self.delta.is_finite()) {
            return Err(Error::Config(format!("cut delta must be positive, got {}", self.delta)));
        }
        if !(self.duration > 0.0 && self.duration.is_finite()) {
            return Err(Error::Config(format!(
                "cut duration must be positive, got {}",
                self.duration
            )));
        }
        if self.duration / self.delta > MAX_FRAMES as f64 {
            return Err(Error::Config(format!(
                "cut of {}s every {}s needs more than {MAX_FRAMES} frames",
                self.duration, self.delta
            )));
        }
        Ok(())
    }
}

impl FromStr for Cut {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut cut = Cut::default();
        let mut parts = s.split(',');
        if let Some(offset) = parts.next().filter(|p| !p.is_empty()) {
            cut.offset = parse_position(offset)?;
        }
        let seconds = |field: &str, part: Option<&str>| -> Result<Option<f64>> {
            part.filter(|p| !p.is_empty())
                .map(|p| {
                    p.trim()
                        .parse::<f64>()
                        .map_err(|_| Error::Config(format!("invalid cut {field} {p:?}")))
                })
                .transpose()
        };
        if let Some(delta) = seconds("delta", parts.next())? {
            cut.delta = delta;
        }
        if let Some(duration) = seconds("duration", parts.next())? {
            cut.duration = duration;
        }
        if parts.next().is_some() {
            return Err(Error::Config(format!("invalid cut {s:?}")));
        }
        cut.validate()?;
        Ok(cut)
    }
}

impl fmt::Display for Cut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6},{:.6}", self.offset, self.delta, self.duration)
    }
}

/// One horizontal band of the rendered preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strip {
    pub stream_index: u32,
    pub codec_type: String,
    pub codec_name: String,
    pub height: u32,
}

/// Sizes, strips and filter graph for one preview render.
#[derive(Debug, Clone)]
pub struct PreviewPlan {
    pub cut: Cut,
    pub frames: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub audio_channel_height: u32,
    /// Width of every strip, `tile_width * frames`.
    pub width: u32,
    pub strips: Vec<Strip>,
    pub graph: FilterGraph,
}

fn align(value: u32, to: u32) -> u32 {
    value - value % to.max(1)
}

fn colorspace() -> Filter {
    // vstack takes its colorspace from the first input
    Filter::new("colorspace")
        .option("iall", "bt709")
        .option("all", "bt709")
        .option("trc", "srgb")
}

fn pad_even() -> Filter {
    Filter::new("pad")
        .option("width", "iw+mod(iw,2)")
        .option("height", "ih+mod(ih,2)")
}

impl PreviewPlan {
    /// Plan a preview of `probe` within `res`. `cut` must already be
    /// resolved against the file duration.
    pub fn new(probe: &ProbeResult, res: &Resolution, cut: &Cut) -> Result<Self> {
        cut.validate()?;
        let frames = cut.frames();

        let max_width = probe.streams.iter().map(ProbeStream::display_width).max().unwrap_or(0);
        let max_height = probe.streams.iter().map(ProbeStream::display_height).max().unwrap_or(0);

        let (mut tile_width, mut tile_height) = (DEFAULT_TILE_WIDTH, DEFAULT_TILE_HEIGHT);
        if max_width != 0 && max_height != 0 {
            tile_width = res.width / frames;
            tile_height = (max_height as f64 / (max_width as f64 / tile_width as f64)) as u32;
            if res.height != 0 && tile_height > res.height {
                tile_height = res.height;
                tile_width = (max_width as f64 * tile_height as f64 / max_height as f64) as u32;
            }
        }
        let tile_width = align(tile_width, res.width_align);
        let tile_height = align(tile_height, res.height_align);
        let audio_channel_height = align(AUDIO_CHANNEL_HEIGHT, res.height_align);
        if tile_width == 0 || tile_height == 0 {
            return Err(Error::Config(format!(
                "preview width {} is too small for {frames} frames",
                res.width
            )));
        }
        let width = tile_width.checked_mul(frames).ok_or_else(|| {
            Error::Config(format!("{frames} tiles of width {tile_width} overflow the preview width"))
        })?;

        let mut plan = PreviewPlan {
            cut: *cut,
            frames,
            tile_width,
            tile_height,
            audio_channel_height,
            width,
            strips: Vec::new(),
            graph: FilterGraph::new(),
        };
        plan.build_graph(probe);
        Ok(plan)
    }

    fn build_graph(&mut self, probe: &ProbeResult) {
        let subtitle_count = probe
            .streams
            .iter()
            .filter(|s| s.codec_type() == "subtitle")
            .count();
        // Subtitles are drawn over the first tiled video stream, if any.
        let subtitle_base = probe
            .streams
            .iter()
            .find(|s| s.codec_type() == "video" && !s.is_image())
            .map(|s| s.index);

        let video_select = format!(
            "if(between(t,0,{:.6}), if(isnan(prev_selected_t), 1, gte(t-prev_selected_t,{:.6})))",
            self.cut.duration, self.cut.delta
        );
        let audio_select = format!("between(t,0,{:.6})", self.cut.duration);

        let mut outs: Vec<String> = Vec::new();
        let mut subtitle_n = 0;
        for s in &probe.streams {
            let out = format!("out{}", outs.len());
            let input = format!("0:{}", s.index);
            let height = match s.codec_type() {
                "audio" => {
                    let height = self
                        .audio_channel_height
                        .saturating_mul(s.channels.unwrap_or(1).max(1));
                    self.graph.push(vec![
                        Filter::new("aselect").input(input).option("expr", &audio_select),
                        Filter::new("showwavespic")
                            .option("size", format!("{}x{height}", self.width))
                            .option("split_channels", 1)
                            .option("colors", "white"),
                        pad_even(),
                        colorspace().output(&out),
                    ]);
                    height
                }
                "video" if s.is_image() => {
                    let (width, height) = self.image_size(s);
                    self.graph.push(vec![
                        Filter::new("scale")
                            .input(input)
                            .option("w", width)
                            .option("h", height),
                        colorspace().output(&out),
                    ]);
                    height
                }
                "video" => {
                    let mut split = Filter::new("split").output(&out);
                    let mut split_outputs = 1;
                    if Some(s.index) == subtitle_base {
                        for i in 0..subtitle_count {
                            split = split.output(format!("subtitle_video{i}"));
                            split_outputs += 1;
                        }
                    }
                    self.graph.push(vec![
                        Filter::new("select").input(input).option("expr", &video_select),
                        Filter::new("scale")
                            .option("w", self.tile_width)
                            .option("h", self.tile_height),
                        Filter::new("tile")
                            .option("layout", format!("{}x1", self.frames))
                            .option("nb_frames", self.frames),
                        pad_even(),
                        colorspace(),
                        split.option("outputs", split_outputs),
                    ]);
                    self.tile_height
                }
                "subtitle" if subtitle_base.is_some() => {
                    let boxed = format!("subtitle_main{subtitle_n}");
                    self.graph.push(vec![Filter::new("drawbox")
                        .input(format!("subtitle_video{subtitle_n}"))
                        .option("color", SUBTITLE_BOX_COLOR)
                        .option("thickness", "fill")
                        .output(&boxed)]);
                    self.graph.push(vec![Filter::new("overlay")
                        .input(boxed)
                        .input(input)
                        .output(&out)]);
                    subtitle_n += 1;
                    self.tile_height
                }
                _ => continue,
            };
            outs.push(out);
            self.strips.push(Strip {
                stream_index: s.index,
                codec_type: s.codec_type().to_string(),
                codec_name: s.codec_name().to_string(),
                height,
            });
        }

        // vstack needs at least two inputs
        let last = if outs.len() > 1 {
            let n = outs.len();
            outs.into_iter()
                .fold(Filter::new("vstack"), |f, o| f.input(o))
                .option("inputs", n)
        } else {
            outs.into_iter().fold(Filter::new("copy"), |f, o| f.input(o))
        };
        self.graph.push(vec![last.output("out")]);
    }

    /// Still images keep their size unless wider than the strip, in which
    /// case they are scaled down to the strip width with an even height.
    fn image_size(&self, s: &ProbeStream) -> (u32, u32) {
        let (width, height) = (s.display_width(), s.display_height());
        if width <= self.width {
            return (width, height);
        }
        let mut scaled = (height as f64 / (width as f64 / self.width as f64)) as u32;
        scaled += scaled % 2;
        (self.width, scaled)
    }

    /// Total height of the stacked image.
    pub fn height(&self) -> u32 {
        self.strips.iter().map(|s| s.height).sum()
    }

    /// Whether any stream produced a strip.
    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }

    /// Build the ffmpeg command rendering `path` into a single PNG written
    /// to `png`.
    pub fn command(
        &self,
        program: impl Into<PathBuf>,
        path: impl Into<String>,
        png: impl AsyncWrite + Send + Unpin + 'static,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::with_program(program);
        cmd.add_input(Input::path(path).flags([
            "-ss".to_string(),
            format!("{:.6}", self.cut.offset),
            "-t".to_string(),
            format!("{:.6}", self.cut.duration),
        ]));
        cmd.filter_graph(self.graph.clone());
        cmd.add_output(
            Output::writer(png)
                .map(Map::from_specifier("[out]").codec("png"))
                .format("image2")
                .flags(["-frames", "1"]),
        );
        cmd
    }
}
