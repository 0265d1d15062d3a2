//! Preview rendering.
//!
//! Probes a file, plans a preview, runs ffmpeg into an in-memory PNG and
//! cuts that image back into one image per stream.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fp_av::{
    duration_to_position, Cut, FfprobeCommand, Input, PreviewPlan, ProbeResult, ProbeStream,
    Resolution, Strip, ToolRegistry,
};
use fp_exec::{CancellationToken, CloseOnce};
use image::{DynamicImage, ImageFormat};

/// How to render a preview.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub resolution: Resolution,
    pub cut: Cut,
    pub stderr_lines: usize,
    /// Log the ffmpeg command line and tee its stderr to ours.
    pub debug: bool,
}

/// The per-stream images of one file.
#[derive(Debug)]
pub struct Rendered {
    pub probe: ProbeResult,
    pub plan: PreviewPlan,
    pub images: Vec<StreamImage>,
}

#[derive(Debug)]
pub struct StreamImage {
    pub strip: Strip,
    pub image: DynamicImage,
}

impl Rendered {
    /// `format: H:MM:SS`
    pub fn summary(&self) -> String {
        format!(
            "{}: {}",
            self.probe.format_name(),
            duration_to_position(self.probe.duration())
        )
    }

    /// Write every image to `dir` as `<stem>-<index>-<codec_type>.png` and
    /// return the written paths.
    pub fn save(&self, source: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        let mut written = Vec::with_capacity(self.images.len());
        for image in &self.images {
            let path = dir.join(output_name(source, &image.strip));
            image
                .image
                .save_with_format(&path, ImageFormat::Png)
                .with_context(|| format!("Failed to write image file: {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}

/// `<stem>-<stream index>-<codec type>.png`
pub fn output_name(source: &Path, strip: &Strip) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preview".to_string());
    format!("{stem}-{}-{}.png", strip.stream_index, strip.codec_type)
}

/// One-line description of a stream.
pub fn describe_stream(s: &ProbeStream) -> String {
    let mut line = format!(
        "{}: {} {} {}b/s",
        s.index,
        s.codec_name(),
        s.codec_type(),
        s.bit_rate.as_deref().unwrap_or("?")
    );
    match s.codec_type() {
        "audio" => line.push_str(&format!(
            " {} Hz {} ch {} bit",
            s.sample_rate.as_deref().unwrap_or("?"),
            s.channels.unwrap_or(0),
            s.bits_per_sample.unwrap_or(0)
        )),
        "video" => line.push_str(&format!(
            " {}x{} ({})",
            s.display_width(),
            s.display_height(),
            s.rotation()
        )),
        "subtitle" => {
            if !s.tags.language.is_empty() {
                line.push_str(&format!(" {}", s.tags.language));
            }
        }
        _ => {}
    }
    line
}

/// Probe `path` with ffprobe.
pub async fn probe(
    tools: &ToolRegistry,
    path: &Path,
    stderr_lines: usize,
    cancel: &CancellationToken,
) -> Result<ProbeResult> {
    let mut cmd = FfprobeCommand::new(tools, Input::path(path.to_string_lossy()))?;
    cmd.stderr_lines(stderr_lines).cancel_token(cancel.clone());
    let result = cmd
        .result()
        .await
        .with_context(|| format!("Failed to probe {}", path.display()))?;
    Ok(result)
}

/// Render a preview of every stream of `path`.
pub async fn render_file(
    tools: &ToolRegistry,
    path: &Path,
    opts: &RenderOptions,
    cancel: &CancellationToken,
) -> Result<Rendered> {
    let probe = probe(tools, path, opts.stderr_lines, cancel).await?;
    let cut = opts.cut.resolve(probe.duration());
    let plan = PreviewPlan::new(&probe, &opts.resolution, &cut)
        .with_context(|| format!("Failed to plan preview of {}", path.display()))?;
    if plan.is_empty() {
        anyhow::bail!("{}: no previewable streams", path.display());
    }

    let png = CloseOnce::new(Vec::new());
    let mut cmd = plan.command(tools.ffmpeg()?, path.to_string_lossy(), png.clone());
    cmd.stderr_lines(opts.stderr_lines).cancel_token(cancel.clone());
    if opts.debug {
        cmd.stderr(tokio::io::stderr());
        tracing::info!("{cmd}");
    } else {
        tracing::debug!("{cmd}");
    }
    cmd.run()
        .await
        .with_context(|| format!("Failed to render preview of {}", path.display()))?;

    let bytes = png.with(std::mem::take);
    let images = split_strips(&bytes, &plan)?;
    Ok(Rendered {
        probe,
        plan,
        images,
    })
}

/// Cut the stacked preview image into one image per strip, top to bottom.
pub fn split_strips(png: &[u8], plan: &PreviewPlan) -> Result<Vec<StreamImage>> {
    let stacked = image::load_from_memory_with_format(png, ImageFormat::Png)
        .context("Failed to decode preview image")?;
    let width = plan.width.min(stacked.width());

    let mut images = Vec::with_capacity(plan.strips.len());
    let mut dy = 0;
    for strip in &plan.strips {
        if strip.height == 0 {
            continue;
        }
        if dy + strip.height > stacked.height() {
            tracing::warn!(
                "preview image is {} pixels high, expected at least {}; dropping remaining strips",
                stacked.height(),
                dy + strip.height
            );
            break;
        }
        images.push(StreamImage {
            strip: strip.clone(),
            image: stacked.crop_imm(0, dy, width, strip.height),
        });
        dy += strip.height;
    }
    Ok(images)
}
