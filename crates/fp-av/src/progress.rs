//! Decoder for ffmpeg's `-progress` protocol.
//!
//! ffmpeg writes blocks of `key=value` lines, each block terminated by a
//! `progress=continue` or `progress=end` line:
//!
//! ```text
//! frame=241
//! fps=79.81
//! stream_0_1_q=0.0
//! bitrate= 107.1kbits/s
//! total_size=116071
//! out_time_us=8674000
//! out_time=00:00:08.674000
//! speed=2.87x
//! progress=continue
//! ```

use serde::{Deserialize, Serialize};

use fp_exec::LineSink;

/// One progress snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub frame: i64,
    pub fps: f32,
    /// Per-output, per-stream quality figures.
    pub outputs: Vec<ProgressOutput>,
    /// Bits per second.
    pub bitrate: f32,
    pub total_size: i64,
    pub out_time_us: i64,
    pub out_time_ms: i64,
    /// Raw `out_time` text, e.g. `00:00:08.674000`.
    pub out_time: String,
    pub dup_frames: i64,
    pub drop_frames: i64,
    pub speed: f32,
    /// `continue` or `end`.
    pub progress: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressOutput {
    pub streams: Vec<ProgressStream>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressStream {
    pub q: f32,
    pub psnr_y: f32,
    pub psnr_u: f32,
    pub psnr_v: f32,
    pub psnr_all: f32,
}

impl Progress {
    /// Whether this is the final record of a run.
    pub fn is_end(&self) -> bool {
        self.progress == "end"
    }

    /// Apply one `key=value` line. Returns `true` when the line completes a
    /// record (its key is `progress`).
    ///
    /// Line terminators are ignored. Lines without `=` and malformed
    /// `stream_` keys leave the record untouched.
    pub fn apply_line(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some((name, raw)) = line.split_once('=') else {
            return false;
        };
        let value = raw.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');
        let int = value.parse::<i64>().unwrap_or(0);
        let float = value.parse::<f64>().unwrap_or(0.0) as f32;

        match name {
            "frame" => self.frame = int,
            "fps" => self.fps = float,
            "bitrate" => {
                let scale = if raw.ends_with("kbits/s") { 1000.0 } else { 1.0 };
                self.bitrate = float * scale;
            }
            "total_size" => self.total_size = int,
            "out_time_us" => self.out_time_us = int,
            "out_time_ms" => self.out_time_ms = int,
            "out_time" => self.out_time = raw.to_string(),
            "dup_frames" => self.dup_frames = int,
            "drop_frames" => self.drop_frames = int,
            "speed" => self.speed = float,
            "progress" => self.progress = raw.to_string(),
            _ if name.starts_with("stream_") => self.apply_stream(name, float),
            _ => {}
        }

        name == "progress"
    }

    /// `stream_<output>_<stream>_<metric>`
    fn apply_stream(&mut self, name: &str, value: f32) {
        let mut parts = name.splitn(4, '_').skip(1);
        let (Some(o), Some(s), Some(metric)) = (parts.next(), parts.next(), parts.next()) else {
            return;
        };
        let (Ok(o), Ok(s)) = (o.parse::<usize>(), s.parse::<usize>()) else {
            return;
        };

        if self.outputs.len() <= o {
            self.outputs.resize_with(o + 1, Default::default);
        }
        let streams = &mut self.outputs[o].streams;
        if streams.len() <= s {
            streams.resize_with(s + 1, Default::default);
        }
        let stream = &mut streams[s];
        match metric {
            "q" => stream.q = value,
            "psnr_y" => stream.psnr_y = value,
            "psnr_u" => stream.psnr_u = value,
            "psnr_v" => stream.psnr_v = value,
            "psnr_all" => stream.psnr_all = value,
            _ => {}
        }
    }
}

/// Callback invoked once per completed [`Progress`] record.
pub type ProgressFn = Box<dyn FnMut(&Progress) + Send>;

/// Rebuilds [`Progress`] records from lines and hands each completed record
/// to a callback, then starts a fresh one.
pub struct ProgressDecoder {
    current: Progress,
    callback: ProgressFn,
}

impl ProgressDecoder {
    pub fn new(callback: impl FnMut(&Progress) + Send + 'static) -> Self {
        Self {
            current: Progress::default(),
            callback: Box::new(callback),
        }
    }
}

impl LineSink for ProgressDecoder {
    fn line(&mut self, line: &str) {
        if self.current.apply_line(line) {
            let record = std::mem::take(&mut self.current);
            (self.callback)(&record);
        }
    }
}

impl std::fmt::Debug for ProgressDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressDecoder")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
