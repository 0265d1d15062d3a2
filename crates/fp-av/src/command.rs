//! Declarative ffmpeg command model and its argument compiler.
//!
//! An [`FfmpegCommand`] holds ordered inputs, ordered outputs, an optional
//! filter graph and global flags. [`FfmpegCommand::start`] binds every
//! in-process stream to an extra descriptor, compiles the argument vector
//! and launches ffmpeg. Compilation is deterministic: option maps are
//! emitted in sorted key order and descriptor numbers follow call order
//! (progress, then inputs, then outputs).
//!
//! # Example
//!
//! ```no_run
//! use fp_av::{FfmpegCommand, Input, Map, Output};
//!
//! # async fn example() -> fp_core::Result<()> {
//! let mut cmd = FfmpegCommand::with_program("ffmpeg");
//! let sine = cmd.add_input(Input::path("sine").format("lavfi").flags(["-t", "1"]));
//! cmd.add_output(
//!     Output::path("out.wav")
//!         .format("wav")
//!         .map(Map::from_input(sine).specifier("a:0").codec("pcm_s16le")),
//! );
//! cmd.run().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fp_core::config::DEFAULT_STDERR_LINES;
use fp_core::{Error, Result};
use fp_exec::{
    BoxWriter, CancellationToken, CloseOnce, Closer, ExtraCommand, InputStream, LastLines,
    LineBuffer, OutputStream, ProcessUnit, FIRST_EXTRA_FD,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::filter::FilterGraph;
use crate::kvargs::{option_args, sorted_args, Options};
use crate::metadata::Metadata;
use crate::progress::{Progress, ProgressDecoder, ProgressFn};
use crate::tools::ToolRegistry;

static NEXT_INPUT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an [`Input`], used by [`Map`]s to refer to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId(u64);

impl InputId {
    fn next() -> Self {
        InputId(NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identity, as reported in resolution errors.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Where an input comes from.
#[derive(Debug)]
pub enum Source {
    /// A path or URL passed verbatim.
    Path(String),
    /// An in-process stream, passed as `pipe:<n>`.
    Stream(InputStream),
}

/// Where an output goes.
#[derive(Debug)]
pub enum Sink {
    /// A path or URL passed verbatim.
    Path(String),
    /// An in-process stream, passed as `pipe:<n>`.
    Stream(OutputStream),
}

/// One `-i` input.
#[derive(Debug)]
pub struct Input {
    id: InputId,
    pub source: Source,
    pub format: Option<String>,
    pub options: Options,
    pub flags: Vec<String>,
}

impl Input {
    fn new(source: Source) -> Self {
        Self {
            id: InputId::next(),
            source,
            format: None,
            options: Options::new(),
            flags: Vec::new(),
        }
    }

    /// Read from a path or URL.
    pub fn path(path: impl Into<String>) -> Self {
        Self::new(Source::Path(path.into()))
    }

    /// Read from a stream or descriptor.
    pub fn stream(stream: impl Into<InputStream>) -> Self {
        Self::new(Source::Stream(stream.into()))
    }

    /// Read from an in-process reader.
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::new(Source::Stream(InputStream::reader(reader)))
    }

    /// Identity to refer to this input from a [`Map`].
    pub fn id(&self) -> InputId {
        self.id
    }

    /// Force the input format (`-f`).
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set an input option, emitted as `-key value`.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Append raw flags, emitted verbatim before `-i`.
    pub fn flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }
}

/// Binds one output stream slot to an input and/or a stream specifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Map {
    pub input: Option<InputId>,
    /// Stream specifier such as `0`, `a:0` or `[label]`.
    pub specifier: Option<String>,
    pub codec: Option<String>,
    /// Per-stream options, emitted as `-key:<slot> value`.
    pub options: Options,
    pub flags: Vec<String>,
}

impl Map {
    /// A map with nothing set. Add an input or a specifier before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map streams of `input`.
    pub fn from_input(input: InputId) -> Self {
        Self {
            input: Some(input),
            ..Self::default()
        }
    }

    /// Map a filter graph output label or any other specifier.
    pub fn from_specifier(specifier: impl Into<String>) -> Self {
        Self::new().specifier(specifier)
    }

    /// Stream specifier, appended after the input index as `<index>:<spec>`.
    pub fn specifier(mut self, specifier: impl Into<String>) -> Self {
        self.specifier = Some(specifier.into());
        self
    }

    /// Codec for this slot, emitted as `-codec:<slot>`.
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    /// Set a per-stream option, emitted as `-key:<slot> value`.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Append raw flags, emitted verbatim after this map's options.
    pub fn flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }
}

/// One output file.
#[derive(Debug)]
pub struct Output {
    pub sink: Sink,
    pub maps: Vec<Map>,
    pub format: Option<String>,
    pub metadata: Option<Metadata>,
    pub options: Options,
    pub flags: Vec<String>,
}

impl Output {
    fn new(sink: Sink) -> Self {
        Self {
            sink,
            maps: Vec::new(),
            format: None,
            metadata: None,
            options: Options::new(),
            flags: Vec::new(),
        }
    }

    /// Write to a path or URL.
    pub fn path(path: impl Into<String>) -> Self {
        Self::new(Sink::Path(path.into()))
    }

    /// Write to a stream or descriptor.
    pub fn stream(stream: impl Into<OutputStream>) -> Self {
        Self::new(Sink::Stream(stream.into()))
    }

    /// Write to an in-process writer.
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::new(Sink::Stream(OutputStream::writer(writer)))
    }

    /// Add a stream slot. Slots are numbered in the order maps are added.
    pub fn map(mut self, map: Map) -> Self {
        self.maps.push(map);
        self
    }

    /// Force the output format (`-f`).
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set container tags, emitted as sorted `-metadata key=value` pairs.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set an output option, emitted as `-key value`.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Append raw flags, emitted verbatim before the output path.
    pub fn flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }
}

fn pipe_arg(fd: RawFd) -> String {
    format!("pipe:{fd}")
}

/// Hands out the descriptor numbers a real start would assign.
struct DryRun {
    next: RawFd,
}

impl DryRun {
    fn pipe(&mut self) -> String {
        let arg = pipe_arg(self.next);
        self.next += 1;
        arg
    }
}

/// An ffmpeg invocation.
pub struct FfmpegCommand {
    program: PathBuf,
    /// Global flags, emitted after `-nostdin -hide_banner`.
    pub flags: Vec<String>,
    pub inputs: Vec<Input>,
    pub filter_graph: Option<FilterGraph>,
    pub outputs: Vec<Output>,

    stderr_lines: usize,
    stderr_sinks: Vec<BoxWriter>,
    progress_fn: Option<ProgressFn>,
    cancel: Option<CancellationToken>,
    close_after_start: Vec<Box<dyn Closer>>,
    close_after_wait: Vec<Box<dyn Closer>>,

    cmd: Option<ExtraCommand>,
    started_args: Option<Vec<String>>,
    stderr_tail: Option<CloseOnce<LastLines>>,
    progress: Option<CloseOnce<LineBuffer<ProgressDecoder>>>,
}

impl FfmpegCommand {
    /// A command running the `ffmpeg` found by `tools`.
    pub fn new(tools: &ToolRegistry) -> Result<Self> {
        Ok(Self::with_program(tools.ffmpeg()?))
    }

    /// A command running `program`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            flags: Vec::new(),
            inputs: Vec::new(),
            filter_graph: None,
            outputs: Vec::new(),
            stderr_lines: DEFAULT_STDERR_LINES,
            stderr_sinks: Vec::new(),
            progress_fn: None,
            cancel: None,
            close_after_start: Vec::new(),
            close_after_wait: Vec::new(),
            cmd: None,
            started_args: None,
            stderr_tail: None,
            progress: None,
        }
    }

    /// The ffmpeg executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Append global flags.
    pub fn flags(&mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Append an input and return its identity for use in [`Map`]s.
    pub fn add_input(&mut self, input: Input) -> InputId {
        let id = input.id;
        self.inputs.push(input);
        id
    }

    /// Append an output. Outputs are emitted in the order added.
    pub fn add_output(&mut self, output: Output) -> &mut Self {
        self.outputs.push(output);
        self
    }

    /// Set the `-filter_complex` graph. An empty graph is omitted.
    pub fn filter_graph(&mut self, graph: FilterGraph) -> &mut Self {
        self.filter_graph = Some(graph);
        self
    }

    /// Request `-progress` reporting; `callback` runs once per record.
    pub fn on_progress(&mut self, callback: impl FnMut(&Progress) + Send + 'static) -> &mut Self {
        self.progress_fn = Some(Box::new(callback));
        self
    }

    /// Also send ffmpeg's stderr to `writer`.
    pub fn stderr(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> &mut Self {
        self.stderr_sinks.push(Box::new(writer));
        self
    }

    /// Number of stderr lines kept for error reports. 0 means the default.
    pub fn stderr_lines(&mut self, lines: usize) -> &mut Self {
        self.stderr_lines = if lines == 0 { DEFAULT_STDERR_LINES } else { lines };
        self
    }

    /// Kill ffmpeg when `token` is cancelled.
    pub fn cancel_token(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Close `closer` once ffmpeg has started.
    pub fn close_after_start(&mut self, closer: impl Closer + 'static) -> &mut Self {
        self.close_after_start.push(Box::new(closer));
        self
    }

    /// Close `closer` once ffmpeg has been waited for.
    pub fn close_after_wait(&mut self, closer: impl Closer + 'static) -> &mut Self {
        self.close_after_wait.push(Box::new(closer));
        self
    }

    /// The argument vector. Before start this is a dry run that binds
    /// nothing but numbers streams exactly as start will; after start it is
    /// the vector that was used.
    pub fn args(&self) -> Result<Vec<String>> {
        if let Some(args) = &self.started_args {
            return Ok(args.clone());
        }
        let mut dry = DryRun {
            next: FIRST_EXTRA_FD,
        };
        let progress = self.progress_fn.is_some().then(|| dry.pipe());
        self.compile(progress, &mut dry)
    }

    fn compile(&self, progress: Option<String>, dry: &mut DryRun) -> Result<Vec<String>> {
        let mut args: Vec<String> = vec!["-nostdin".into(), "-hide_banner".into()];
        args.extend(self.flags.iter().cloned());

        if let Some(progress) = progress {
            args.push("-progress".into());
            args.push(progress);
        }

        if let Some(graph) = self.filter_graph.as_ref().filter(|g| !g.is_empty()) {
            args.push("-filter_complex".into());
            args.push(graph.to_string());
        }

        let mut positions = HashMap::with_capacity(self.inputs.len());
        for (index, input) in self.inputs.iter().enumerate() {
            positions.insert(input.id, index);
            args.extend(option_args(&input.options, ""));
            args.extend(input.flags.iter().cloned());
            if let Some(format) = &input.format {
                args.push("-f".into());
                args.push(format.clone());
            }
            args.push("-i".into());
            args.push(match &input.source {
                Source::Path(p) => p.clone(),
                Source::Stream(_) => dry.pipe(),
            });
        }

        for output in &self.outputs {
            for (slot, map) in output.maps.iter().enumerate() {
                let mut spec = Vec::with_capacity(2);
                if let Some(id) = map.input {
                    let index = positions
                        .get(&id)
                        .ok_or(Error::Resolution { input: id.value() })?;
                    spec.push(index.to_string());
                }
                if let Some(s) = &map.specifier {
                    spec.push(s.clone());
                }
                args.push("-map".into());
                args.push(spec.join(":"));

                if let Some(codec) = &map.codec {
                    args.push(format!("-codec:{slot}"));
                    args.push(codec.clone());
                }
                args.extend(option_args(&map.options, &format!(":{slot}")));
                args.extend(map.flags.iter().cloned());
            }

            if let Some(format) = &output.format {
                args.push("-f".into());
                args.push(format.clone());
            }
            if let Some(metadata) = &output.metadata {
                args.extend(sorted_args(&metadata.to_map(), |k, v| {
                    ["-metadata".to_string(), format!("{k}={v}")]
                }));
            }
            args.extend(option_args(&output.options, ""));
            args.extend(output.flags.iter().cloned());
            args.push(match &output.sink {
                Sink::Path(p) => p.clone(),
                Sink::Stream(_) => dry.pipe(),
            });
        }

        Ok(args)
    }

    /// Bind progress, then input streams, then output streams to `cmd`.
    /// Bound endpoints are replaced by their `pipe:<n>` paths.
    fn bind_streams(
        &mut self,
        cmd: &mut ExtraCommand,
        progress: Option<CloseOnce<LineBuffer<ProgressDecoder>>>,
    ) -> Result<Option<String>> {
        let progress_arg = match progress {
            Some(decoder) => Some(pipe_arg(cmd.bind_output(OutputStream::writer(decoder))?)),
            None => None,
        };

        for input in &mut self.inputs {
            if matches!(input.source, Source::Stream(_)) {
                let placeholder = Source::Path(pipe_arg(cmd.next_fd()));
                if let Source::Stream(stream) = std::mem::replace(&mut input.source, placeholder) {
                    cmd.bind_input(stream)?;
                }
            }
        }
        for output in &mut self.outputs {
            if matches!(output.sink, Sink::Stream(_)) {
                let placeholder = Sink::Path(pipe_arg(cmd.next_fd()));
                if let Sink::Stream(stream) = std::mem::replace(&mut output.sink, placeholder) {
                    cmd.bind_output(stream)?;
                }
            }
        }

        Ok(progress_arg)
    }

    fn close_registered(&mut self) {
        for closer in self
            .close_after_start
            .drain(..)
            .chain(self.close_after_wait.drain(..))
        {
            if let Err(e) = closer.close() {
                tracing::debug!("close failed: {e}");
            }
        }
    }

    /// Bind streams, compile and launch ffmpeg.
    ///
    /// Map resolution is checked before anything is bound, so a
    /// [`Error::Resolution`] leaves the command's streams untouched.
    pub fn start(&mut self) -> Result<()> {
        if self.cmd.is_some() || self.started_args.is_some() {
            return Err(Error::State("ffmpeg command already started".into()));
        }
        if let Err(e) = self.args() {
            self.close_registered();
            return Err(e);
        }

        let mut cmd = ExtraCommand::new(&self.program);
        if let Some(token) = &self.cancel {
            cmd.cancel_token(token.clone());
        }

        let progress = self
            .progress_fn
            .take()
            .map(|callback| CloseOnce::new(LineBuffer::new(ProgressDecoder::new(callback))));
        self.progress = progress.clone();

        let progress_arg = match self.bind_streams(&mut cmd, progress) {
            Ok(arg) => arg,
            Err(e) => {
                self.close_registered();
                return Err(e);
            }
        };
        let mut dry = DryRun {
            next: cmd.next_fd(),
        };
        let args = match self.compile(progress_arg, &mut dry) {
            Ok(args) => args,
            Err(e) => {
                self.close_registered();
                return Err(e);
            }
        };

        for closer in self.close_after_start.drain(..) {
            cmd.close_after_start(closer);
        }
        for closer in self.close_after_wait.drain(..) {
            cmd.close_after_wait(closer);
        }

        let tail = CloseOnce::new(LastLines::last_lines(self.stderr_lines));
        cmd.stderr(tail.clone());
        for sink in self.stderr_sinks.drain(..) {
            cmd.stderr(sink);
        }
        self.stderr_tail = Some(tail);

        cmd.args(args.iter().cloned());
        tracing::debug!("{cmd}");
        self.started_args = Some(args);

        cmd.start()?;
        self.cmd = Some(cmd);
        Ok(())
    }

    /// Wait for ffmpeg to exit. Failures carry the stderr tail.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(cmd) = self.cmd.as_mut() else {
            return Err(Error::State("ffmpeg command not started".into()));
        };
        let result = cmd.wait().await;

        for closable in [
            self.progress.as_ref().map(|p| p as &dyn Closer),
            self.stderr_tail.as_ref().map(|t| t as &dyn Closer),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = closable.close() {
                tracing::debug!("close failed: {e}");
            }
        }

        result.map_err(|e| e.with_stderr(self.stderr_tail()))
    }

    /// Start and wait.
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;
        self.wait().await
    }

    /// The last stderr lines captured so far.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .as_ref()
            .map(|t| t.with(|lines| lines.render()))
            .unwrap_or_default()
    }
}

impl fmt::Display for FfmpegCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        match self.args() {
            Ok(args) => {
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Err(e) => write!(f, " <{e}>"),
        }
    }
}

impl fmt::Debug for FfmpegCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegCommand")
            .field("program", &self.program)
            .field("flags", &self.flags)
            .field("inputs", &self.inputs)
            .field("filter_graph", &self.filter_graph)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProcessUnit for FfmpegCommand {
    async fn start(&mut self) -> Result<()> {
        FfmpegCommand::start(self)
    }

    async fn wait(&mut self) -> Result<()> {
        FfmpegCommand::wait(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use assert_matches::assert_matches;

    fn strs(args: &[String]) -> Vec<&str> {
        args.iter().map(String::as_str).collect()
    }

    #[test]
    fn minimal_command() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        let i = cmd.add_input(Input::path("in.wav"));
        cmd.add_output(Output::path("out.mp3").map(Map::from_input(i)));
        assert_eq!(
            strs(&cmd.args().unwrap()),
            vec!["-nostdin", "-hide_banner", "-i", "in.wav", "-map", "0", "out.mp3"]
        );
    }

    #[test]
    fn full_ordering() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        cmd.flags(["-y"]);
        let i1 = cmd.add_input(
            Input::path("test")
                .option("threads", "2")
                .option("-ss", "1")
                .flags(["-re"]),
        );
        let i2 = cmd.add_input(Input::reader(tokio::io::empty()).format("wav"));
        cmd.add_output(
            Output::path("output")
                .map(
                    Map::from_input(i1)
                        .specifier("a")
                        .codec("mp3")
                        .option("threads", "4"),
                )
                .map(Map::from_input(i2).specifier("a").flags(["-ac", "1"]))
                .format("mp4")
                .metadata(Metadata {
                    title: "title".into(),
                    artist: "me".into(),
                    ..Default::default()
                })
                .option("b", "128k")
                .flags(["-codec:a", "aac"]),
        );

        assert_eq!(
            strs(&cmd.args().unwrap()),
            vec![
                "-nostdin", "-hide_banner", "-y",
                "-ss", "1", "-threads", "2", "-re", "-i", "test",
                "-f", "wav", "-i", "pipe:3",
                "-map", "0:a", "-codec:0", "mp3", "-threads:0", "4",
                "-map", "1:a", "-ac", "1",
                "-f", "mp4",
                "-metadata", "artist=me", "-metadata", "title=title",
                "-b", "128k",
                "-codec:a", "aac",
                "output",
            ]
        );
    }

    #[test]
    fn map_index_follows_input_position_not_map_order() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        let a = cmd.add_input(Input::path("a"));
        let b = cmd.add_input(Input::path("b"));
        let c = cmd.add_input(Input::path("c"));
        cmd.add_output(
            Output::path("o")
                .map(Map::from_input(c))
                .map(Map::from_input(a))
                .map(Map::from_input(b).specifier("v:0")),
        );
        let args = cmd.args().unwrap();
        let maps: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(maps, vec!["2", "0", "1:v:0"]);
    }

    #[test]
    fn foreign_input_is_resolution_error() {
        let other = Input::path("elsewhere");
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        cmd.add_input(Input::path("a"));
        cmd.add_output(Output::path("o").map(Map::from_input(other.id())));
        assert_matches!(cmd.args(), Err(Error::Resolution { input }) if input == other.id().value());
        assert_matches!(cmd.start(), Err(Error::Resolution { .. }));
    }

    #[test]
    fn progress_and_streams_are_numbered_in_call_order() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        cmd.on_progress(|_| {});
        let i1 = cmd.add_input(Input::reader(tokio::io::empty()));
        cmd.add_input(Input::path("file"));
        cmd.add_input(Input::reader(tokio::io::empty()));
        cmd.add_output(Output::writer(tokio::io::sink()).map(Map::from_input(i1)));
        let args = cmd.args().unwrap();
        let pipes: Vec<&str> = args
            .iter()
            .filter(|a| a.starts_with("pipe:"))
            .map(String::as_str)
            .collect();
        assert_eq!(pipes, vec!["pipe:3", "pipe:4", "pipe:5", "pipe:6"]);
        assert_eq!(args[2..4], ["-progress".to_string(), "pipe:3".to_string()]);
    }

    #[test]
    fn filter_graph_is_escaped_only_inside_filter_complex() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        cmd.add_input(Input::path("in,put:1"));
        cmd.filter_graph(FilterGraph::from(vec![vec![Filter::new("aselect")
            .input("0:0")
            .option("expr", "between(t,0,5)")
            .output("out")]]));
        cmd.add_output(
            Output::path("o")
                .map(Map::from_specifier("[out]"))
                .option("metadata", "a,b:c"),
        );
        let args = cmd.args().unwrap();
        let fc = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[fc + 1], "[0:0]aselect=expr=between(t\\,0\\,5)[out]");
        assert!(args.contains(&"in,put:1".to_string()));
        assert!(args.contains(&"a,b:c".to_string()));
        assert_eq!(args.iter().filter(|a| a.contains('\\')).count(), 1);
    }

    #[test]
    fn empty_filter_graph_is_omitted() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        cmd.filter_graph(FilterGraph::new());
        assert!(!cmd.args().unwrap().contains(&"-filter_complex".to_string()));
    }

    #[test]
    fn compile_is_deterministic() {
        let build = || {
            let mut cmd = FfmpegCommand::with_program("ffmpeg");
            cmd.add_input(
                Input::path("x")
                    .option("z", "1")
                    .option("a", "2")
                    .option("m", "3"),
            );
            cmd.args().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn display_shows_command_line() {
        let mut cmd = FfmpegCommand::with_program("/usr/bin/ffmpeg");
        cmd.add_input(Input::path("a.wav"));
        assert_eq!(
            cmd.to_string(),
            "/usr/bin/ffmpeg -nostdin -hide_banner -i a.wav"
        );
    }

    #[tokio::test]
    async fn wait_before_start_is_state_error() {
        let mut cmd = FfmpegCommand::with_program("ffmpeg");
        assert_matches!(cmd.wait().await, Err(Error::State(_)));
    }

    #[tokio::test]
    async fn missing_program_is_start_error() {
        let mut cmd = FfmpegCommand::with_program("/nonexistent/ffmpeg-xyz");
        let guard = CloseOnce::new(Vec::new());
        cmd.close_after_wait(guard.clone());
        cmd.add_input(Input::reader(tokio::io::empty()));
        assert_matches!(cmd.start(), Err(Error::Start { .. }));
        assert!(guard.is_closed());
        assert_matches!(cmd.start(), Err(Error::State(_)));
    }
}
