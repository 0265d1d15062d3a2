//! Process execution with extra inherited streams.
//!
//! [`ExtraCommand`] starts a child process the way [`tokio::process::Command`]
//! does, but lets the caller attach any number of additional readable or
//! writable streams. Each attached stream shows up in the child as descriptor
//! `3 + n`, where `n` is the number of streams attached before it.
//!
//! Streams already backed by a descriptor are handed to the child directly.
//! Everything else goes through a close-on-exec pipe whose host end is driven
//! by a background copy task. Copy tasks are launched by
//! [`start`](ExtraCommand::start) and joined by [`wait`](ExtraCommand::wait),
//! so every byte has been transferred once `wait` returns.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use fp_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::close::{Closer, FdGuard};
use crate::group::ProcessUnit;

/// Descriptor number of the first extra stream in the child.
pub const FIRST_EXTRA_FD: RawFd = 3;

/// Boxed in-process reader.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed in-process writer.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Something the child reads from.
///
/// Descriptors converted with `From` are marked close-on-exec right away,
/// so no other child started before this one is bound inherits them.
pub enum InputStream {
    /// An open descriptor, inherited as is.
    Fd(OwnedFd),
    /// An in-process reader, fed to the child through a pipe.
    Reader(BoxReader),
}

impl InputStream {
    /// Wrap an in-process reader.
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        InputStream::Reader(Box::new(reader))
    }
}

impl From<OwnedFd> for InputStream {
    fn from(fd: OwnedFd) -> Self {
        mark_cloexec(&fd);
        InputStream::Fd(fd)
    }
}

impl From<File> for InputStream {
    fn from(file: File) -> Self {
        OwnedFd::from(file).into()
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputStream::Fd(fd) => f.debug_tuple("Fd").field(&fd.as_raw_fd()).finish(),
            InputStream::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Something the child writes to.
///
/// Descriptors converted with `From` are marked close-on-exec right away,
/// like [`InputStream`].
pub enum OutputStream {
    /// An open descriptor, inherited as is.
    Fd(OwnedFd),
    /// An in-process writer, filled from a pipe.
    Writer(BoxWriter),
}

impl OutputStream {
    /// Wrap an in-process writer.
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        OutputStream::Writer(Box::new(writer))
    }
}

impl From<OwnedFd> for OutputStream {
    fn from(fd: OwnedFd) -> Self {
        mark_cloexec(&fd);
        OutputStream::Fd(fd)
    }
}

impl From<File> for OutputStream {
    fn from(file: File) -> Self {
        OwnedFd::from(file).into()
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Fd(fd) => f.debug_tuple("Fd").field(&fd.as_raw_fd()).finish(),
            OutputStream::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Work for one background copy task, created at bind time and launched at
/// start.
enum CopyJob {
    /// Reader -> host write end of a pipe.
    Feed { label: String, reader: BoxReader, pipe: OwnedFd },
    /// Host read end of a pipe -> writer.
    Drain { label: String, pipe: OwnedFd, writer: BoxWriter },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Running,
    Done,
}

/// A child process with extra inherited streams.
pub struct ExtraCommand {
    program: PathBuf,
    args: Vec<String>,
    /// Descriptors the child inherits at 3, 4, ...; kept open by the guards
    /// in `close_after_start`.
    extra_fds: Vec<RawFd>,
    close_after_start: Vec<Box<dyn Closer>>,
    close_after_wait: Vec<Box<dyn Closer>>,
    jobs: Vec<CopyJob>,
    tasks: Vec<JoinHandle<Result<()>>>,
    stdin: Option<InputStream>,
    stdout: Vec<BoxWriter>,
    stderr: Vec<BoxWriter>,
    cancel: Option<CancellationToken>,
    child: Option<Child>,
    phase: Phase,
}

impl ExtraCommand {
    /// Create a command for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extra_fds: Vec::new(),
            close_after_start: Vec::new(),
            close_after_wait: Vec::new(),
            jobs: Vec::new(),
            tasks: Vec::new(),
            stdin: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            cancel: None,
            child: None,
            phase: Phase::Ready,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Connect the child's stdin. Unset stdin reads from the null device.
    pub fn stdin(&mut self, stream: InputStream) -> &mut Self {
        self.stdin = Some(stream);
        self
    }

    /// Add a writer receiving everything the child writes to stdout.
    pub fn stdout(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> &mut Self {
        self.stdout.push(Box::new(writer));
        self
    }

    /// Add a writer receiving everything the child writes to stderr.
    pub fn stderr(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> &mut Self {
        self.stderr.push(Box::new(writer));
        self
    }

    /// Kill the child when `token` is cancelled.
    pub fn cancel_token(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// The program being run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Descriptor number the next bound stream will get.
    pub fn next_fd(&self) -> RawFd {
        FIRST_EXTRA_FD + self.extra_fds.len() as RawFd
    }

    /// Attach a stream the child reads from and return its descriptor
    /// number.
    pub fn bind_input(&mut self, stream: InputStream) -> Result<RawFd> {
        self.ensure_phase(Phase::Ready, "bind_input")?;
        let n = self.next_fd();
        match stream {
            InputStream::Fd(fd) => {
                set_cloexec(fd.as_raw_fd()).map_err(|source| Error::Bind { source })?;
                self.inherit(fd);
                debug!(fd = n, "bound input descriptor");
            }
            InputStream::Reader(reader) => {
                let (child_end, host_end) = cloexec_pipe().map_err(|source| Error::Bind { source })?;
                self.inherit(child_end);
                self.jobs.push(CopyJob::Feed {
                    label: format!("fd {n}"),
                    reader,
                    pipe: host_end,
                });
                debug!(fd = n, "bound input stream through pipe");
            }
        }
        Ok(n)
    }

    /// Attach a stream the child writes to and return its descriptor number.
    pub fn bind_output(&mut self, stream: OutputStream) -> Result<RawFd> {
        self.ensure_phase(Phase::Ready, "bind_output")?;
        let n = self.next_fd();
        match stream {
            OutputStream::Fd(fd) => {
                set_cloexec(fd.as_raw_fd()).map_err(|source| Error::Bind { source })?;
                self.inherit(fd);
                debug!(fd = n, "bound output descriptor");
            }
            OutputStream::Writer(writer) => {
                let (host_end, child_end) = cloexec_pipe().map_err(|source| Error::Bind { source })?;
                self.inherit(child_end);
                self.jobs.push(CopyJob::Drain {
                    label: format!("fd {n}"),
                    pipe: host_end,
                    writer,
                });
                debug!(fd = n, "bound output stream through pipe");
            }
        }
        Ok(n)
    }

    /// Close `closer` right after the child has started (or failed to).
    pub fn close_after_start(&mut self, closer: impl Closer + 'static) {
        self.close_after_start.push(Box::new(closer));
    }

    /// Close `closer` after the child has been waited for, or right away if
    /// it fails to start.
    pub fn close_after_wait(&mut self, closer: impl Closer + 'static) {
        self.close_after_wait.push(Box::new(closer));
    }

    fn inherit(&mut self, fd: OwnedFd) {
        self.extra_fds.push(fd.as_raw_fd());
        self.close_after_start.push(Box::new(FdGuard::fd(fd)));
    }

    fn ensure_phase(&self, want: Phase, op: &str) -> Result<()> {
        if self.phase == want {
            return Ok(());
        }
        Err(Error::State(format!(
            "{op} called on {} in phase {:?}",
            self.name(),
            self.phase
        )))
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Launch the child and its copy tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_phase(Phase::Ready, "start")?;
        self.phase = Phase::Done;

        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.abort_start();
            return Err(Error::Cancelled);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let stdin_reader = match self.stdin.take() {
            None => {
                cmd.stdin(Stdio::null());
                None
            }
            Some(InputStream::Fd(fd)) => {
                cmd.stdin(Stdio::from(fd));
                None
            }
            Some(InputStream::Reader(reader)) => {
                cmd.stdin(Stdio::piped());
                Some(reader)
            }
        };
        cmd.stdout(if self.stdout.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        });
        cmd.stderr(if self.stderr.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        });

        if !self.extra_fds.is_empty() {
            let sources = self.extra_fds.clone();
            let mut scratch = Vec::with_capacity(sources.len());
            // SAFETY: the closure only calls async-signal-safe libc functions
            // and pushes into a vector with reserved capacity.
            unsafe {
                cmd.pre_exec(move || inherit_fds(&sources, &mut scratch));
            }
        }

        let spawned = cmd.spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.abort_start();
                return Err(Error::start(self.name(), source));
            }
        };
        close_all(&mut self.close_after_start);
        info!(program = %self.name(), pid = child.id(), "process started");

        if let (Some(reader), Some(stdin)) = (stdin_reader, child.stdin.take()) {
            self.tasks
                .push(tokio::spawn(feed_task("stdin".into(), reader, stdin)));
        }
        if let Some(stdout) = child.stdout.take() {
            let sinks = std::mem::take(&mut self.stdout);
            self.tasks.push(tokio::spawn(tee_task("stdout", stdout, sinks)));
        }
        if let Some(stderr) = child.stderr.take() {
            let sinks = std::mem::take(&mut self.stderr);
            self.tasks.push(tokio::spawn(tee_task("stderr", stderr, sinks)));
        }
        for job in self.jobs.drain(..) {
            self.tasks.push(tokio::spawn(run_job(job)));
        }

        self.child = Some(child);
        self.phase = Phase::Running;
        Ok(())
    }

    fn abort_start(&mut self) {
        close_all(&mut self.close_after_start);
        close_all(&mut self.close_after_wait);
        self.jobs.clear();
        self.stdout.clear();
        self.stderr.clear();
    }

    /// Wait for the child to exit and all copy tasks to drain.
    ///
    /// The exit error, if any, takes precedence over copy errors. A child
    /// killed through the cancel token reports [`Error::Cancelled`].
    pub async fn wait(&mut self) -> Result<()> {
        self.ensure_phase(Phase::Running, "wait")?;
        self.phase = Phase::Done;
        let Some(mut child) = self.child.take() else {
            return Err(Error::State(format!("{} has no child process", self.name())));
        };

        let mut killed = false;
        let status = match self.cancel.clone() {
            Some(token) => {
                let finished = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = token.cancelled() => None,
                };
                match finished {
                    Some(status) => status,
                    None => {
                        killed = true;
                        if let Err(e) = child.start_kill() {
                            warn!(program = %self.name(), "failed to kill cancelled process: {e}");
                        }
                        child.wait().await
                    }
                }
            }
            None => child.wait().await,
        };
        drop(child);

        let name = self.name();
        let mut copy_err = None;
        for task in std::mem::take(&mut self.tasks) {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::copy("task", io::Error::other(e))),
            };
            if let Err(e) = outcome {
                warn!(program = %name, "{e}");
                copy_err.get_or_insert(e);
            }
        }
        close_all(&mut self.close_after_wait);

        let exit_err = match status {
            Ok(_) if killed => Some(Error::Cancelled),
            Ok(status) if status.success() => {
                info!(program = %self.name(), "process exited successfully");
                None
            }
            Ok(status) => {
                info!(program = %self.name(), %status, "process failed");
                Some(Error::exit(self.name(), status))
            }
            Err(e) => Some(Error::from(e)),
        };

        match (exit_err, copy_err) {
            (Some(e), _) | (None, Some(e)) => Err(e),
            (None, None) => Ok(()),
        }
    }

    /// Start and wait.
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;
        self.wait().await
    }
}

impl fmt::Display for ExtraCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtraCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtraCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("extra_fds", &self.extra_fds)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProcessUnit for ExtraCommand {
    async fn start(&mut self) -> Result<()> {
        ExtraCommand::start(self)
    }

    async fn wait(&mut self) -> Result<()> {
        ExtraCommand::wait(self).await
    }
}

fn close_all(closers: &mut Vec<Box<dyn Closer>>) {
    for closer in closers.drain(..) {
        if let Err(e) = closer.close() {
            debug!("close failed: {e}");
        }
    }
}

async fn run_job(job: CopyJob) -> Result<()> {
    match job {
        CopyJob::Feed {
            label,
            reader,
            pipe,
        } => {
            let sender = pipe::Sender::from_file(File::from(pipe))
                .map_err(|e| Error::copy(label.clone(), e))?;
            feed_task(label, reader, sender).await
        }
        CopyJob::Drain {
            label,
            pipe,
            writer,
        } => {
            let receiver = pipe::Receiver::from_file(File::from(pipe))
                .map_err(|e| Error::copy(label.clone(), e))?;
            copy_task(label, receiver, writer).await
        }
    }
}

/// Copy until EOF and flush. The writer is not shut down: a pipe end is
/// closed by dropping it, and a caller's writer stays the caller's to close.
async fn copy_task<R, W>(label: String, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|e| Error::copy(label.clone(), e))?;
    writer.flush().await.map_err(|e| Error::copy(label, e))
}

/// Like [`copy_task`], but a child that exits without reading all of its
/// input is not a copy failure.
async fn feed_task<R, W>(label: String, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match copy_task(label, reader, writer).await {
        Err(Error::Copy { stream, source }) if source.kind() == io::ErrorKind::BrokenPipe => {
            debug!(%stream, "child closed its end before reading all input");
            Ok(())
        }
        other => other,
    }
}

/// Copy a standard stream to every sink, flushing them at EOF.
async fn tee_task<R>(label: &'static str, mut reader: R, mut sinks: Vec<BoxWriter>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| Error::copy(label, e))?;
        if n == 0 {
            break;
        }
        for sink in sinks.iter_mut() {
            sink.write_all(&buf[..n])
                .await
                .map_err(|e| Error::copy(label, e))?;
        }
    }
    for sink in sinks.iter_mut() {
        sink.flush().await.map_err(|e| Error::copy(label, e))?;
    }
    Ok(())
}

/// Runs in the child between fork and exec. Every source descriptor is
/// first duplicated above the target range so a source that already sits
/// at a target number is not clobbered by an earlier `dup2`.
fn inherit_fds(sources: &[RawFd], scratch: &mut Vec<RawFd>) -> io::Result<()> {
    scratch.clear();
    let floor = FIRST_EXTRA_FD + sources.len() as RawFd;
    for &fd in sources {
        let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }
        scratch.push(dup);
    }
    for (i, &fd) in scratch.iter().enumerate() {
        // dup2 clears close-on-exec on the target.
        if unsafe { libc::dup2(fd, FIRST_EXTRA_FD + i as RawFd) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Best effort: binding sets the flag again and reports failure there.
fn mark_cloexec(fd: &OwnedFd) {
    if let Err(e) = set_cloexec(fd.as_raw_fd()) {
        warn!(fd = fd.as_raw_fd(), "failed to set close-on-exec: {e}");
    }
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A pipe whose ends are both close-on-exec. Returns `(read, write)`.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(io::Error::from)
}

/// A pipe whose ends are both close-on-exec. Returns `(read, write)`.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (r, w) = nix::unistd::pipe().map_err(io::Error::from)?;
    set_cloexec(r.as_raw_fd())?;
    set_cloexec(w.as_raw_fd())?;
    Ok((r, w))
}
