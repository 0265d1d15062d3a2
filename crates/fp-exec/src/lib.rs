//! fp-exec: subprocess plumbing for ffpreview.
//!
//! - **Line buffering** ([`LineBuffer`], [`LastLines`]) -- split process
//!   output into lines for a callback or a bounded tail.
//! - **Close guards** ([`CloseOnce`]) -- share a closable resource between
//!   owners and close it exactly once.
//! - **Extra streams** ([`ExtraCommand`]) -- start a child with additional
//!   in-process streams inherited as descriptors 3, 4, ...
//! - **Process groups** ([`ProcessGroup`]) -- start and wait several
//!   [`ProcessUnit`]s under one cancellation scope.
//!
//! Unix only.

pub mod close;
pub mod extra;
pub mod group;
pub mod linebuffer;

pub use close::{Close, CloseOnce, Closer, FdGuard};
pub use extra::{BoxReader, BoxWriter, ExtraCommand, InputStream, OutputStream, FIRST_EXTRA_FD};
pub use group::{ProcessGroup, ProcessUnit};
pub use linebuffer::{LastLines, LineBuffer, LineSink, Ring};

// Re-exported so callers need not depend on tokio-util directly.
pub use tokio_util::sync::CancellationToken;
