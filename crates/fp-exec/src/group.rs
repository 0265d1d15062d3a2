//! Run several processes as one cancelable unit.
//!
//! A [`ProcessGroup`] starts every member in registration order, then waits
//! on all of them concurrently. Any start or wait failure cancels the
//! group's scope so that cancel-aware members wind down; members are never
//! killed by the group itself.

use async_trait::async_trait;
use fp_core::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Something that can be started and later waited on.
///
/// Members of a [`ProcessGroup`] should watch the group's scope and stop
/// when it is cancelled.
#[async_trait]
pub trait ProcessUnit: Send {
    /// Launch the unit.
    async fn start(&mut self) -> Result<()>;

    /// Wait for the unit to finish.
    async fn wait(&mut self) -> Result<()>;
}

/// A set of units that run and terminate together.
pub struct ProcessGroup<'a> {
    scope: CancellationToken,
    cancelled: bool,
    units: Vec<&'a mut dyn ProcessUnit>,
}

impl<'a> ProcessGroup<'a> {
    /// Create a group whose scope is a child of `parent`. The returned token
    /// is the scope members should observe.
    pub fn with_scope(parent: &CancellationToken) -> (Self, CancellationToken) {
        let scope = parent.child_token();
        let group = Self {
            scope: scope.clone(),
            cancelled: false,
            units: Vec::new(),
        };
        (group, scope)
    }

    /// Create a group with a fresh root scope.
    pub fn new() -> (Self, CancellationToken) {
        Self::with_scope(&CancellationToken::new())
    }

    /// Register a unit for [`run`](Self::run).
    pub fn add(&mut self, unit: &'a mut dyn ProcessUnit) -> &mut Self {
        self.units.push(unit);
        self
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether no unit is registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Register `units` and run the whole group. See [`run`](Self::run).
    pub async fn run_with(
        mut self,
        units: impl IntoIterator<Item = &'a mut dyn ProcessUnit>,
    ) -> Vec<Error> {
        self.units.extend(units);
        self.run().await
    }

    /// Start every unit, then wait for all of them.
    ///
    /// Every unit gets a start attempt and a wait attempt regardless of
    /// other failures. Start errors only trigger cancellation; the returned
    /// list holds the wait errors in completion order.
    pub async fn run(mut self) -> Vec<Error> {
        let mut start_failed = false;
        for (i, unit) in self.units.iter_mut().enumerate() {
            if let Err(e) = unit.start().await {
                warn!(unit = i, "group member failed to start: {e}");
                start_failed = true;
            }
        }
        if start_failed {
            cancel_once(&self.scope, &mut self.cancelled);
        }

        let mut errors = Vec::new();
        let mut waits: FuturesUnordered<_> = self
            .units
            .iter_mut()
            .enumerate()
            .map(|(i, unit)| async move { (i, unit.wait().await) })
            .collect();
        while let Some((i, outcome)) = waits.next().await {
            if let Err(e) = outcome {
                warn!(unit = i, "group member failed: {e}");
                errors.push(e);
                cancel_once(&self.scope, &mut self.cancelled);
            }
        }
        drop(waits);

        cancel_once(&self.scope, &mut self.cancelled);
        errors
    }
}

fn cancel_once(scope: &CancellationToken, cancelled: &mut bool) {
    if !*cancelled {
        *cancelled = true;
        debug!("cancelling process group");
        scope.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Trace {
        started: AtomicBool,
        waited: AtomicBool,
        saw_cancel: AtomicBool,
    }

    /// A unit that blocks in `wait` until its scope is cancelled, unless told
    /// to fail or finish right away.
    struct Mock {
        scope: CancellationToken,
        fail_start: bool,
        fail_wait: bool,
        finish_early: bool,
        running: bool,
        trace: Arc<Trace>,
    }

    impl Mock {
        fn new(scope: &CancellationToken) -> Self {
            Self {
                scope: scope.clone(),
                fail_start: false,
                fail_wait: false,
                finish_early: false,
                running: false,
                trace: Arc::new(Trace::default()),
            }
        }
    }

    #[async_trait]
    impl ProcessUnit for Mock {
        async fn start(&mut self) -> Result<()> {
            self.trace.started.store(true, Ordering::SeqCst);
            if self.fail_start {
                return Err(Error::State("refusing to start".into()));
            }
            self.running = true;
            Ok(())
        }

        async fn wait(&mut self) -> Result<()> {
            self.trace.waited.store(true, Ordering::SeqCst);
            if !self.running {
                self.trace
                    .saw_cancel
                    .store(self.scope.is_cancelled(), Ordering::SeqCst);
                return Err(Error::State("not started".into()));
            }
            if self.fail_wait {
                return Err(Error::State("wait failed".into()));
            }
            if self.finish_early {
                return Ok(());
            }
            self.scope.cancelled().await;
            self.trace.saw_cancel.store(true, Ordering::SeqCst);
            Err(Error::Cancelled)
        }
    }

    #[tokio::test]
    async fn start_failure_cancels_everyone() {
        let (mut group, scope) = ProcessGroup::new();
        let mut a = Mock::new(&scope);
        let mut b = Mock::new(&scope);
        b.fail_start = true;
        let mut c = Mock::new(&scope);
        let traces = [a.trace.clone(), b.trace.clone(), c.trace.clone()];

        group.add(&mut a).add(&mut b).add(&mut c);
        let errors = group.run().await;

        for t in &traces {
            assert!(t.started.load(Ordering::SeqCst));
            assert!(t.waited.load(Ordering::SeqCst));
            assert!(t.saw_cancel.load(Ordering::SeqCst));
        }
        assert_eq!(errors.len(), 3);
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn wait_failure_cancels_the_rest() {
        let (group, scope) = ProcessGroup::new();
        let mut failing = Mock::new(&scope);
        failing.fail_wait = true;
        let mut blocked = Mock::new(&scope);
        let blocked_trace = blocked.trace.clone();

        let errors = group.run_with([&mut failing as &mut dyn ProcessUnit, &mut blocked]).await;

        assert_eq!(errors.len(), 2);
        assert!(blocked_trace.saw_cancel.load(Ordering::SeqCst));
        assert!(errors.iter().any(|e| e.is_cancelled()));
    }

    #[tokio::test]
    async fn success_still_cancels_scope_afterwards() {
        let parent = CancellationToken::new();
        let (group, scope) = ProcessGroup::with_scope(&parent);
        let mut a = Mock::new(&scope);
        a.finish_early = true;
        let mut b = Mock::new(&scope);
        b.finish_early = true;

        let errors = group.run_with([&mut a as &mut dyn ProcessUnit, &mut b]).await;

        assert!(errors.is_empty());
        assert!(scope.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_members() {
        let parent = CancellationToken::new();
        let (group, scope) = ProcessGroup::with_scope(&parent);
        let mut a = Mock::new(&scope);
        let trace = a.trace.clone();

        let canceller = parent.clone();
        tokio::spawn(async move { canceller.cancel() });
        let errors = group.run_with([&mut a as &mut dyn ProcessUnit]).await;

        assert_eq!(errors.len(), 1);
        assert!(trace.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_group_is_fine() {
        let (group, _scope) = ProcessGroup::new();
        assert!(group.is_empty());
        assert!(group.run().await.is_empty());
    }
}
