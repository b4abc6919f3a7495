//! Handle resolver: cross-process duplication, type filtering and
//! watchdog-guarded name lookup.
//!
//! [`ResolverContext`] is built once per process. It captures the current
//! process id, owns the kernel backend and the watchdog, and turns every
//! request into a [`HandleInfo`]. Nothing escapes [`ResolverContext::resolve`]
//! as an error; each failure becomes a [`HandleStatus`].
//!
//! Requests must be issued one at a time (`&mut self`), which matches the
//! single-client transport above it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::kernel::{AsObjectRef, FILE_TYPE_NAME, KernelError, KernelObjects};
use crate::protocol::{HandleInfo, HandleQuery, HandleStatus, MIN_NAME_LEN, NAME_BUFFER_LEN};
use crate::watchdog::{Detach, TerminationStrategy, Watchdog, WatchdogOutcome};

/// Default time the dispatch thread waits for a name query.
pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_millis(100);

/// Process-wide resolver state.
pub struct ResolverContext<K: KernelObjects> {
    kernel: Arc<K>,
    process_id: u32,
    deadline: Duration,
    watchdog: Watchdog<K>,
}

impl<K: KernelObjects> ResolverContext<K> {
    /// Create a resolver with the default deadline and the portable
    /// [`Detach`] strategy.
    #[must_use]
    pub fn new(kernel: K) -> Self {
        let kernel = Arc::new(kernel);
        let process_id = kernel.current_process_id();
        let watchdog = Watchdog::new(Arc::clone(&kernel), Box::new(Detach));
        Self {
            kernel,
            process_id,
            deadline: DEFAULT_QUERY_DEADLINE,
            watchdog,
        }
    }

    /// Set the name-query deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set how a worker that misses the deadline is disposed of.
    ///
    /// Replaces the watchdog; call before the first request.
    #[must_use]
    pub fn with_termination(mut self, strategy: Box<dyn TerminationStrategy>) -> Self {
        self.watchdog = Watchdog::new(Arc::clone(&self.kernel), strategy);
        self
    }

    /// Id of the process hosting the resolver.
    #[must_use]
    pub const fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Name-query deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// The watchdog, for observing the worker lifecycle.
    #[must_use]
    pub const fn watchdog(&self) -> &Watchdog<K> {
        &self.watchdog
    }

    /// The kernel backend.
    #[must_use]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Resolve a decoded request.
    pub fn resolve_query(&mut self, query: &HandleQuery) -> HandleInfo {
        self.resolve(query.process_id, query.handle_value)
    }

    /// Resolve the name of `handle_value` in `process_id`.
    pub fn resolve(&mut self, process_id: u32, handle_value: u32) -> HandleInfo {
        let info = self
            .try_resolve(process_id, handle_value)
            .unwrap_or_else(HandleInfo::failure);
        debug!(
            process_id,
            handle = format_args!("{handle_value:#x}"),
            status = %info.status(),
            size = info.name_len(),
            "resolved handle"
        );
        info
    }

    fn try_resolve(
        &mut self,
        process_id: u32,
        handle_value: u32,
    ) -> Result<HandleInfo, HandleStatus> {
        if self.kernel.is_current_process(process_id) {
            return Err(HandleStatus::SameProcess);
        }

        let process = self
            .kernel
            .open_process(process_id)
            .map_err(|err| reject(HandleStatus::OpenProcess, &err))?;

        // Declared after `process`, so it is closed first on every path.
        let object = self
            .kernel
            .duplicate_handle(&process, handle_value)
            .map_err(|err| reject(HandleStatus::Duplicate, &err))?;
        let object_ref = object.object_ref();

        let type_name = self
            .kernel
            .query_type_name(object_ref)
            .map_err(|err| reject(HandleStatus::QueryType, &err))?;
        if type_name != FILE_TYPE_NAME {
            debug!(%type_name, "unsupported object type");
            return Err(HandleStatus::InvalidType);
        }

        let reply = match self.watchdog.query(object_ref, self.deadline) {
            Ok(WatchdogOutcome::Completed(reply)) => reply,
            Ok(WatchdogOutcome::TimedOut | WatchdogOutcome::WorkerLost) => {
                return Err(HandleStatus::QueryName);
            },
            Err(err) => {
                warn!(error = %err, "name query not attempted");
                return Err(HandleStatus::QueryName);
            },
        };

        if !(MIN_NAME_LEN..=NAME_BUFFER_LEN).contains(&reply.len) {
            debug!(len = reply.len, "name query returned no name");
            return Err(HandleStatus::QueryName);
        }
        Ok(HandleInfo::resolved(reply.len, &reply.buffer))
    }
}

fn reject(status: HandleStatus, err: &KernelError) -> HandleStatus {
    debug!(%status, error = %err, "handle resolution rejected");
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::fake::{FakeKernel, FakeObject, NameBehavior};
    use crate::protocol::encode_name_record;

    const OWN_PID: u32 = 100;
    const TARGET_PID: u32 = 200;

    fn resolver() -> ResolverContext<FakeKernel> {
        let kernel = FakeKernel::new(OWN_PID)
            .with_process(
                TARGET_PID,
                [
                    (0x04, FakeObject::file("\\Device\\Serial0")),
                    (0x08, FakeObject::of_type("Event", NameBehavior::Named("ev".into()))),
                    (0x0c, FakeObject::file("x").not_duplicable()),
                    (0x10, FakeObject::file("x").type_unqueryable()),
                    (0x14, FakeObject::of_type("File", NameBehavior::Raw(vec![0; 16]))),
                    (0x18, FakeObject::of_type("File", NameBehavior::Fails)),
                    (0x1c, FakeObject::of_type("file", NameBehavior::Named("x".into()))),
                    (0x20, FakeObject::slow_file("\\Device\\Hung", Duration::from_secs(2))),
                ],
            )
            .with_protected_process(300);
        ResolverContext::new(kernel)
    }

    #[test]
    fn test_same_process_is_refused() {
        let mut resolver = resolver();
        for handle in [0, 4, 0xffff_ffff] {
            let info = resolver.resolve(OWN_PID, handle);
            assert_eq!(info.status(), HandleStatus::SameProcess);
            assert_eq!(info.name_len(), 0);
        }
        assert_eq!(resolver.kernel().open_processes(), 0);
    }

    #[test]
    fn test_missing_and_protected_processes() {
        let mut resolver = resolver();
        assert_eq!(resolver.resolve(999, 4).status(), HandleStatus::OpenProcess);
        assert_eq!(resolver.resolve(300, 4).status(), HandleStatus::OpenProcess);
    }

    #[test]
    fn test_duplicate_failure_releases_process() {
        let mut resolver = resolver();
        assert_eq!(resolver.resolve(TARGET_PID, 0x0c).status(), HandleStatus::Duplicate);
        assert_eq!(resolver.resolve(TARGET_PID, 0x99).status(), HandleStatus::Duplicate);
        assert_eq!(resolver.kernel().open_processes(), 0);
    }

    #[test]
    fn test_type_filtering() {
        let mut resolver = resolver();
        assert_eq!(resolver.resolve(TARGET_PID, 0x10).status(), HandleStatus::QueryType);
        assert_eq!(resolver.resolve(TARGET_PID, 0x08).status(), HandleStatus::InvalidType);
        // the comparison is case-sensitive
        assert_eq!(resolver.resolve(TARGET_PID, 0x1c).status(), HandleStatus::InvalidType);
        assert_eq!(resolver.kernel().name_queries(), 0);
        assert!(!resolver.watchdog().is_running());
    }

    #[test]
    fn test_success_reports_worker_length() {
        let mut resolver = resolver();
        let info = resolver.resolve(TARGET_PID, 0x04);

        let expected = encode_name_record("\\Device\\Serial0");
        assert_eq!(info.status(), HandleStatus::Success);
        assert_eq!(info.name_len() as usize, expected.len());
        assert_eq!(info.payload(), expected.as_slice());
        assert_eq!(info.name().as_deref(), Some("\\Device\\Serial0"));
        assert_eq!(resolver.kernel().open_processes(), 0);
        assert_eq!(resolver.kernel().open_objects(), 0);
    }

    #[test]
    fn test_short_or_failed_name_is_query_name() {
        let mut resolver = resolver();
        for handle in [0x14, 0x18] {
            let info = resolver.resolve(TARGET_PID, handle);
            assert_eq!(info.status(), HandleStatus::QueryName);
            assert_eq!(info.name_len(), 0);
        }
        assert_eq!(resolver.watchdog().generation(), 1);
    }

    #[test]
    fn test_repeated_request_is_stable() {
        let mut resolver = resolver();
        let first = resolver.resolve(TARGET_PID, 0x04);
        let second = resolver.resolve(TARGET_PID, 0x04);
        assert_eq!(first, second);
        assert_eq!(resolver.watchdog().generation(), 1);
    }

    #[test]
    fn test_timeout_then_fresh_worker() {
        let mut resolver = resolver().with_deadline(Duration::from_millis(50));

        let info = resolver.resolve(TARGET_PID, 0x20);
        assert_eq!(info.status(), HandleStatus::QueryName);
        assert_eq!(info.name_len(), 0);
        assert!(!resolver.watchdog().is_running());
        assert_eq!(resolver.kernel().open_objects(), 0);

        let info = resolver.resolve(TARGET_PID, 0x04);
        assert_eq!(info.status(), HandleStatus::Success);
        assert_eq!(resolver.watchdog().generation(), 2);
    }

    #[test]
    fn test_late_reply_never_reaches_next_request() {
        let kernel = FakeKernel::new(1).with_process(
            2,
            [
                (4, FakeObject::slow_file("\\Device\\Late", Duration::from_millis(150))),
                (8, FakeObject::file("\\Device\\Fresh")),
            ],
        );
        let mut resolver = ResolverContext::new(kernel);

        let first = resolver.resolve(2, 4);
        assert_eq!(first.status(), HandleStatus::QueryName);
        assert_eq!(first.name_len(), 0);

        // the abandoned worker has answered by now
        std::thread::sleep(Duration::from_millis(200));

        let second = resolver.resolve(2, 8);
        assert_eq!(second.status(), HandleStatus::Success);
        assert_eq!(second.name().as_deref(), Some("\\Device\\Fresh"));
        assert_eq!(resolver.watchdog().generation(), 2);
    }

    #[test]
    fn test_resolve_query_matches_resolve() {
        let mut resolver = resolver();
        let query = HandleQuery::new(TARGET_PID, 0x04);
        assert_eq!(resolver.resolve_query(&query), resolver.resolve(TARGET_PID, 0x04));
    }
}
