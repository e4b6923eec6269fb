use std::future::Future;
use std::sync::Arc;
use tracing::trace;

use crate::di::{Container, RequestBoundary};
use crate::error::ContextError;

tokio::task_local! {
    /// The resolution boundary published for the current task.
    ///
    /// One slot per concurrently-executing connection handler: two
    /// connections resolving request-scoped providers at the same time never
    /// observe each other's cache.
    static CURRENT_BOUNDARY: Arc<RequestBoundary>;
}

/// The boundary published for the current task.
///
/// # Errors
/// [`ContextError::ContextUnavailable`] when called outside
/// [`RequestScopeManager::run_scoped`] — typically from background work
/// detached from any connection.
pub fn current_boundary() -> Result<Arc<RequestBoundary>, ContextError> {
    try_current_boundary().ok_or(ContextError::ContextUnavailable)
}

/// Like [`current_boundary`], but `None` instead of an error.
pub fn try_current_boundary() -> Option<Arc<RequestBoundary>> {
    CURRENT_BOUNDARY
        .try_with(|boundary| Arc::clone(boundary))
        .ok()
}

// Closes the boundary when the handler future is dropped, whichever way it
// ends: completion, error, panic unwind, or cancellation.
struct BoundaryGuard(Arc<RequestBoundary>);

impl Drop for BoundaryGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Opens a resolution boundary per inbound connection and publishes it for
/// the duration of the connection's handler future.
///
/// The boundary is reachable through [`current_boundary`] from any code the
/// handler calls, and is torn down on every exit path.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::context::RequestScopeManager;
/// use trellis::di::{Container, DiResult, Injectable, Resolver, ScopeKind};
///
/// struct RequestId;
///
/// impl Injectable for RequestId {
///     const SCOPE: Option<ScopeKind> = Some(ScopeKind::Request);
///     fn construct(_: &Resolver<'_>) -> DiResult<Self> {
///         Ok(RequestId)
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let container = Arc::new(Container::new());
/// container.register::<RequestId>(ScopeKind::Request);
///
/// let manager = RequestScopeManager::new(Arc::clone(&container));
/// manager
///     .run_scoped(async {
///         let boundary = trellis::context::current_boundary().unwrap();
///         boundary.resolve::<RequestId>().unwrap();
///     })
///     .await;
/// # }
/// ```
pub struct RequestScopeManager {
    container: Arc<Container>,
}

impl RequestScopeManager {
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Open a boundary without publishing it. The caller owns teardown.
    pub fn open_boundary(&self) -> Arc<RequestBoundary> {
        RequestBoundary::open(Arc::clone(&self.container))
    }

    /// Run a connection handler inside a fresh boundary.
    ///
    /// The boundary is published task-locally for exactly the lifetime of
    /// `fut` and closed unconditionally afterwards, including when `fut`
    /// panics or is cancelled.
    pub async fn run_scoped<F: Future>(&self, fut: F) -> F::Output {
        let boundary = self.open_boundary();
        let guard = BoundaryGuard(Arc::clone(&boundary));

        trace!(boundary = %boundary.id(), "entering request scope");
        let output = CURRENT_BOUNDARY.scope(boundary, fut).await;
        drop(guard);
        output
    }

    /// Run a handler inside an already-opened boundary.
    ///
    /// Teardown still runs here on every exit path; use this when the
    /// boundary has to be observable before the handler starts.
    pub async fn run_scoped_with<F: Future>(
        &self,
        boundary: Arc<RequestBoundary>,
        fut: F,
    ) -> F::Output {
        let guard = BoundaryGuard(Arc::clone(&boundary));
        let output = CURRENT_BOUNDARY.scope(boundary, fut).await;
        drop(guard);
        output
    }
}
