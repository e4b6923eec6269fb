use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::di::container::{AnyInstance, Container};
use crate::di::DiResult;
use crate::error::DiError;

const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;

/// Lifecycle state of a resolution boundary.
///
/// A boundary is born `Open` (the unopened phase ends at construction) and
/// transitions to `Closed` exactly once, when the owning connection handler
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    Open,
    Closed,
}

/// Per-connection resolution boundary.
///
/// Lives exactly as long as one inbound connection: it caches the
/// request-scoped instances resolved while handling that connection and
/// anchors lookups back to the shared [`Container`] for singletons. Closing
/// the boundary drops the cache, so request-scoped instances never outlive
/// their connection.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::di::{Container, DiResult, Injectable, RequestBoundary, Resolver, ScopeKind};
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
/// let container = Arc::new(Container::new());
/// container.register::<RequestId>(ScopeKind::Request);
///
/// let b1 = RequestBoundary::open(Arc::clone(&container));
/// let b2 = RequestBoundary::open(Arc::clone(&container));
///
/// let first = b1.resolve::<RequestId>().unwrap();
/// let again = b1.resolve::<RequestId>().unwrap();
/// let other = b2.resolve::<RequestId>().unwrap();
///
/// assert!(Arc::ptr_eq(&first, &again));
/// assert!(!Arc::ptr_eq(&first, &other));
/// ```
pub struct RequestBoundary {
    id: Uuid,
    opened_at: DateTime<Utc>,
    state: AtomicU8,
    instances: DashMap<TypeId, AnyInstance>,
    container: Arc<Container>,
}

impl RequestBoundary {
    /// Open a fresh boundary against the shared container.
    pub fn open(container: Arc<Container>) -> Arc<Self> {
        let boundary = Arc::new(Self {
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            state: AtomicU8::new(STATE_OPEN),
            instances: DashMap::new(),
            container,
        });

        debug!(boundary = %boundary.id, "request boundary opened");
        boundary
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> BoundaryState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BoundaryState::Open,
            _ => BoundaryState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == BoundaryState::Open
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Resolve a base type within this boundary.
    pub fn resolve<B: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<B>> {
        self.container.resolve::<B>(Some(self))
    }

    /// Close the boundary, discarding its request-scoped instances.
    ///
    /// Runs once; subsequent calls are no-ops. Resolution of request-scoped
    /// types through a closed boundary is refused.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let held = self.instances.len();
            self.instances.clear();
            debug!(
                boundary = %self.id,
                instances_dropped = held,
                elapsed_ms = (Utc::now() - self.opened_at).num_milliseconds(),
                "request boundary closed"
            );
        }
    }

    pub(crate) fn cached(&self, base_id: &TypeId) -> Option<AnyInstance> {
        self.instances.get(base_id).map(|entry| entry.value().clone())
    }

    /// Cache a freshly constructed request-scoped instance.
    ///
    /// If another resolution of the same type raced this one, the first
    /// stored instance wins and is returned, preserving within-boundary
    /// identity.
    pub(crate) fn store(
        &self,
        base_id: TypeId,
        type_name: &'static str,
        instance: AnyInstance,
    ) -> DiResult<AnyInstance> {
        if !self.is_open() {
            return Err(DiError::ScopeUnavailable { type_name });
        }

        trace!(boundary = %self.id, base = type_name, "caching request-scoped instance");
        Ok(self.instances.entry(base_id).or_insert(instance).value().clone())
    }
}

impl std::fmt::Debug for RequestBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBoundary")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("instances", &self.instances.len())
            .finish()
    }
}
