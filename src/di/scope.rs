use dashmap::DashMap;
use std::any::TypeId;
use strum_macros::Display;

use crate::di::Injectable;

/// Lifetime policy of a resolved instance.
///
/// `Singleton` instances are created lazily on first resolution and cached
/// for the lifetime of the process. `Request` instances are created lazily
/// within a connection's resolution boundary and discarded when that
/// boundary closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScopeKind {
    Singleton,
    Request,
}

/// Registry of declared provider scopes.
///
/// A type declares its scope either through the [`Injectable::SCOPE`]
/// associated constant or through a runtime annotation made here at
/// registration time. Runtime annotations take precedence over the trait
/// marker. Types with no declaration resolve to `None`, letting callers
/// default to [`ScopeKind::Singleton`].
///
/// # Example
/// ```
/// use trellis::di::{Injectable, Resolver, ScopeKind, ScopeRegistry};
///
/// struct RequestClock;
///
/// impl Injectable for RequestClock {
///     fn construct(_: &Resolver<'_>) -> trellis::di::DiResult<Self> {
///         Ok(RequestClock)
///     }
/// }
///
/// let registry = ScopeRegistry::new();
/// assert_eq!(registry.get_scope::<RequestClock>(), None);
///
/// registry.declare::<RequestClock>(ScopeKind::Request);
/// assert_eq!(registry.get_scope::<RequestClock>(), Some(ScopeKind::Request));
/// ```
#[derive(Default)]
pub struct ScopeRegistry {
    declared: DashMap<TypeId, ScopeKind>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate a type with an explicit scope.
    ///
    /// Overrides the type's [`Injectable::SCOPE`] marker for every binding
    /// registered afterwards.
    pub fn declare<T: ?Sized + 'static>(&self, scope: ScopeKind) {
        self.declared.insert(TypeId::of::<T>(), scope);
    }

    /// Look up the declared scope of `T`, checking runtime annotations
    /// first, then the trait marker. Returns `None` if undeclared.
    pub fn get_scope<T: Injectable>(&self) -> Option<ScopeKind> {
        self.declared_of(TypeId::of::<T>()).or(T::SCOPE)
    }

    /// Raw annotation lookup by type id; does not consult trait markers.
    pub(crate) fn declared_of(&self, type_id: TypeId) -> Option<ScopeKind> {
        self.declared.get(&type_id).map(|entry| *entry.value())
    }
}
