use std::collections::HashMap;
use std::sync::Arc;

use crate::di::container::{AnyInstance, erase, recover};
use crate::di::scope::ScopeKind;
use crate::di::{DiResult, Resolver};

/// Trait for types the container can construct.
///
/// `construct` is the explicit constructor seam: it receives a [`Resolver`]
/// and pulls each dependency through it, so the container can track the
/// resolution chain and detect cycles.
///
/// A type may declare its lifetime through the `SCOPE` marker; bindings that
/// do not override the scope explicitly inherit it, defaulting to
/// [`ScopeKind::Singleton`] when the marker is absent.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::di::{DiResult, Injectable, Resolver};
///
/// struct Database;
///
/// impl Injectable for Database {
///     fn construct(_: &Resolver<'_>) -> DiResult<Self> {
///         Ok(Database)
///     }
/// }
///
/// struct UserService {
///     database: Arc<Database>,
/// }
///
/// impl Injectable for UserService {
///     fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
///         Ok(UserService {
///             database: resolver.field("UserService", "database")?,
///         })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Declared scope marker. `None` means undeclared; the effective scope
    /// then falls back to singleton.
    const SCOPE: Option<ScopeKind> = None;

    /// Create an instance by resolving dependencies through the resolver.
    ///
    /// # Errors
    /// Returns an error if any required dependency cannot be resolved.
    fn construct(resolver: &Resolver<'_>) -> DiResult<Self>;
}

/// Named constructor-parameter substitutions for
/// [`Container::create_object`](crate::di::Container::create_object).
///
/// Overrides apply to the directly constructed object only; dependencies
/// resolved transitively go through the container as usual.
#[derive(Default)]
pub struct Overrides {
    values: HashMap<&'static str, AnyInstance>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply a pre-built value for the parameter named `param`.
    pub fn with<T: ?Sized + Send + Sync + 'static>(
        mut self,
        param: &'static str,
        value: Arc<T>,
    ) -> Self {
        self.values.insert(param, erase(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fetch an override by parameter name, downcast to the requested type.
    pub(crate) fn get<T: ?Sized + Send + Sync + 'static>(
        &self,
        param: &'static str,
    ) -> DiResult<Option<Arc<T>>> {
        match self.values.get(param) {
            Some(stored) => recover::<T>(stored).map(Some),
            None => Ok(None),
        }
    }
}
