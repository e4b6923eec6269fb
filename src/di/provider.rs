use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::di::container::{ClassBinding, Container, erase};
use crate::di::injectable::Injectable;
use crate::di::scope::ScopeKind;
use crate::di::DiResult;
use crate::error::DiError;

/// Declarative binding descriptor.
///
/// Binds a base type `B` to one of three construction strategies:
/// a ready-made instance (`use_value`), a concrete class constructed on
/// demand (`use_class`), or `B` itself (the default for
/// [`ProviderConfig::new`]). `use_value` and `use_class` are mutually
/// exclusive; declaring both fails at registration with
/// [`DiError::ImproperConfiguration`].
///
/// The effective scope of a class binding is the explicitly declared scope
/// if any, else the concrete class's scope marker, else
/// [`ScopeKind::Singleton`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::di::{Container, DiResult, Injectable, ProviderConfig, Resolver};
///
/// trait Logger: Send + Sync {
///     fn log(&self, line: &str);
/// }
///
/// struct ConsoleLogger;
///
/// impl Logger for ConsoleLogger {
///     fn log(&self, line: &str) {
///         println!("{line}");
///     }
/// }
///
/// impl Injectable for ConsoleLogger {
///     fn construct(_: &Resolver<'_>) -> DiResult<Self> {
///         Ok(ConsoleLogger)
///     }
/// }
///
/// let container = Container::new();
/// ProviderConfig::<dyn Logger>::provide()
///     .use_class::<ConsoleLogger>(|logger| logger as Arc<dyn Logger>)
///     .register(&container)
///     .unwrap();
///
/// let a = container.resolve::<dyn Logger>(None).unwrap();
/// let b = container.resolve::<dyn Logger>(None).unwrap();
/// // Undeclared scope defaults to singleton.
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct ProviderConfig<B: ?Sized + Send + Sync + 'static> {
    value: Option<Arc<B>>,
    class: Option<ClassBinding>,
    class_is_default: bool,
    scope: Option<ScopeKind>,
    _marker: PhantomData<fn() -> Box<B>>,
}

impl<B: Injectable> ProviderConfig<B> {
    /// Start from a self-binding: `B` resolves to an instance of `B`.
    pub fn new() -> Self {
        Self {
            value: None,
            class: Some(ClassBinding::of::<B, B>(|instance| instance)),
            class_is_default: true,
            scope: None,
            _marker: PhantomData,
        }
    }
}

impl<B: Injectable> Default for ProviderConfig<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ?Sized + Send + Sync + 'static> ProviderConfig<B> {
    /// Start from an abstract base (typically a trait object) with no
    /// default strategy; `use_value` or `use_class` must follow.
    pub fn provide() -> Self {
        Self {
            value: None,
            class: None,
            class_is_default: false,
            scope: None,
            _marker: PhantomData,
        }
    }

    /// Bind to a ready-made instance. The value is cached as the singleton
    /// for `B`; no construction ever happens for this binding.
    pub fn use_value(mut self, value: Arc<B>) -> Self {
        self.value = Some(value);
        self
    }

    /// Bind to a concrete class `C`, constructed through the container. The
    /// `cast` lifts `Arc<C>` into the base representation.
    pub fn use_class<C: Injectable>(mut self, cast: fn(Arc<C>) -> Arc<B>) -> Self {
        self.class = Some(ClassBinding::of::<C, B>(cast));
        self.class_is_default = false;
        self
    }

    /// Explicitly override the binding's scope, taking precedence over any
    /// scope declared on the concrete class.
    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Check the declaration for conflicting strategies without registering.
    pub(crate) fn validate(&self) -> DiResult<()> {
        if self.value.is_some() && self.class.is_some() && !self.class_is_default {
            return Err(DiError::improper_configuration(
                "`use_class` and `use_value` cannot be used at the same time.",
            ));
        }
        Ok(())
    }

    /// Write the binding into the container.
    ///
    /// Registering the same base type again silently overwrites the previous
    /// binding (last-write-wins).
    ///
    /// # Errors
    /// [`DiError::ImproperConfiguration`] if both `use_value` and
    /// `use_class` were supplied, or if neither a strategy nor a default
    /// self-binding is available.
    pub fn register(self, container: &Container) -> DiResult<()> {
        let base_name = std::any::type_name::<B>();
        self.validate()?;

        let base_id = TypeId::of::<B>();

        if let Some(value) = self.value {
            container.add_singleton_erased(base_id, base_name, erase(value));
            return Ok(());
        }

        let Some(class) = self.class else {
            return Err(DiError::improper_configuration(format!(
                "binding for `{base_name}` declares neither `use_value` nor `use_class`",
            )));
        };

        let scope = self
            .scope
            .or_else(|| container.scope_registry().declared_of(class.concrete_id))
            .or(class.declared_scope)
            .unwrap_or(ScopeKind::Singleton);

        debug!(base = base_name, concrete = class.concrete_name, scope = %scope, "provider configured");
        container.register_erased(base_id, base_name, class, scope);
        Ok(())
    }
}
