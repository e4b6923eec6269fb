use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::di::boundary::RequestBoundary;
use crate::di::injectable::{Injectable, Overrides};
use crate::di::scope::{ScopeKind, ScopeRegistry};
use crate::di::DiResult;
use crate::error::DiError;

/// Type-erased stored instance.
///
/// For a base type `B` (concrete or trait object) the payload is an `Arc<B>`
/// boxed behind `dyn Any`, so trait-object bases can be recovered by
/// downcasting to the sized `Arc<B>`.
pub(crate) type AnyInstance = Arc<dyn Any + Send + Sync>;

pub(crate) fn erase<B: ?Sized + Send + Sync + 'static>(instance: Arc<B>) -> AnyInstance {
    Arc::new(instance)
}

pub(crate) fn recover<B: ?Sized + Send + Sync + 'static>(stored: &AnyInstance) -> DiResult<Arc<B>> {
    stored
        .downcast_ref::<Arc<B>>()
        .cloned()
        .ok_or_else(DiError::downcast_failed::<B>)
}

type ConstructorFn = Arc<dyn for<'r> Fn(&Resolver<'r>) -> DiResult<AnyInstance> + Send + Sync>;

/// Erased construction strategy for a concrete class, captured at
/// declaration time together with the class's scope marker.
pub(crate) struct ClassBinding {
    pub(crate) concrete_id: TypeId,
    pub(crate) concrete_name: &'static str,
    pub(crate) declared_scope: Option<ScopeKind>,
    constructor: ConstructorFn,
}

impl ClassBinding {
    pub(crate) fn of<C, B>(cast: fn(Arc<C>) -> Arc<B>) -> Self
    where
        C: Injectable,
        B: ?Sized + Send + Sync + 'static,
    {
        Self {
            concrete_id: TypeId::of::<C>(),
            concrete_name: std::any::type_name::<C>(),
            declared_scope: C::SCOPE,
            constructor: Arc::new(move |resolver| {
                C::construct(resolver).map(|instance| erase(cast(Arc::new(instance))))
            }),
        }
    }
}

struct BindingRecord {
    concrete_id: TypeId,
    concrete_name: &'static str,
    scope: ScopeKind,
    /// `None` for value bindings, which are born with a filled cache.
    constructor: Option<ConstructorFn>,
    /// Process-wide singleton cell. Request-scoped bindings never use it;
    /// their cache lives on the boundary.
    singleton: OnceCell<AnyInstance>,
}

/// Process-wide binding registry and object-graph resolver.
///
/// Maps an abstract base type to a construction strategy and a scope, and
/// resolves instances on demand: singletons are constructed once and cached
/// here, request-scoped instances are constructed per resolution boundary
/// and cached there.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::di::{Container, DiResult, Injectable, Resolver, ScopeKind};
///
/// struct Greeter;
///
/// impl Injectable for Greeter {
///     fn construct(_: &Resolver<'_>) -> DiResult<Self> {
///         Ok(Greeter)
///     }
/// }
///
/// let container = Container::new();
/// container.register::<Greeter>(ScopeKind::Singleton);
///
/// let a = container.resolve::<Greeter>(None).unwrap();
/// let b = container.resolve::<Greeter>(None).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct Container {
    bindings: DashMap<TypeId, Arc<BindingRecord>>,
    scopes: Arc<ScopeRegistry>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            scopes: Arc::new(ScopeRegistry::new()),
        }
    }

    pub fn scope_registry(&self) -> &Arc<ScopeRegistry> {
        &self.scopes
    }

    /// Register a self-binding: `C` resolves to an instance of `C` under the
    /// given scope.
    pub fn register<C: Injectable>(&self, scope: ScopeKind) {
        self.register_erased(
            TypeId::of::<C>(),
            std::any::type_name::<C>(),
            ClassBinding::of::<C, C>(|instance| instance),
            scope,
        );
    }

    /// Register a binding from base type `B` to concrete class `C`.
    ///
    /// The `cast` function lifts the constructed `Arc<C>` into the base
    /// representation, which lets `B` be a trait object.
    pub fn register_as<B, C>(&self, cast: fn(Arc<C>) -> Arc<B>, scope: ScopeKind)
    where
        B: ?Sized + Send + Sync + 'static,
        C: Injectable,
    {
        self.register_erased(
            TypeId::of::<B>(),
            std::any::type_name::<B>(),
            ClassBinding::of::<C, B>(cast),
            scope,
        );
    }

    /// Register a ready-made singleton instance for base type `B`.
    ///
    /// No construction ever happens for this binding; the supplied value is
    /// the cached instance.
    pub fn add_singleton<B: ?Sized + Send + Sync + 'static>(&self, instance: Arc<B>) {
        self.add_singleton_erased(
            TypeId::of::<B>(),
            std::any::type_name::<B>(),
            erase(instance),
        );
    }

    pub(crate) fn register_erased(
        &self,
        base_id: TypeId,
        base_name: &'static str,
        class: ClassBinding,
        scope: ScopeKind,
    ) {
        debug!(
            base = base_name,
            concrete = class.concrete_name,
            scope = %scope,
            "registering binding"
        );

        let record = BindingRecord {
            concrete_id: class.concrete_id,
            concrete_name: class.concrete_name,
            scope,
            constructor: Some(class.constructor),
            singleton: OnceCell::new(),
        };
        self.insert_record(base_id, base_name, record);
    }

    pub(crate) fn add_singleton_erased(
        &self,
        base_id: TypeId,
        base_name: &'static str,
        instance: AnyInstance,
    ) {
        debug!(base = base_name, "registering singleton value");

        let record = BindingRecord {
            concrete_id: base_id,
            concrete_name: base_name,
            scope: ScopeKind::Singleton,
            constructor: None,
            singleton: OnceCell::with_value(instance),
        };
        self.insert_record(base_id, base_name, record);
    }

    // Re-registering under the same base type is last-write-wins.
    fn insert_record(&self, base_id: TypeId, base_name: &'static str, record: BindingRecord) {
        if self.bindings.insert(base_id, Arc::new(record)).is_some() {
            debug!(base = base_name, "overwriting existing binding");
        }
    }

    /// Resolve an instance of base type `B`.
    ///
    /// Singleton bindings are constructed on first access and cached
    /// process-wide. Request-scoped bindings require an open `boundary` and
    /// are cached there only.
    ///
    /// # Errors
    /// - [`DiError::UnboundType`] if no binding exists for `B`.
    /// - [`DiError::ScopeUnavailable`] if `B` is request-scoped and
    ///   `boundary` is `None` or already closed.
    /// - [`DiError::CircularDependency`] if construction re-enters itself.
    pub fn resolve<B: ?Sized + Send + Sync + 'static>(
        &self,
        boundary: Option<&RequestBoundary>,
    ) -> DiResult<Arc<B>> {
        let stack = ResolutionStack::default();
        let resolver = Resolver {
            container: self,
            boundary,
            stack: &stack,
            overrides: None,
        };
        resolver.resolve::<B>()
    }

    /// Construct an instance of `C` directly, outside any binding.
    ///
    /// Constructor parameters matching an entry in `overrides` (by name) use
    /// the supplied value; every other parameter is resolved through this
    /// container, passing `boundary` along.
    pub fn create_object<C: Injectable>(
        &self,
        overrides: &Overrides,
        boundary: Option<&RequestBoundary>,
    ) -> DiResult<Arc<C>> {
        let stack = ResolutionStack::default();
        let resolver = Resolver {
            container: self,
            boundary,
            stack: &stack,
            overrides: Some(overrides),
        };
        resolver.construct_type::<C>()
    }

    /// Check whether a binding exists for base type `B`.
    pub fn contains<B: ?Sized + 'static>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<B>())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Stack of types currently under construction, used to detect dependency
/// cycles before they recurse.
#[derive(Default)]
struct ResolutionStack {
    frames: RefCell<Vec<(TypeId, &'static str)>>,
}

impl ResolutionStack {
    fn enter(&self, type_id: TypeId, type_name: &'static str) -> DiResult<()> {
        let mut frames = self.frames.borrow_mut();
        if frames.iter().any(|(id, _)| *id == type_id) {
            let chain = frames
                .iter()
                .map(|(_, name)| *name)
                .chain(std::iter::once(type_name))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(DiError::CircularDependency {
                type_name,
                chain,
            });
        }
        frames.push((type_id, type_name));
        Ok(())
    }

    fn exit(&self) {
        self.frames.borrow_mut().pop();
    }
}

/// Resolution handle threaded through [`Injectable::construct`].
///
/// Carries the container, the active boundary (if any), the cycle-detection
/// stack and the top-level overrides of a `create_object` call.
pub struct Resolver<'a> {
    container: &'a Container,
    boundary: Option<&'a RequestBoundary>,
    stack: &'a ResolutionStack,
    overrides: Option<&'a Overrides>,
}

impl<'a> Resolver<'a> {
    /// Resolve a dependency of base type `B` through the container.
    pub fn resolve<B: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<B>> {
        let base_id = TypeId::of::<B>();

        // Clone the record out so the map shard is released before any
        // recursive construction below re-enters the bindings map.
        let record = self
            .container
            .bindings
            .get(&base_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(DiError::unbound::<B>)?;

        match record.scope {
            ScopeKind::Singleton => {
                if let Some(cached) = record.singleton.get() {
                    trace!(base = record.concrete_name, "singleton cache hit");
                    return recover::<B>(cached);
                }

                // The cycle check must run before the cell is entered:
                // re-initializing a OnceCell from its own init closure does
                // not return, so a same-task cycle has to be rejected here.
                // The cell then serializes cross-thread first access, so
                // construction runs at most once per binding, and a failed
                // construction leaves the cell empty.
                self.stack.enter(record.concrete_id, record.concrete_name)?;
                let result = record
                    .singleton
                    .get_or_try_init(|| self.construct(&record));
                self.stack.exit();
                recover::<B>(result?)
            }
            ScopeKind::Request => {
                let boundary = self
                    .boundary
                    .ok_or_else(DiError::scope_unavailable::<B>)?;

                if let Some(cached) = boundary.cached(&base_id) {
                    trace!(
                        base = record.concrete_name,
                        boundary = %boundary.id(),
                        "request cache hit"
                    );
                    return recover::<B>(&cached);
                }

                self.stack.enter(record.concrete_id, record.concrete_name)?;
                let result = self.construct(&record);
                self.stack.exit();

                let stored = boundary.store(base_id, record.concrete_name, result?)?;
                recover::<B>(&stored)
            }
        }
    }

    /// Resolve a constructor parameter, translating a missing binding into
    /// an error naming the parameter and its owning type.
    ///
    /// Consults the active overrides first, by parameter name.
    pub fn field<T: ?Sized + Send + Sync + 'static>(
        &self,
        owner: &'static str,
        param: &'static str,
    ) -> DiResult<Arc<T>> {
        if let Some(overrides) = self.overrides {
            if let Some(value) = overrides.get::<T>(param)? {
                return Ok(value);
            }
        }

        self.resolve::<T>().map_err(|err| match err {
            DiError::UnboundType { type_name } => DiError::UnresolvableDependency {
                owner,
                param,
                type_name,
            },
            other => other,
        })
    }

    /// The boundary this resolution runs under, if any.
    pub fn boundary(&self) -> Option<&RequestBoundary> {
        self.boundary
    }

    // The caller is responsible for pushing the cycle-detection frame.
    fn construct(&self, record: &BindingRecord) -> DiResult<AnyInstance> {
        let constructor = record.constructor.as_ref().ok_or_else(|| {
            DiError::improper_configuration(format!(
                "value binding for `{}` has no constructor",
                record.concrete_name
            ))
        })?;

        trace!(concrete = record.concrete_name, "constructing instance");

        // Nested resolutions never see the top-level overrides.
        let nested = Resolver {
            container: self.container,
            boundary: self.boundary,
            stack: self.stack,
            overrides: None,
        };
        constructor(&nested)
    }

    fn construct_type<C: Injectable>(&self) -> DiResult<Arc<C>> {
        self.stack
            .enter(TypeId::of::<C>(), std::any::type_name::<C>())?;
        let result = C::construct(self);
        self.stack.exit();
        result.map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Leaf;

    impl Injectable for Leaf {
        fn construct(_: &Resolver<'_>) -> DiResult<Self> {
            Ok(Leaf)
        }
    }

    #[derive(Debug)]
    struct Composite {
        leaf: Arc<Leaf>,
    }

    impl Injectable for Composite {
        fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
            Ok(Composite {
                leaf: resolver.field("Composite", "leaf")?,
            })
        }
    }

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct ConcreteNamed;

    impl Named for ConcreteNamed {
        fn name(&self) -> &str {
            "concrete"
        }
    }

    impl Injectable for ConcreteNamed {
        fn construct(_: &Resolver<'_>) -> DiResult<Self> {
            Ok(ConcreteNamed)
        }
    }

    struct Counting;

    static CONSTRUCTED: AtomicU32 = AtomicU32::new(0);

    impl Injectable for Counting {
        fn construct(_: &Resolver<'_>) -> DiResult<Self> {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Ok(Counting)
        }
    }

    #[derive(Debug)]
    struct Ping {
        #[allow(dead_code)]
        pong: Arc<Pong>,
    }

    #[derive(Debug)]
    struct Pong {
        #[allow(dead_code)]
        ping: Arc<Ping>,
    }

    impl Injectable for Ping {
        fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
            Ok(Ping {
                pong: resolver.field("Ping", "pong")?,
            })
        }
    }

    impl Injectable for Pong {
        fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
            Ok(Pong {
                ping: resolver.field("Pong", "ping")?,
            })
        }
    }

    #[test]
    fn test_singleton_identity() {
        let container = Container::new();
        container.register::<Leaf>(ScopeKind::Singleton);

        let a = container.resolve::<Leaf>(None).unwrap();
        let b = container.resolve::<Leaf>(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_singleton_constructed_once() {
        let container = Container::new();
        container.register::<Counting>(ScopeKind::Singleton);

        CONSTRUCTED.store(0, Ordering::SeqCst);
        container.resolve::<Counting>(None).unwrap();
        container.resolve::<Counting>(None).unwrap();
        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbound_type() {
        let container = Container::new();
        let err = container.resolve::<Leaf>(None).unwrap_err();
        assert!(matches!(err, DiError::UnboundType { .. }));
    }

    #[test]
    fn test_constructor_dependency_resolution() {
        let container = Container::new();
        container.register::<Leaf>(ScopeKind::Singleton);
        container.register::<Composite>(ScopeKind::Singleton);

        let composite = container.resolve::<Composite>(None).unwrap();
        let leaf = container.resolve::<Leaf>(None).unwrap();
        assert!(Arc::ptr_eq(&composite.leaf, &leaf));
    }

    #[test]
    fn test_unresolvable_dependency_names_parameter() {
        let container = Container::new();
        container.register::<Composite>(ScopeKind::Singleton);

        let err = container.resolve::<Composite>(None).unwrap_err();
        match err {
            DiError::UnresolvableDependency { owner, param, .. } => {
                assert_eq!(owner, "Composite");
                assert_eq!(param, "leaf");
            }
            other => panic!("expected UnresolvableDependency, got {other}"),
        }
    }

    #[test]
    fn test_circular_dependency_is_detected() {
        let container = Container::new();
        container.register::<Ping>(ScopeKind::Singleton);
        container.register::<Pong>(ScopeKind::Singleton);

        let err = container.resolve::<Ping>(None).unwrap_err();
        assert!(matches!(err, DiError::CircularDependency { .. }));
    }

    #[test]
    fn test_failed_construction_is_not_cached() {
        struct Fallible;

        static ATTEMPTS: AtomicU32 = AtomicU32::new(0);

        impl Injectable for Fallible {
            fn construct(_: &Resolver<'_>) -> DiResult<Self> {
                if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DiError::improper_configuration("first attempt fails"))
                } else {
                    Ok(Fallible)
                }
            }
        }

        let container = Container::new();
        container.register::<Fallible>(ScopeKind::Singleton);

        assert!(container.resolve::<Fallible>(None).is_err());
        assert!(container.resolve::<Fallible>(None).is_ok());
    }

    #[test]
    fn test_trait_object_binding() {
        let container = Container::new();
        container.register_as::<dyn Named, ConcreteNamed>(
            |concrete| concrete as Arc<dyn Named>,
            ScopeKind::Singleton,
        );

        let named = container.resolve::<dyn Named>(None).unwrap();
        assert_eq!(named.name(), "concrete");
    }

    #[test]
    fn test_add_singleton_value() {
        let container = Container::new();
        container.add_singleton(Arc::new(42_u64));

        let value = container.resolve::<u64>(None).unwrap();
        assert_eq!(*value, 42);
    }

    #[test]
    fn test_request_scope_requires_boundary() {
        let container = Container::new();
        container.register::<Leaf>(ScopeKind::Request);

        let err = container.resolve::<Leaf>(None).unwrap_err();
        assert!(matches!(err, DiError::ScopeUnavailable { .. }));
    }

    #[test]
    fn test_create_object_with_overrides() {
        let container = Container::new();
        let overrides = Overrides::new().with("leaf", Arc::new(Leaf));

        // Leaf is not registered; the override must satisfy the parameter.
        let composite = container.create_object::<Composite>(&overrides, None).unwrap();
        assert!(container.resolve::<Leaf>(None).is_err());
        drop(composite);
    }

    #[test]
    fn test_overrides_do_not_leak_into_nested_construction() {
        #[derive(Debug)]
        struct Outer {
            #[allow(dead_code)]
            inner: Arc<Composite>,
        }

        impl Injectable for Outer {
            fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
                Ok(Outer {
                    inner: resolver.field("Outer", "inner")?,
                })
            }
        }

        let container = Container::new();
        container.register::<Composite>(ScopeKind::Singleton);
        let overrides = Overrides::new().with("leaf", Arc::new(Leaf));

        // Composite's own `leaf` parameter is nested one level down, so the
        // top-level override does not apply there and resolution fails.
        let err = container.create_object::<Outer>(&overrides, None).unwrap_err();
        assert!(matches!(err, DiError::UnresolvableDependency { .. }));
    }

    #[test]
    fn test_last_write_wins() {
        let container = Container::new();
        container.add_singleton(Arc::new(1_u64));
        container.add_singleton(Arc::new(2_u64));

        let value = container.resolve::<u64>(None).unwrap();
        assert_eq!(*value, 2);
    }
}
