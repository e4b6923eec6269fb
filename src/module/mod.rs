mod tree;

pub use tree::{ModuleNodeInfo, ModuleTreeManager};

use dashmap::DashMap;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::di::{Container, DiResult, ProviderConfig};

/// Identity of a module in the tree.
///
/// Modules are identified by a marker type; the key carries the type id plus
/// the type name for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleKey {
    id: TypeId,
    name: &'static str,
}

impl ModuleKey {
    pub fn of<M: 'static>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleKey({})", self.name)
    }
}

impl std::fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

struct PendingProvider {
    base_id: TypeId,
    base_name: &'static str,
    export: bool,
    register: Box<dyn FnOnce(&Container) -> DiResult<()> + Send>,
}

/// A module: a named owner of a provider subset.
///
/// Each module owns the providers it declares and an export list that is
/// always a subset of those providers. Providers added before the module is
/// marked ready are queued; marking the module ready flushes the queue into
/// the shared container in insertion order. Once ready, `add_provider`
/// writes through to the container immediately.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::di::{Container, DiResult, Injectable, ProviderConfig, Resolver};
/// use trellis::module::ModuleRef;
///
/// struct UsersModule;
///
/// struct UserService;
///
/// impl Injectable for UserService {
///     fn construct(_: &Resolver<'_>) -> DiResult<Self> {
///         Ok(UserService)
///     }
/// }
///
/// let container = Arc::new(Container::new());
/// let module = ModuleRef::new::<UsersModule>(Arc::clone(&container));
///
/// module
///     .add_provider(ProviderConfig::<UserService>::new(), true)
///     .unwrap();
/// assert!(!container.contains::<UserService>());
///
/// module.mark_ready().unwrap();
/// assert!(container.contains::<UserService>());
/// ```
pub struct ModuleRef {
    key: ModuleKey,
    container: Arc<Container>,
    providers: DashMap<TypeId, &'static str>,
    exports: DashMap<TypeId, &'static str>,
    pending: Mutex<Vec<PendingProvider>>,
    ready: AtomicBool,
}

impl ModuleRef {
    pub fn new<M: 'static>(container: Arc<Container>) -> Arc<Self> {
        Arc::new(Self {
            key: ModuleKey::of::<M>(),
            container,
            providers: DashMap::new(),
            exports: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> ModuleKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Declare a provider on this module, optionally exporting it.
    ///
    /// Validation of the provider declaration happens immediately. If the
    /// module is ready the binding is written through to the container;
    /// otherwise registration is deferred until [`ModuleRef::mark_ready`].
    pub fn add_provider<B: ?Sized + Send + Sync + 'static>(
        &self,
        provider: ProviderConfig<B>,
        export: bool,
    ) -> DiResult<()> {
        provider.validate()?;

        let base_id = TypeId::of::<B>();
        let base_name = std::any::type_name::<B>();
        self.providers.insert(base_id, base_name);

        if self.is_ready() {
            provider.register(&self.container)?;
            if export {
                self.exports.insert(base_id, base_name);
            }
            return Ok(());
        }

        debug!(
            module = self.name(),
            provider = base_name,
            "module not ready; provider registration deferred"
        );
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PendingProvider {
                base_id,
                base_name,
                export,
                register: Box::new(move |container| provider.register(container)),
            });
        Ok(())
    }

    /// Export an already-declared provider.
    ///
    /// # Errors
    /// Fails if the base type was never declared on this module; exports are
    /// always a subset of the owned providers.
    pub fn add_export<B: ?Sized + Send + Sync + 'static>(&self) -> DiResult<()> {
        let base_id = TypeId::of::<B>();
        let base_name = std::any::type_name::<B>();

        if !self.providers.contains_key(&base_id) {
            return Err(crate::error::DiError::improper_configuration(format!(
                "cannot export `{base_name}` from `{}`: it is not one of the module's providers",
                self.name(),
            )));
        }

        self.exports.insert(base_id, base_name);
        Ok(())
    }

    /// Flush deferred providers into the container and mark the module
    /// ready. Idempotent.
    pub fn mark_ready(&self) -> DiResult<()> {
        if self.ready.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        debug!(
            module = self.name(),
            providers = pending.len(),
            "marking module ready"
        );

        for entry in pending {
            (entry.register)(&self.container)?;
            if entry.export {
                self.exports.insert(entry.base_id, entry.base_name);
            }
        }
        Ok(())
    }

    /// Base types this module declares, by name.
    pub fn providers(&self) -> Vec<&'static str> {
        self.providers.iter().map(|entry| *entry.value()).collect()
    }

    /// Base types this module exports, by name.
    pub fn exports(&self) -> Vec<&'static str> {
        self.exports.iter().map(|entry| *entry.value()).collect()
    }

    pub fn provides<B: ?Sized + 'static>(&self) -> bool {
        self.providers.contains_key(&TypeId::of::<B>())
    }

    pub fn exports_type<B: ?Sized + 'static>(&self) -> bool {
        self.exports.contains_key(&TypeId::of::<B>())
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("module", &self.name())
            .field("ready", &self.is_ready())
            .field("providers", &self.providers.len())
            .field("exports", &self.exports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{Injectable, Resolver};

    struct TestModule;

    struct ServiceA;

    impl Injectable for ServiceA {
        fn construct(_: &Resolver<'_>) -> DiResult<Self> {
            Ok(ServiceA)
        }
    }

    struct ServiceB;

    impl Injectable for ServiceB {
        fn construct(_: &Resolver<'_>) -> DiResult<Self> {
            Ok(ServiceB)
        }
    }

    #[test]
    fn test_providers_deferred_until_ready() {
        let container = Arc::new(Container::new());
        let module = ModuleRef::new::<TestModule>(Arc::clone(&container));

        module
            .add_provider(ProviderConfig::<ServiceA>::new(), false)
            .unwrap();
        assert!(!container.contains::<ServiceA>());
        assert!(module.provides::<ServiceA>());

        module.mark_ready().unwrap();
        assert!(container.contains::<ServiceA>());
    }

    #[test]
    fn test_write_through_when_ready() {
        let container = Arc::new(Container::new());
        let module = ModuleRef::new::<TestModule>(Arc::clone(&container));
        module.mark_ready().unwrap();

        module
            .add_provider(ProviderConfig::<ServiceB>::new(), true)
            .unwrap();
        assert!(container.contains::<ServiceB>());
        assert!(module.exports_type::<ServiceB>());
    }

    #[test]
    fn test_export_requires_declared_provider() {
        let container = Arc::new(Container::new());
        let module = ModuleRef::new::<TestModule>(container);

        assert!(module.add_export::<ServiceA>().is_err());

        module
            .add_provider(ProviderConfig::<ServiceA>::new(), false)
            .unwrap();
        assert!(module.add_export::<ServiceA>().is_ok());
    }

    #[test]
    fn test_exports_flushed_with_ready() {
        let container = Arc::new(Container::new());
        let module = ModuleRef::new::<TestModule>(Arc::clone(&container));

        module
            .add_provider(ProviderConfig::<ServiceA>::new(), true)
            .unwrap();
        assert!(!module.exports_type::<ServiceA>());

        module.mark_ready().unwrap();
        assert!(module.exports_type::<ServiceA>());
    }

    #[test]
    fn test_mark_ready_idempotent() {
        let container = Arc::new(Container::new());
        let module = ModuleRef::new::<TestModule>(container);
        module.mark_ready().unwrap();
        module.mark_ready().unwrap();
        assert!(module.is_ready());
    }
}
