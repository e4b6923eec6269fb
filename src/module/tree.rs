use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::di::{Container, ProviderConfig};
use crate::error::{ModuleTreeError, Result, TrellisError};
use crate::module::{ModuleKey, ModuleRef};

type TreeResult<T> = std::result::Result<T, ModuleTreeError>;

/// Snapshot of one tree node, handed out by lookup and search operations.
#[derive(Clone)]
pub struct ModuleNodeInfo {
    pub value: Arc<ModuleRef>,
    pub parent: Option<ModuleKey>,
    pub dependencies: Vec<ModuleKey>,
}

impl ModuleNodeInfo {
    pub fn key(&self) -> ModuleKey {
        self.value.key()
    }

    pub fn name(&self) -> &'static str {
        self.value.name()
    }

    pub fn is_ready(&self) -> bool {
        self.value.is_ready()
    }

    pub fn exports(&self) -> Vec<&'static str> {
        self.value.exports()
    }
}

impl std::fmt::Debug for ModuleNodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "module={} ready={} dependencies={}",
            self.name(),
            self.is_ready(),
            self.dependencies.len()
        )
    }
}

struct TreeNode {
    value: Arc<ModuleRef>,
    parent: Option<ModuleKey>,
    dependencies: Vec<ModuleKey>,
}

/// Arena of module nodes. Slots are reused after `unregister`; `order`
/// preserves module insertion order for deterministic iteration.
#[derive(Default)]
struct TreeInner {
    slots: Vec<Option<TreeNode>>,
    index: HashMap<ModuleKey, usize>,
    order: Vec<ModuleKey>,
    free: Vec<usize>,
    core: Option<ModuleKey>,
    root: Option<ModuleKey>,
}

impl TreeInner {
    fn node(&self, key: &ModuleKey) -> Option<&TreeNode> {
        self.index
            .get(key)
            .and_then(|slot| self.slots.get(*slot))
            .and_then(|node| node.as_ref())
    }

    fn node_mut(&mut self, key: &ModuleKey) -> Option<&mut TreeNode> {
        let slot = *self.index.get(key)?;
        self.slots.get_mut(slot).and_then(|node| node.as_mut())
    }

    fn insert(&mut self, key: ModuleKey, node: TreeNode) {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.order.push(key);
    }

    fn remove(&mut self, key: &ModuleKey) {
        if let Some(slot) = self.index.remove(key) {
            self.slots[slot] = None;
            self.free.push(slot);
            self.order.retain(|k| k != key);
        }
    }

    fn info(&self, key: &ModuleKey) -> Option<ModuleNodeInfo> {
        self.node(key).map(|node| ModuleNodeInfo {
            value: Arc::clone(&node.value),
            parent: node.parent,
            dependencies: node.dependencies.clone(),
        })
    }
}

/// The module tree: every registered module, its providers, and the
/// parent/child edges between modules.
///
/// The tree is built once, at bootstrap, on a single thread; after the
/// server starts accepting connections it is read-only. Mutating it
/// concurrently with request handling is not supported.
///
/// Root invariants: the first parentless module becomes the root when no
/// core module is designated; with a core module, the root is the first
/// module attached beneath it, and attaching a second distinct module there
/// fails with [`ModuleTreeError::MultipleRoots`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trellis::di::Container;
/// use trellis::module::{ModuleRef, ModuleTreeManager};
///
/// struct AppModule;
/// struct UsersModule;
///
/// let container = Arc::new(Container::new());
/// let tree = ModuleTreeManager::new(Arc::clone(&container));
///
/// let app = ModuleRef::new::<AppModule>(Arc::clone(&container));
/// let users = ModuleRef::new::<UsersModule>(Arc::clone(&container));
///
/// tree.add_module(app, None).unwrap();
/// tree.add_module(users, Some(trellis::module::ModuleKey::of::<AppModule>()))
///     .unwrap();
///
/// assert_eq!(tree.root_module().unwrap().name(), std::any::type_name::<AppModule>());
/// ```
pub struct ModuleTreeManager {
    container: Arc<Container>,
    inner: RwLock<TreeInner>,
}

impl ModuleTreeManager {
    pub fn new(container: Arc<Container>) -> Self {
        Self {
            container,
            inner: RwLock::new(TreeInner::default()),
        }
    }

    /// Create a manager with a designated core module. The core module is
    /// registered immediately and never becomes the root itself; the root is
    /// the first module attached beneath it.
    pub fn with_core_module(container: Arc<Container>, core: Arc<ModuleRef>) -> TreeResult<Self> {
        let manager = Self::new(container);
        {
            let mut inner = manager.write();
            inner.core = Some(core.key());
        }
        manager.add_module(core, None)?;
        Ok(manager)
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn core_module(&self) -> Option<ModuleKey> {
        self.read().core
    }

    /// Key of the tree's root module.
    pub fn root_module(&self) -> TreeResult<ModuleKey> {
        self.read().root.ok_or(ModuleTreeError::RootNotSet)
    }

    /// The root module itself.
    pub fn get_root_module(&self) -> TreeResult<Arc<ModuleRef>> {
        let inner = self.read();
        let root = inner.root.ok_or(ModuleTreeError::RootNotSet)?;
        inner
            .node(&root)
            .map(|node| Arc::clone(&node.value))
            .ok_or(ModuleTreeError::RootNotSet)
    }

    /// Add a module to the tree.
    ///
    /// # Errors
    /// - [`ModuleTreeError::DuplicateModule`] if the identity is present.
    /// - [`ModuleTreeError::MissingParent`] if `parent` is not in the tree.
    /// - [`ModuleTreeError::MultipleRoots`] if a second distinct module is
    ///   attached directly beneath the core module once a root exists.
    pub fn add_module(&self, value: Arc<ModuleRef>, parent: Option<ModuleKey>) -> TreeResult<()> {
        let key = value.key();
        let mut inner = self.write();

        if inner.index.contains_key(&key) {
            return Err(ModuleTreeError::DuplicateModule { module: key.name() });
        }

        if let Some(parent_key) = parent {
            if inner.node(&parent_key).is_none() {
                return Err(ModuleTreeError::MissingParent {
                    parent: parent_key.name(),
                });
            }
            if Some(parent_key) == inner.core {
                if let Some(root) = inner.root {
                    return Err(ModuleTreeError::MultipleRoots {
                        root: root.name(),
                        attempted: key.name(),
                    });
                }
            }
        }

        debug!(module = key.name(), parent_module = parent.map(|p| p.name()), "adding module");
        inner.insert(
            key,
            TreeNode {
                value,
                parent,
                dependencies: Vec::new(),
            },
        );

        match parent {
            Some(parent_key) => {
                if let Some(parent_node) = inner.node_mut(&parent_key) {
                    parent_node.dependencies.push(key);
                }
                if Some(parent_key) == inner.core {
                    inner.root = Some(key);
                }
            }
            None => {
                if inner.root.is_none() && inner.core.is_none() {
                    inner.root = Some(key);
                }
            }
        }

        Ok(())
    }

    /// Replace the stored value for an existing module.
    ///
    /// The dependency list is preserved; the parent is preserved unless a
    /// new one is supplied, in which case the node is re-attached beneath
    /// it. Re-parenting the root module is rejected.
    pub fn update_module(
        &self,
        value: Arc<ModuleRef>,
        parent: Option<ModuleKey>,
    ) -> TreeResult<()> {
        let key = value.key();
        let mut inner = self.write();

        if !inner.index.contains_key(&key) {
            return Err(ModuleTreeError::UnknownModule { module: key.name() });
        }

        if let Some(new_parent) = parent {
            if inner.node(&new_parent).is_none() {
                return Err(ModuleTreeError::MissingParent {
                    parent: new_parent.name(),
                });
            }
            if inner.root == Some(key) {
                return Err(ModuleTreeError::MultipleRoots {
                    root: key.name(),
                    attempted: new_parent.name(),
                });
            }

            let old_parent = inner.node(&key).and_then(|node| node.parent);
            if old_parent != Some(new_parent) {
                if let Some(old_key) = old_parent {
                    if let Some(old_node) = inner.node_mut(&old_key) {
                        old_node.dependencies.retain(|dep| *dep != key);
                    }
                }
                if let Some(new_node) = inner.node_mut(&new_parent) {
                    if !new_node.dependencies.contains(&key) {
                        new_node.dependencies.push(key);
                    }
                }
            }

            if let Some(node) = inner.node_mut(&key) {
                node.parent = Some(new_parent);
                node.value = value;
            }
        } else if let Some(node) = inner.node_mut(&key) {
            node.value = value;
        }

        Ok(())
    }

    /// Add the module if absent, update it otherwise.
    pub fn add_or_update(&self, value: Arc<ModuleRef>, parent: Option<ModuleKey>) -> TreeResult<()> {
        match self.add_module(Arc::clone(&value), parent) {
            Err(ModuleTreeError::DuplicateModule { .. }) => self.update_module(value, parent),
            other => other,
        }
    }

    /// Declare a provider on a registered module.
    ///
    /// Ready modules write through to the container; providers declared on
    /// modules that are not ready yet are deferred until readiness.
    pub fn add_provider<B: ?Sized + Send + Sync + 'static>(
        &self,
        module: ModuleKey,
        provider: ProviderConfig<B>,
        export: bool,
    ) -> Result<()> {
        let value = {
            let inner = self.read();
            inner
                .node(&module)
                .map(|node| Arc::clone(&node.value))
                .ok_or(ModuleTreeError::UnknownModule {
                    module: module.name(),
                })?
        };

        value
            .add_provider(provider, export)
            .map_err(TrellisError::from)
    }

    pub fn get_module(&self, key: ModuleKey) -> Option<ModuleNodeInfo> {
        self.read().info(&key)
    }

    /// Direct children of `parent`, in insertion order. An unknown parent
    /// yields an empty list.
    pub fn get_module_dependencies(&self, parent: ModuleKey) -> Vec<ModuleNodeInfo> {
        let inner = self.read();
        inner
            .node(&parent)
            .map(|node| {
                node.dependencies
                    .iter()
                    .filter_map(|key| inner.info(key))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct children of `parent` matching `predicate`.
    pub fn get_module_dependencies_matching<F>(
        &self,
        parent: ModuleKey,
        predicate: F,
    ) -> Vec<ModuleNodeInfo>
    where
        F: Fn(&ModuleNodeInfo) -> bool,
    {
        self.get_module_dependencies(parent)
            .into_iter()
            .filter(|info| predicate(info))
            .collect()
    }

    /// All modules matching `predicate`, in insertion order. Empty when
    /// nothing matches.
    pub fn find_module<F>(&self, predicate: F) -> Vec<ModuleNodeInfo>
    where
        F: Fn(&ModuleNodeInfo) -> bool,
    {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|key| inner.info(key))
            .filter(|info| predicate(info))
            .collect()
    }

    /// Depth-first search over the tree.
    ///
    /// Every node matching `filter_item` (in insertion order) is used as a
    /// search root; from each, nodes are visited parent-first, descending
    /// into dependencies in insertion order. The first node satisfying
    /// `find_predicate` wins. This ordering is load-bearing for
    /// deterministic provider-export resolution.
    pub fn search_module_tree<F, P>(&self, filter_item: F, find_predicate: P) -> Option<ModuleNodeInfo>
    where
        F: Fn(&ModuleNodeInfo) -> bool,
        P: Fn(&ModuleNodeInfo) -> bool,
    {
        let inner = self.read();

        fn dfs<P: Fn(&ModuleNodeInfo) -> bool>(
            inner: &TreeInner,
            key: &ModuleKey,
            find_predicate: &P,
        ) -> Option<ModuleNodeInfo> {
            let info = inner.info(key)?;
            if find_predicate(&info) {
                return Some(info);
            }
            for child in &info.dependencies {
                if let Some(found) = dfs(inner, child, find_predicate) {
                    return Some(found);
                }
            }
            None
        }

        let roots: Vec<ModuleKey> = inner
            .order
            .iter()
            .filter_map(|key| inner.info(key))
            .filter(|info| filter_item(info))
            .map(|info| info.key())
            .collect();

        for root in roots {
            if let Some(found) = dfs(&inner, &root, &find_predicate) {
                return Some(found);
            }
        }
        None
    }

    /// Remove a module and its subtree from the arena, freeing their slots.
    ///
    /// This is the explicit reclamation pass; nothing is collected
    /// automatically.
    pub fn unregister(&self, key: ModuleKey) -> TreeResult<()> {
        let mut inner = self.write();

        if !inner.index.contains_key(&key) {
            return Err(ModuleTreeError::UnknownModule { module: key.name() });
        }

        // Collect the subtree before mutating.
        let mut doomed = Vec::new();
        let mut queue = vec![key];
        while let Some(current) = queue.pop() {
            if let Some(node) = inner.node(&current) {
                queue.extend(node.dependencies.iter().copied());
            }
            doomed.push(current);
        }

        let parent = inner.node(&key).and_then(|node| node.parent);
        if let Some(parent_key) = parent {
            if let Some(parent_node) = inner.node_mut(&parent_key) {
                parent_node.dependencies.retain(|dep| *dep != key);
            }
        }

        debug!(module = key.name(), removed = doomed.len(), "unregistering module subtree");
        for dead in &doomed {
            inner.remove(dead);
            if inner.root == Some(*dead) {
                inner.root = None;
            }
            if inner.core == Some(*dead) {
                inner.core = None;
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().index.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ModuleTreeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("ModuleTreeManager")
            .field("modules", &inner.index.len())
            .field("root", &inner.root)
            .field("core", &inner.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{DiResult, Injectable, Resolver};

    struct CoreModule;
    struct AppModule;
    struct ModuleA;
    struct ModuleB;
    struct ModuleC;

    struct Marker;

    impl Injectable for Marker {
        fn construct(_: &Resolver<'_>) -> DiResult<Self> {
            Ok(Marker)
        }
    }

    fn tree() -> (Arc<Container>, ModuleTreeManager) {
        let container = Arc::new(Container::new());
        let manager = ModuleTreeManager::new(Arc::clone(&container));
        (container, manager)
    }

    fn module<M: 'static>(container: &Arc<Container>) -> Arc<ModuleRef> {
        ModuleRef::new::<M>(Arc::clone(container))
    }

    #[test]
    fn test_first_parentless_module_becomes_root() {
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();

        assert_eq!(
            manager.root_module().unwrap(),
            ModuleKey::of::<AppModule>()
        );
    }

    #[test]
    fn test_duplicate_module_is_rejected() {
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();

        let err = manager
            .add_module(module::<AppModule>(&container), None)
            .unwrap_err();
        assert!(matches!(err, ModuleTreeError::DuplicateModule { .. }));
    }

    #[test]
    fn test_missing_parent_is_rejected() {
        let (container, manager) = tree();
        let err = manager
            .add_module(
                module::<ModuleA>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap_err();
        assert!(matches!(err, ModuleTreeError::MissingParent { .. }));
    }

    #[test]
    fn test_core_module_adopts_first_child_as_root() {
        let container = Arc::new(Container::new());
        let manager = ModuleTreeManager::with_core_module(
            Arc::clone(&container),
            ModuleRef::new::<CoreModule>(Arc::clone(&container)),
        )
        .unwrap();

        // The core module itself is not the root.
        assert!(manager.root_module().is_err());

        manager
            .add_module(
                ModuleRef::new::<AppModule>(Arc::clone(&container)),
                Some(ModuleKey::of::<CoreModule>()),
            )
            .unwrap();
        assert_eq!(manager.root_module().unwrap(), ModuleKey::of::<AppModule>());
    }

    #[test]
    fn test_second_module_under_core_is_rejected() {
        let container = Arc::new(Container::new());
        let manager = ModuleTreeManager::with_core_module(
            Arc::clone(&container),
            ModuleRef::new::<CoreModule>(Arc::clone(&container)),
        )
        .unwrap();

        manager
            .add_module(
                ModuleRef::new::<AppModule>(Arc::clone(&container)),
                Some(ModuleKey::of::<CoreModule>()),
            )
            .unwrap();

        let err = manager
            .add_module(
                ModuleRef::new::<ModuleA>(Arc::clone(&container)),
                Some(ModuleKey::of::<CoreModule>()),
            )
            .unwrap_err();
        assert!(matches!(err, ModuleTreeError::MultipleRoots { .. }));
    }

    #[test]
    fn test_update_preserves_dependencies_and_parent() {
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();
        manager
            .add_module(
                module::<ModuleA>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap();

        manager
            .update_module(module::<AppModule>(&container), None)
            .unwrap();

        let info = manager.get_module(ModuleKey::of::<AppModule>()).unwrap();
        assert_eq!(info.dependencies, vec![ModuleKey::of::<ModuleA>()]);

        let child = manager.get_module(ModuleKey::of::<ModuleA>()).unwrap();
        assert_eq!(child.parent, Some(ModuleKey::of::<AppModule>()));
    }

    #[test]
    fn test_update_unknown_module_is_rejected() {
        let (container, manager) = tree();
        let err = manager
            .update_module(module::<AppModule>(&container), None)
            .unwrap_err();
        assert!(matches!(err, ModuleTreeError::UnknownModule { .. }));
    }

    #[test]
    fn test_add_or_update_falls_back_to_update() {
        let (container, manager) = tree();
        manager
            .add_or_update(module::<AppModule>(&container), None)
            .unwrap();
        manager
            .add_or_update(module::<AppModule>(&container), None)
            .unwrap();
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_search_visits_parent_first_in_insertion_order() {
        // root -> {A, B}, A -> {C}; a predicate matching only C must visit
        // root, A, C and never reach B.
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();
        manager
            .add_module(
                module::<ModuleA>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap();
        manager
            .add_module(
                module::<ModuleB>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap();
        manager
            .add_module(
                module::<ModuleC>(&container),
                Some(ModuleKey::of::<ModuleA>()),
            )
            .unwrap();

        let visited = std::sync::Mutex::new(Vec::new());
        let found = manager.search_module_tree(
            |info| info.parent.is_none(),
            |info| {
                visited.lock().unwrap().push(info.key());
                info.key() == ModuleKey::of::<ModuleC>()
            },
        );

        assert_eq!(found.unwrap().key(), ModuleKey::of::<ModuleC>());
        assert_eq!(
            *visited.lock().unwrap(),
            vec![
                ModuleKey::of::<AppModule>(),
                ModuleKey::of::<ModuleA>(),
                ModuleKey::of::<ModuleC>(),
            ]
        );
    }

    #[test]
    fn test_find_module_empty_when_no_match() {
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();

        let matches = manager.find_module(|info| info.name().contains("NoSuchModule"));
        assert!(matches.is_empty());
    }

    #[test]
    fn test_get_module_dependencies_returns_direct_children_only() {
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();
        manager
            .add_module(
                module::<ModuleA>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap();
        manager
            .add_module(
                module::<ModuleC>(&container),
                Some(ModuleKey::of::<ModuleA>()),
            )
            .unwrap();

        let children = manager.get_module_dependencies(ModuleKey::of::<AppModule>());
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key(), ModuleKey::of::<ModuleA>());
    }

    #[test]
    fn test_add_provider_requires_known_module() {
        let (_, manager) = tree();
        let err = manager
            .add_provider(
                ModuleKey::of::<AppModule>(),
                ProviderConfig::<Marker>::new(),
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TrellisError::ModuleTree(ModuleTreeError::UnknownModule { .. })
        ));
    }

    #[test]
    fn test_unregister_removes_subtree() {
        let (container, manager) = tree();
        manager.add_module(module::<AppModule>(&container), None).unwrap();
        manager
            .add_module(
                module::<ModuleA>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap();
        manager
            .add_module(
                module::<ModuleC>(&container),
                Some(ModuleKey::of::<ModuleA>()),
            )
            .unwrap();

        manager.unregister(ModuleKey::of::<ModuleA>()).unwrap();

        assert!(manager.get_module(ModuleKey::of::<ModuleA>()).is_none());
        assert!(manager.get_module(ModuleKey::of::<ModuleC>()).is_none());

        let root = manager.get_module(ModuleKey::of::<AppModule>()).unwrap();
        assert!(root.dependencies.is_empty());

        // Freed slots are reusable.
        manager
            .add_module(
                module::<ModuleB>(&container),
                Some(ModuleKey::of::<AppModule>()),
            )
            .unwrap();
        assert_eq!(manager.len(), 2);
    }
}
