//! # Trellis
//!
//! A modular dependency-injection and request-context core for Rust web
//! services.
//!
//! Trellis provides the object-graph and scoping engine of a NestJS-style
//! framework: modules own providers and compose into a tree, a shared
//! container resolves singleton and request-scoped instances, and every
//! inbound connection runs inside its own resolution boundary.
//!
//! ## Features
//!
//! - **Scoped Dependency Injection**: singleton and request-scoped providers
//!   with lazy construction, cycle detection, and per-connection caches
//! - **Module Tree**: modules own provider subsets with export lists,
//!   composed into a single-rooted tree with deterministic search order
//! - **Request Contexts**: host and execution contexts bound to each inbound
//!   connection, published task-locally with guaranteed teardown
//! - **Handler Integration**: an `Inject<T>` extractor resolving through the
//!   active connection's boundary
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis::context::{CoreServiceRegistration, RequestScopeManager, current_boundary};
//! use trellis::di::{Container, DiResult, Injectable, ProviderConfig, Resolver, ScopeKind};
//! use trellis::module::{ModuleRef, ModuleTreeManager};
//!
//! // 1. Define your services
//! struct UserRepository;
//!
//! impl Injectable for UserRepository {
//!     fn construct(_: &Resolver<'_>) -> DiResult<Self> {
//!         Ok(UserRepository)
//!     }
//! }
//!
//! struct UserService {
//!     repository: Arc<UserRepository>,
//! }
//!
//! impl Injectable for UserService {
//!     fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
//!         Ok(UserService {
//!             repository: resolver.field("UserService", "repository")?,
//!         })
//!     }
//! }
//!
//! // 2. Define your module
//! struct UsersModule;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 3. Bootstrap: build the module tree once, at process start
//! let container = Arc::new(Container::new());
//! CoreServiceRegistration::register_all(&container).unwrap();
//!
//! let tree = ModuleTreeManager::new(Arc::clone(&container));
//! let users = ModuleRef::new::<UsersModule>(Arc::clone(&container));
//! users.add_provider(ProviderConfig::<UserRepository>::new(), false).unwrap();
//! users.add_provider(ProviderConfig::<UserService>::new(), true).unwrap();
//! users.mark_ready().unwrap();
//! tree.add_module(users, None).unwrap();
//!
//! // 4. Handle each connection inside its own request scope
//! let scopes = RequestScopeManager::new(Arc::clone(&container));
//! scopes
//!     .run_scoped(async {
//!         let boundary = current_boundary().unwrap();
//!         let service = boundary.resolve::<UserService>().unwrap();
//!         let _ = &service.repository;
//!     })
//!     .await;
//! # }
//! ```

pub mod config;
pub mod context;
pub mod di;
pub mod error;
pub mod module;
pub mod worker;

// Re-export core types
pub use config::ConfigService;
pub use context::{
    ConnectionKind, ConnectionScope, ExecutionContext, HostContext, OperationMeta,
    RequestScopeManager, current_boundary,
};
pub use di::{Container, Inject, Injectable, ProviderConfig, RequestBoundary, ScopeKind};
pub use error::{Result, TrellisError};
pub use module::{ModuleKey, ModuleRef, ModuleTreeManager};

// Re-export commonly used types from dependencies
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::ConfigService;
    pub use crate::context::{
        ConnectionKind, ConnectionScope, CoreServiceRegistration, ExecutionContext,
        ExecutionContextFactory, HostContext, HostContextFactory, HttpConnectionContext,
        OperationMeta, Reflector, RequestScopeManager, Transport, TransportMessage,
        WebSocketContext, current_boundary, try_current_boundary,
    };
    pub use crate::di::{
        BoundaryState, Container, DiResult, Inject, Injectable, Overrides, ProviderConfig,
        RequestBoundary, Resolver, ScopeKind, ScopeRegistry,
    };
    pub use crate::error::{ContextError, DiError, ModuleTreeError, Result, TrellisError};
    pub use crate::module::{ModuleKey, ModuleNodeInfo, ModuleRef, ModuleTreeManager};
    pub use crate::worker::WorkerPool;
    pub use std::sync::Arc;
}
