use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::ConfigService;
use crate::context::connection::{ConnectionKind, ConnectionScope, Transport};
use crate::context::current::current_boundary;
use crate::context::execution::{ExecutionContext, OperationMeta, Reflector};
use crate::context::host::{HostContext, HttpConnectionContext, WebSocketContext};
use crate::di::{Container, DiResult, Injectable, ProviderConfig, RequestBoundary, Resolver, ScopeKind};
use crate::error::ContextError;

/// Creates [`HostContext`]s for inbound connections.
///
/// Request-scoped: each connection gets its own factory instance from the
/// boundary cache.
#[derive(Debug, Default)]
pub struct HostContextFactory;

impl Injectable for HostContextFactory {
    const SCOPE: Option<ScopeKind> = Some(ScopeKind::Request);

    fn construct(_: &Resolver<'_>) -> DiResult<Self> {
        Ok(Self)
    }
}

impl HostContextFactory {
    /// Build a host context for the given connection, bound to `boundary`.
    pub fn create_context(
        &self,
        boundary: Arc<RequestBoundary>,
        scope: ConnectionScope,
        transport: Arc<Transport>,
    ) -> HostContext {
        trace!(kind = %scope.kind(), path = scope.path(), "creating host context");
        HostContext::new(scope, transport, boundary)
    }
}

/// Narrows host contexts to the HTTP view.
///
/// Validation is deliberately skipped: an HTTP connection view is valid for
/// websocket connections too, since a websocket starts as an HTTP handshake.
#[derive(Debug, Default)]
pub struct HttpConnectionContextFactory;

impl Injectable for HttpConnectionContextFactory {
    const SCOPE: Option<ScopeKind> = Some(ScopeKind::Request);

    fn construct(_: &Resolver<'_>) -> DiResult<Self> {
        Ok(Self)
    }
}

impl HttpConnectionContextFactory {
    pub fn create(&self, context: &HostContext) -> Result<HttpConnectionContext, ContextError> {
        self.validate(context)?;
        Ok(context.switch_to_http())
    }

    fn validate(&self, _context: &HostContext) -> Result<(), ContextError> {
        Ok(())
    }
}

/// Narrows host contexts to the websocket view, rejecting any other
/// connection kind.
#[derive(Debug, Default)]
pub struct WebSocketContextFactory;

impl Injectable for WebSocketContextFactory {
    const SCOPE: Option<ScopeKind> = Some(ScopeKind::Request);

    fn construct(_: &Resolver<'_>) -> DiResult<Self> {
        Ok(Self)
    }
}

impl WebSocketContextFactory {
    pub fn create(&self, context: &HostContext) -> Result<WebSocketContext, ContextError> {
        self.validate(context)?;
        context.switch_to_websocket()
    }

    fn validate(&self, context: &HostContext) -> Result<(), ContextError> {
        if context.kind() != ConnectionKind::Websocket {
            return Err(ContextError::HostContextType {
                expected: "Websocket",
                actual: context.kind().to_string(),
            });
        }
        Ok(())
    }
}

/// Creates [`ExecutionContext`]s for route invocations.
///
/// Requires a resolution boundary to be published for the current task;
/// invoking it from background work detached from any connection fails with
/// [`ContextError::ContextUnavailable`].
pub struct ExecutionContextFactory {
    reflector: Arc<Reflector>,
}

impl Injectable for ExecutionContextFactory {
    const SCOPE: Option<ScopeKind> = Some(ScopeKind::Request);

    fn construct(resolver: &Resolver<'_>) -> DiResult<Self> {
        Ok(Self {
            reflector: resolver.field("ExecutionContextFactory", "reflector")?,
        })
    }
}

impl ExecutionContextFactory {
    pub fn create_context(
        &self,
        operation: Arc<OperationMeta>,
        scope: ConnectionScope,
        transport: Arc<Transport>,
    ) -> Result<ExecutionContext, ContextError> {
        let boundary = current_boundary()?;

        trace!(
            operation = operation.name(),
            boundary = %boundary.id(),
            "creating execution context"
        );
        let host = HostContext::new(scope, transport, boundary);
        Ok(ExecutionContext::new(
            host,
            operation,
            Arc::clone(&self.reflector),
        ))
    }
}

/// Installs the built-in providers at bootstrap.
pub struct CoreServiceRegistration;

impl CoreServiceRegistration {
    pub fn register_all(container: &Container) -> DiResult<()> {
        debug!("registering core services");

        ProviderConfig::<Reflector>::provide()
            .use_value(Arc::new(Reflector::new()))
            .register(container)?;
        ProviderConfig::<ConfigService>::provide()
            .use_value(Arc::new(ConfigService::new()))
            .register(container)?;

        // Context factories live in the request scope declared on each type.
        ProviderConfig::<HostContextFactory>::new().register(container)?;
        ProviderConfig::<HttpConnectionContextFactory>::new().register(container)?;
        ProviderConfig::<WebSocketContextFactory>::new().register(container)?;
        ProviderConfig::<ExecutionContextFactory>::new().register(container)?;

        Ok(())
    }
}
