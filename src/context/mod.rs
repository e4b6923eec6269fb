mod connection;
pub(crate) mod current;
mod execution;
mod factory;
mod host;

pub use connection::{
    ConnectionKind, ConnectionScope, ConnectionScopeBuilder, Transport, TransportMessage,
};
pub use current::{RequestScopeManager, current_boundary, try_current_boundary};
pub use execution::{ExecutionContext, OperationMeta, OperationMetaBuilder, Reflector};
pub use factory::{
    CoreServiceRegistration, ExecutionContextFactory, HostContextFactory,
    HttpConnectionContextFactory, WebSocketContextFactory,
};
pub use host::{HostContext, HttpConnectionContext, WebSocketContext};
