use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrellisError>;

/// Errors raised by the DI container and provider configuration.
#[derive(Debug, Error)]
pub enum DiError {
    /// Invalid provider declaration. Fatal at bootstrap.
    #[error("Improper configuration: {message}")]
    ImproperConfiguration { message: String },

    /// No binding is registered for the requested base type.
    #[error("No binding registered for type: {type_name}")]
    UnboundType { type_name: &'static str },

    /// A constructor parameter could not be resolved and no override was supplied.
    #[error("Cannot resolve parameter `{param}` of `{owner}`: no binding for {type_name}")]
    UnresolvableDependency {
        owner: &'static str,
        param: &'static str,
        type_name: &'static str,
    },

    /// Constructor dependencies form a cycle.
    #[error("Circular dependency detected while constructing {type_name}: {chain}")]
    CircularDependency {
        type_name: &'static str,
        chain: String,
    },

    /// A request-scoped binding was resolved outside any connection boundary.
    #[error("Request-scoped type {type_name} resolved outside an active request boundary")]
    ScopeUnavailable { type_name: &'static str },

    /// A cached instance did not hold the expected type.
    #[error("Failed to downcast stored instance for type: {type_name}")]
    DowncastFailed { type_name: &'static str },
}

impl DiError {
    pub fn improper_configuration(message: impl Into<String>) -> Self {
        Self::ImproperConfiguration {
            message: message.into(),
        }
    }

    pub fn unbound<T: ?Sized + 'static>() -> Self {
        Self::UnboundType {
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn scope_unavailable<T: ?Sized + 'static>() -> Self {
        Self::ScopeUnavailable {
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_failed<T: ?Sized + 'static>() -> Self {
        Self::DowncastFailed {
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Structural violations of the module tree. Fatal at bootstrap, never
/// expected at runtime.
#[derive(Debug, Error)]
pub enum ModuleTreeError {
    #[error("Module {module} already exists. Use `update_module`")]
    DuplicateModule { module: &'static str },

    #[error("Module {module} does not exist. Use `add_module`")]
    UnknownModule { module: &'static str },

    #[error("Parent module {parent} has not been added to the tree")]
    MissingParent { parent: &'static str },

    #[error("The core module can only have `{root}` as its root dependency, got `{attempted}`")]
    MultipleRoots {
        root: &'static str,
        attempted: &'static str,
    },

    #[error("Root module is not ready")]
    RootNotSet,
}

/// Misuse of request scoping outside a valid boundary.
#[derive(Debug, Error)]
pub enum ContextError {
    /// No resolution boundary is published for the current task.
    #[error("No request context is active for the current task")]
    ContextUnavailable,

    /// A narrowing accessor was used on a connection of the wrong type.
    #[error("{expected} context is not allowed for scope type `{actual}`")]
    HostContextType {
        expected: &'static str,
        actual: String,
    },
}

/// Crate-level error, convertible into an HTTP response.
///
/// Bootstrap errors (configuration and tree-structure violations) are meant
/// to abort startup; resolution and context errors surface at the connection
/// boundary and map to a server-side error response.
#[derive(Debug, Error)]
pub enum TrellisError {
    #[error(transparent)]
    Di(#[from] DiError),

    #[error(transparent)]
    ModuleTree(#[from] ModuleTreeError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for TrellisError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let message = self.to_string();

        tracing::error!(error = %message, "request failed");

        (
            status,
            Json(json!({
                "statusCode": status.as_u16(),
                "message": message,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_di_error_messages() {
        let err = DiError::unbound::<String>();
        assert!(err.to_string().contains("String"));

        let err = DiError::UnresolvableDependency {
            owner: "UserService",
            param: "repository",
            type_name: "UserRepository",
        };
        let text = err.to_string();
        assert!(text.contains("repository"));
        assert!(text.contains("UserService"));
    }

    #[test]
    fn test_tree_error_messages() {
        let err = ModuleTreeError::MissingParent { parent: "AppModule" };
        assert!(err.to_string().contains("AppModule"));
    }

    #[test]
    fn test_wrapping() {
        let err: TrellisError = DiError::unbound::<u32>().into();
        assert!(matches!(err, TrellisError::Di(_)));
    }
}
