use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::host::{HostContext, HttpConnectionContext, WebSocketContext};
use crate::di::DiResult;
use crate::error::ContextError;

/// Statically-typed metadata attached to a route handler at registration
/// time, populated through [`OperationMetaBuilder`].
///
/// # Example
/// ```
/// use serde_json::json;
/// use trellis::context::OperationMeta;
///
/// let meta = OperationMeta::builder("list_users")
///     .set("roles", json!(["admin"]))
///     .set("version", json!(2))
///     .build();
///
/// assert_eq!(meta.name(), "list_users");
/// assert_eq!(meta.get("version"), Some(&json!(2)));
/// ```
#[derive(Debug, Clone)]
pub struct OperationMeta {
    name: &'static str,
    values: HashMap<&'static str, Value>,
}

impl OperationMeta {
    pub fn builder(name: &'static str) -> OperationMetaBuilder {
        OperationMetaBuilder {
            name,
            values: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Builder for [`OperationMeta`].
pub struct OperationMetaBuilder {
    name: &'static str,
    values: HashMap<&'static str, Value>,
}

impl OperationMetaBuilder {
    pub fn set(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn build(self) -> OperationMeta {
        OperationMeta {
            name: self.name,
            values: self.values,
        }
    }
}

/// Typed lookup over handler metadata.
///
/// Route-handling code asks the reflector for a metadata key and gets the
/// value deserialized into the requested type, or `None` when the key is
/// absent or does not fit.
#[derive(Debug, Default)]
pub struct Reflector;

impl Reflector {
    pub fn new() -> Self {
        Self
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, meta: &OperationMeta) -> Option<T> {
        meta.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// First hit for `key` across a handler-then-class metadata chain.
    pub fn get_override<T: DeserializeOwned>(
        &self,
        key: &str,
        chain: &[&OperationMeta],
    ) -> Option<T> {
        chain.iter().find_map(|meta| self.get(key, meta))
    }
}

/// Host context narrowed to one route invocation.
///
/// Adds the invoked operation's metadata and a [`Reflector`] to the
/// connection context, which route guards and interceptors consume.
#[derive(Clone)]
pub struct ExecutionContext {
    host: HostContext,
    operation: Arc<OperationMeta>,
    reflector: Arc<Reflector>,
}

impl ExecutionContext {
    pub fn new(
        host: HostContext,
        operation: Arc<OperationMeta>,
        reflector: Arc<Reflector>,
    ) -> Self {
        Self {
            host,
            operation,
            reflector,
        }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn operation(&self) -> &OperationMeta {
        &self.operation
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    /// Metadata for the invoked operation, deserialized into `T`.
    pub fn metadata<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.reflector.get(key, &self.operation)
    }

    pub fn resolve<B: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<B>> {
        self.host.resolve::<B>()
    }

    pub fn switch_to_http(&self) -> HttpConnectionContext {
        self.host.switch_to_http()
    }

    pub fn switch_to_websocket(&self) -> Result<WebSocketContext, ContextError> {
        self.host.switch_to_websocket()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("operation", &self.operation.name())
            .field("kind", &self.host.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_meta_builder() {
        let meta = OperationMeta::builder("get_user")
            .set("version", json!([1, 2]))
            .set("public", json!(true))
            .build();

        assert_eq!(meta.name(), "get_user");
        assert!(meta.contains("public"));
        assert!(!meta.contains("roles"));
    }

    #[test]
    fn test_reflector_typed_lookup() {
        let reflector = Reflector::new();
        let meta = OperationMeta::builder("get_user")
            .set("versions", json!([1, 2]))
            .build();

        let versions: Vec<u32> = reflector.get("versions", &meta).unwrap();
        assert_eq!(versions, vec![1, 2]);

        let missing: Option<bool> = reflector.get("public", &meta);
        assert!(missing.is_none());
    }

    #[test]
    fn test_reflector_type_mismatch_is_none() {
        let reflector = Reflector::new();
        let meta = OperationMeta::builder("op").set("count", json!("three")).build();

        let count: Option<u32> = reflector.get("count", &meta);
        assert!(count.is_none());
    }

    #[test]
    fn test_reflector_override_chain() {
        let reflector = Reflector::new();
        let class_meta = OperationMeta::builder("class").set("roles", json!(["user"])).build();
        let handler_meta = OperationMeta::builder("handler")
            .set("roles", json!(["admin"]))
            .build();

        let roles: Vec<String> = reflector
            .get_override("roles", &[&handler_meta, &class_meta])
            .unwrap();
        assert_eq!(roles, vec!["admin"]);

        let fallback: Vec<String> = reflector
            .get_override("roles", &[&OperationMeta::builder("empty").build(), &class_meta])
            .unwrap();
        assert_eq!(fallback, vec!["user"]);
    }
}
