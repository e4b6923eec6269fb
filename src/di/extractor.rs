use axum::{
    extract::FromRequestParts,
    http::{StatusCode as HttpStatusCode, request::Parts},
};
use std::sync::Arc;

use crate::context::current::try_current_boundary;

/// Axum extractor for dependency injection.
///
/// Resolves `T` through the resolution boundary published for the current
/// task, so request-scoped providers land in the same per-connection cache
/// as the rest of the handler's resolutions.
///
/// The handler must run inside
/// [`RequestScopeManager::run_scoped`](crate::context::RequestScopeManager::run_scoped);
/// outside of it there is no boundary and extraction is rejected.
///
/// # Example
/// ```ignore
/// async fn get_user(
///     Inject(service): Inject<UserService>,
///     Path(id): Path<String>,
/// ) -> Result<Json<User>, ApiError> {
///     let user = service.find_one(id).await?;
///     Ok(Json(user))
/// }
/// ```
pub struct Inject<T: ?Sized>(pub Arc<T>);

impl<S, T> FromRequestParts<S> for Inject<T>
where
    S: Send + Sync,
    T: ?Sized + Send + Sync + 'static,
{
    type Rejection = (HttpStatusCode, String);

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let boundary = try_current_boundary().ok_or((
            HttpStatusCode::INTERNAL_SERVER_ERROR,
            "No request context is active for the current task".to_string(),
        ))?;

        boundary.resolve::<T>().map(Inject).map_err(|e| {
            (
                HttpStatusCode::INTERNAL_SERVER_ERROR,
                format!("Dependency injection failed: {}", e),
            )
        })
    }
}

/// Deref implementation for convenient access to the inner service
impl<T: ?Sized> std::ops::Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Clone implementation to allow sharing the Arc
impl<T: ?Sized> Clone for Inject<T> {
    fn clone(&self) -> Self {
        Inject(Arc::clone(&self.0))
    }
}
