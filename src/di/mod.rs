mod boundary;
mod container;
mod extractor;
mod injectable;
mod provider;
mod scope;

pub use boundary::{BoundaryState, RequestBoundary};
pub use container::{Container, Resolver};
pub use extractor::Inject;
pub use injectable::{Injectable, Overrides};
pub use provider::ProviderConfig;
pub use scope::{ScopeKind, ScopeRegistry};

use crate::error::DiError;

pub type DiResult<T> = std::result::Result<T, DiError>;
