pub mod client;
pub mod collection;
pub mod keys;

pub use collection::KubeCollection;
pub use keys::{kube_indexed_cache, resource_key, NAMESPACE_INDEX};

/// Default user agent, tracks the package version.
///
/// All clients should be created with `client::new(Some(USER_AGENT))`.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
