use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::api::WatchEvent;

/// Scope and filters applied to both the list and the watch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `None` lists across all namespaces
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

/// Full remote state plus the token the following watch resumes from
#[derive(Debug, Clone)]
pub struct Snapshot<K> {
    pub items: Vec<K>,
    pub resume_token: String,
}

pub type EventStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// Read access to one remote resource collection.
///
/// Dropping a stream returned by `watch` closes it.
#[async_trait]
pub trait RemoteCollection<K>: Send + Sync {
    /// # Errors
    ///
    /// Returns an error on transport or decoding failure
    async fn list(&self, options: &ListOptions) -> Result<Snapshot<K>>;

    /// Opens an event stream starting right after `resume_token`
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened
    async fn watch(&self, options: &ListOptions, resume_token: &str) -> Result<EventStream<K>>;
}
