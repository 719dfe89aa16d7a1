//! Scripted remote collection shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use kube::api::{ObjectMeta, WatchEvent};
use navisync::sync::{EventStream, ListOptions, RemoteCollection, Snapshot};
use navisync::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type EventSender<K> = mpsc::UnboundedSender<Result<WatchEvent<K>>>;

/// Serves queued list results; every watch gets a fresh channel the test
/// pushes events into. Lists block once the queue is empty.
pub struct ChannelCollection<K> {
    lists: Mutex<VecDeque<Result<Snapshot<K>>>>,
    watches: Mutex<Vec<EventSender<K>>>,
    /// Options and resume token of every watch call
    pub watch_calls: Mutex<Vec<(ListOptions, String)>>,
    pub list_calls: AtomicUsize,
}

impl<K> Default for ChannelCollection<K> {
    fn default() -> Self {
        Self {
            lists: Mutex::new(VecDeque::new()),
            watches: Mutex::new(Vec::new()),
            watch_calls: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }
}

impl<K> ChannelCollection<K>
where
    K: Send + 'static,
{
    pub fn push_list(&self, items: Vec<K>, resume_token: &str) {
        self.lists.lock().unwrap().push_back(Ok(Snapshot {
            items,
            resume_token: resume_token.to_string(),
        }));
    }

    pub fn push_list_error(&self, message: &str) {
        self.lists
            .lock()
            .unwrap()
            .push_back(Err(Error::Custom(message.to_string())));
    }

    /// Sends `event` on the most recently opened watch
    pub fn emit(&self, event: WatchEvent<K>) {
        let watches = self.watches.lock().unwrap();
        let sender = watches.last().expect("no watch open");
        sender.send(Ok(event)).expect("watch receiver dropped");
    }

    /// Ends every open watch stream
    pub fn close_watches(&self) {
        self.watches.lock().unwrap().clear();
    }

    pub fn watch_count(&self) -> usize {
        self.watch_calls.lock().unwrap().len()
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn resume_tokens(&self) -> Vec<String> {
        self.watch_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, token)| token.clone())
            .collect()
    }
}

#[async_trait]
impl<K> RemoteCollection<K> for ChannelCollection<K>
where
    K: Send + Sync + 'static,
{
    async fn list(&self, _options: &ListOptions) -> Result<Snapshot<K>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.lists.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => futures::future::pending().await,
        }
    }

    async fn watch(&self, options: &ListOptions, resume_token: &str) -> Result<EventStream<K>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches.lock().unwrap().push(tx);
        self.watch_calls
            .lock()
            .unwrap()
            .push((options.clone(), resume_token.to_string()));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub fn pod(namespace: &str, name: &str, image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                image: Some(image.to_string()),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

pub fn image(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.image.as_deref())
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
