/**
 * Remote collection backed by the Kubernetes API
 */
use crate::error::{Error, Result};
use crate::sync::collection::{EventStream, ListOptions, RemoteCollection, Snapshot};
use crate::sync::config::WATCH_TIMEOUT_SECONDS;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, ApiResource, DynamicObject, ListParams, WatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

type ApiFactory<K> = dyn Fn(Option<&str>) -> Api<K> + Send + Sync;

/// Lists and watches one resource kind through a kube [`Client`]
pub struct KubeCollection<K> {
    api_for: Arc<ApiFactory<K>>,
    watch_timeout_secs: u32,
}

impl<K> Clone for KubeCollection<K> {
    fn clone(&self) -> Self {
        Self {
            api_for: self.api_for.clone(),
            watch_timeout_secs: self.watch_timeout_secs,
        }
    }
}

impl<K> KubeCollection<K>
where
    K: Resource + 'static,
{
    /// `api_for` maps the requested namespace (`None` = all) to an [`Api`]
    pub fn from_factory<F>(api_for: F) -> Self
    where
        F: Fn(Option<&str>) -> Api<K> + Send + Sync + 'static,
    {
        Self {
            api_for: Arc::new(api_for),
            watch_timeout_secs: WATCH_TIMEOUT_SECONDS,
        }
    }

    /// Server-side watch timeout, capped below the API server's limit
    #[must_use]
    pub fn watch_timeout(mut self, secs: u32) -> Self {
        self.watch_timeout_secs = secs.clamp(1, WATCH_TIMEOUT_SECONDS);
        self
    }
}

impl<K> KubeCollection<K>
where
    K: Resource<Scope = NamespaceResourceScope> + 'static,
    K::DynamicType: Default,
{
    #[must_use]
    pub fn namespaced(client: Client) -> Self {
        Self::from_factory(move |namespace| match namespace {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        })
    }
}

impl<K> KubeCollection<K>
where
    K: Resource<Scope = ClusterResourceScope> + 'static,
    K::DynamicType: Default,
{
    /// Cluster-scoped kinds ignore any namespace in the list options
    #[must_use]
    pub fn cluster(client: Client) -> Self {
        Self::from_factory(move |namespace| {
            if let Some(namespace) = namespace {
                debug!("Ignoring namespace {} for cluster-scoped kind", namespace);
            }
            Api::all(client.clone())
        })
    }
}

impl KubeCollection<DynamicObject> {
    /// Untyped access to any kind, typically resolved through discovery
    #[must_use]
    pub fn dynamic(client: Client, resource: ApiResource, namespaced: bool) -> Self {
        Self::from_factory(move |namespace| match namespace {
            Some(namespace) if namespaced => {
                Api::namespaced_with(client.clone(), namespace, &resource)
            }
            _ => Api::all_with(client.clone(), &resource),
        })
    }
}

fn list_params(options: &ListOptions) -> ListParams {
    let mut params = ListParams::default();
    if let Some(labels) = &options.label_selector {
        params = params.labels(labels);
    }
    if let Some(fields) = &options.field_selector {
        params = params.fields(fields);
    }
    params
}

fn watch_params(options: &ListOptions, timeout_secs: u32) -> WatchParams {
    let mut params = WatchParams::default().timeout(timeout_secs);
    if let Some(labels) = &options.label_selector {
        params = params.labels(labels);
    }
    if let Some(fields) = &options.field_selector {
        params = params.fields(fields);
    }
    params
}

#[async_trait]
impl<K> RemoteCollection<K> for KubeCollection<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self, options: &ListOptions) -> Result<Snapshot<K>> {
        let api = (self.api_for)(options.namespace.as_deref());
        let list = api.list(&list_params(options)).await?;

        Ok(Snapshot {
            resume_token: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch(&self, options: &ListOptions, resume_token: &str) -> Result<EventStream<K>> {
        let api = (self.api_for)(options.namespace.as_deref());
        let params = watch_params(options, self.watch_timeout_secs);
        let stream = api.watch(&params, resume_token).await?;

        Ok(stream.map_err(Error::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::http::{Method, Request, Response};
    use k8s_openapi::api::core::v1::{Namespace, Pod};
    use k8s_openapi::serde_json::{self, json};
    use kube::api::{ObjectMeta, WatchEvent};
    use kube::client::Body;
    use tower_test::mock::{self, Handle};

    type MockHandle = Handle<Request<Body>, Response<Body>>;

    fn mock_client() -> (Client, MockHandle) {
        let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        (Client::new(service, "default"), handle)
    }

    fn pod_json(name: &str) -> serde_json::Value {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        serde_json::to_value(pod).unwrap()
    }

    fn respond(body: Vec<u8>) -> Response<Body> {
        Response::builder().body(Body::from(body)).unwrap()
    }

    fn web_pods() -> ListOptions {
        ListOptions {
            namespace: Some("default".to_string()),
            label_selector: Some("app=web".to_string()),
            field_selector: None,
        }
    }

    #[test]
    fn test_params_carry_selectors() {
        let options = ListOptions {
            namespace: Some("default".to_string()),
            label_selector: Some("app=web".to_string()),
            field_selector: Some("status.phase=Running".to_string()),
        };

        let list = list_params(&options);
        assert_eq!(list.label_selector.as_deref(), Some("app=web"));
        assert_eq!(list.field_selector.as_deref(), Some("status.phase=Running"));

        let watch = watch_params(&options, 30);
        assert_eq!(watch.label_selector.as_deref(), Some("app=web"));
        assert_eq!(watch.timeout, Some(30));
    }

    #[test]
    fn test_params_default_to_unfiltered() {
        let list = list_params(&ListOptions::default());
        assert!(list.label_selector.is_none());
        assert!(list.field_selector.is_none());
    }

    #[tokio::test]
    async fn test_watch_timeout_is_capped() {
        let (client, _handle) = mock_client();
        let collection = KubeCollection::<Pod>::namespaced(client);
        assert_eq!(collection.watch_timeout_secs, WATCH_TIMEOUT_SECONDS);
        assert_eq!(
            collection.clone().watch_timeout(3600).watch_timeout_secs,
            WATCH_TIMEOUT_SECONDS
        );
        assert_eq!(collection.watch_timeout(0).watch_timeout_secs, 1);
    }

    #[tokio::test]
    async fn test_list_returns_items_and_resume_token() {
        let (client, mut handle) = mock_client();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("list not called");
            assert_eq!(request.method(), Method::GET);
            assert_eq!(request.uri().path(), "/api/v1/namespaces/default/pods");
            let query = request.uri().query().unwrap_or_default().to_string();
            assert!(query.contains("labelSelector=app%3Dweb"), "{query}");

            let list = json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": { "resourceVersion": "42" },
                "items": [pod_json("a"), pod_json("b")],
            });
            send.send_response(respond(serde_json::to_vec(&list).unwrap()));
        });

        let collection = KubeCollection::<Pod>::namespaced(client);
        let snapshot = collection.list(&web_pods()).await.unwrap();
        server.await.unwrap();

        assert_eq!(snapshot.resume_token, "42");
        let names: Vec<_> = snapshot
            .items
            .iter()
            .filter_map(|pod| pod.metadata.name.as_deref())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_watch_resumes_from_token() {
        let (client, mut handle) = mock_client();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("watch not called");
            let query = request.uri().query().unwrap_or_default().to_string();
            assert!(query.contains("watch=true"), "{query}");
            assert!(query.contains("resourceVersion=42"), "{query}");
            assert!(query.contains("timeoutSeconds=30"), "{query}");

            let mut body = Vec::new();
            for (kind, name) in [("ADDED", "c"), ("DELETED", "a")] {
                let event = json!({ "type": kind, "object": pod_json(name) });
                body.extend(serde_json::to_vec(&event).unwrap());
                body.push(b'\n');
            }
            send.send_response(respond(body));
        });

        let collection = KubeCollection::<Pod>::namespaced(client).watch_timeout(30);
        let stream = collection.watch(&web_pods(), "42").await.unwrap();
        let events: Vec<_> = stream.collect().await;
        server.await.unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            Ok(WatchEvent::Added(pod)) if pod.metadata.name.as_deref() == Some("c")
        ));
        assert!(matches!(
            &events[1],
            Ok(WatchEvent::Deleted(pod)) if pod.metadata.name.as_deref() == Some("a")
        ));
    }

    #[tokio::test]
    async fn test_cluster_scope_ignores_namespace() {
        let (client, mut handle) = mock_client();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("list not called");
            assert_eq!(request.uri().path(), "/api/v1/namespaces");

            let list = json!({
                "apiVersion": "v1",
                "kind": "NamespaceList",
                "metadata": { "resourceVersion": "7" },
                "items": [],
            });
            send.send_response(respond(serde_json::to_vec(&list).unwrap()));
        });

        let collection = KubeCollection::<Namespace>::cluster(client);
        let snapshot = collection.list(&web_pods()).await.unwrap();
        server.await.unwrap();

        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.resume_token, "7");
    }

    #[tokio::test]
    async fn test_list_failure_surfaces_as_kube_error() {
        let (client, mut handle) = mock_client();
        let server = tokio::spawn(async move {
            let (_request, send) = handle.next_request().await.expect("list not called");
            let status = json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "pods is forbidden",
                "reason": "Forbidden",
                "code": 403,
            });
            send.send_response(
                Response::builder()
                    .status(403)
                    .body(Body::from(serde_json::to_vec(&status).unwrap()))
                    .unwrap(),
            );
        });

        let collection = KubeCollection::<Pod>::namespaced(client);
        let result = collection.list(&web_pods()).await;
        server.await.unwrap();

        assert!(matches!(result, Err(Error::Kube(_))));
    }
}
