/**
 * Cache keys for Kubernetes objects
 */
use crate::cache::IndexedCache;
use crate::error::Result;
use crate::sync::TypedResource;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DynamicObject, TypeMeta};
use kube::Resource;
use std::borrow::Cow;

/// Secondary index keyed `namespace/Kind/name`; cluster-scoped objects are
/// not indexed
pub const NAMESPACE_INDEX: &str = "namespace";

// Typed objects lose their kind on deserialization, the type carries it
macro_rules! typed_resource {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl TypedResource for $ty {
                fn kind(&self) -> Option<Cow<'_, str>> {
                    Some(Cow::Borrowed(<$ty as k8s_openapi::Resource>::KIND))
                }

                fn ensure_kind(&mut self, _kind: &str) {}
            }
        )+
    };
}

typed_resource!(
    Pod,
    Service,
    ConfigMap,
    Secret,
    Namespace,
    Node,
    Event,
    ReplicaSet,
    Deployment,
    StatefulSet,
    DaemonSet,
    Ingress,
    Job,
);

impl TypedResource for DynamicObject {
    fn kind(&self) -> Option<Cow<'_, str>> {
        self.types
            .as_ref()
            .map(|types| types.kind.as_str())
            .filter(|kind| !kind.is_empty())
            .map(Cow::Borrowed)
    }

    fn ensure_kind(&mut self, kind: &str) {
        match &mut self.types {
            Some(types) if types.kind.is_empty() => types.kind = kind.to_string(),
            Some(_) => {}
            None => {
                self.types = Some(TypeMeta {
                    api_version: String::new(),
                    kind: kind.to_string(),
                });
            }
        }
    }
}

/// `Kind/namespace/name`, or `Kind/name` for cluster-scoped objects.
/// `None` when the object has no kind or no name.
///
/// # Errors
///
/// Never fails; the signature matches the cache's key functions
pub fn resource_key<K>(obj: &K) -> Result<Option<String>>
where
    K: Resource + TypedResource,
{
    let Some(kind) = TypedResource::kind(obj) else {
        return Ok(None);
    };
    let meta = Resource::meta(obj);
    let Some(name) = meta.name.as_deref() else {
        return Ok(None);
    };

    Ok(Some(match meta.namespace.as_deref() {
        Some(namespace) => format!("{kind}/{namespace}/{name}"),
        None => format!("{kind}/{name}"),
    }))
}

/// Key under [`NAMESPACE_INDEX`]
///
/// # Errors
///
/// Never fails; the signature matches the cache's key functions
pub fn namespace_key<K>(obj: &K) -> Result<Option<String>>
where
    K: Resource + TypedResource,
{
    let meta = Resource::meta(obj);
    let (Some(namespace), Some(name), Some(kind)) = (
        meta.namespace.as_deref(),
        meta.name.as_deref(),
        TypedResource::kind(obj),
    ) else {
        return Ok(None);
    };
    Ok(Some(format!("{namespace}/{kind}/{name}")))
}

/// Cache keyed by [`resource_key`] with a [`NAMESPACE_INDEX`]
#[must_use]
pub fn kube_indexed_cache<K>() -> IndexedCache<K>
where
    K: Resource + TypedResource + Clone + Send + Sync + 'static,
{
    IndexedCache::builder(resource_key::<K>)
        .index(NAMESPACE_INDEX, namespace_key::<K>)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use kube::api::ObjectMeta;
    use std::ops::ControlFlow;

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn test_typed_keys() {
        assert_eq!(
            resource_key(&pod("default", "web")).unwrap().as_deref(),
            Some("Pod/default/web")
        );

        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".to_string()),
                ..ObjectMeta::default()
            },
            ..Node::default()
        };
        assert_eq!(resource_key(&node).unwrap().as_deref(), Some("Node/worker-1"));
        assert_eq!(namespace_key(&node).unwrap(), None);
    }

    #[test]
    fn test_dynamic_object_kind_filled_once() {
        let mut obj = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("cfg".to_string()),
                namespace: Some("ops".to_string()),
                ..ObjectMeta::default()
            },
            data: k8s_openapi::serde_json::Value::Null,
        };
        assert_eq!(resource_key(&obj).unwrap(), None);

        obj.ensure_kind("ConfigMap");
        obj.ensure_kind("Secret");
        assert_eq!(
            resource_key(&obj).unwrap().as_deref(),
            Some("ConfigMap/ops/cfg")
        );
    }

    #[tokio::test]
    async fn test_namespace_index_scan() {
        let cache = kube_indexed_cache::<Pod>();
        cache.add(pod("default", "a")).await.unwrap();
        cache.add(pod("kube-system", "dns")).await.unwrap();
        cache.add(pod("default", "b")).await.unwrap();

        let mut names = Vec::new();
        let found = cache
            .get(NAMESPACE_INDEX, "default/", &mut |pod: &Pod| {
                names.push(pod.metadata.name.clone().unwrap_or_default());
                Ok(ControlFlow::Continue(()))
            })
            .await
            .unwrap();

        assert!(found);
        assert_eq!(names, vec!["a", "b"]);
    }
}
