// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: an in-memory Kubernetes API server and object fixtures.
//!
//! `FakeApiServer` implements just enough of the API for the real `kube::Client`:
//! get, list with equality label selectors, create, replace, merge and apply
//! patches (including `/status`), and delete with finalizer handling. Writes
//! carrying a stale `metadata.resourceVersion` are rejected with 409.

use crate::resources::build_statefulset;
use crate::types::keycloak::{AdminUser, PostgresDatabase};
use crate::types::keycloak_import::{InstanceRef, KeycloakImportSpec};
use crate::types::{Condition, Keycloak, KeycloakImport, KeycloakSpec, KeycloakStatus};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::chrono::{SecondsFormat, Utc};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::client::Body;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// Storage key: (api prefix, plural, namespace, name)
type Key = (String, String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    requests: Vec<(String, String)>,
    /// Writes that will lose a race against another writer, once each
    conflicts: Vec<(String, String)>,
    next_version: u64,
    next_uid: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn stamp_new(&mut self, obj: &mut Value, namespace: &str, name: &str) {
        let rv = self.bump();
        self.next_uid += 1;
        let meta = metadata_mut(obj);
        meta.insert("name".into(), json!(name));
        if !namespace.is_empty() {
            meta.insert("namespace".into(), json!(namespace));
        }
        meta.entry("uid").or_insert(json!(format!("uid-{}", self.next_uid)));
        meta.entry("creationTimestamp").or_insert(json!(now()));
        meta.insert("resourceVersion".into(), json!(rv));
    }
}

/// A parsed request path
#[derive(Debug)]
struct Route {
    prefix: String,
    namespace: Option<String>,
    plural: String,
    name: Option<String>,
    status: bool,
}

impl Route {
    fn parse(path: &str) -> Option<Route> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        let (prefix, rest) = match parts.first() {
            Some(&"api") if parts.len() >= 2 => (format!("/api/{}", parts[1]), &parts[2..]),
            Some(&"apis") if parts.len() >= 3 => {
                (format!("/apis/{}/{}", parts[1], parts[2]), &parts[3..])
            }
            _ => return None,
        };

        let (namespace, rest) = match rest {
            ["namespaces", ns, tail @ ..] if !tail.is_empty() => (Some(ns.to_string()), tail),
            _ => (None, rest),
        };

        match rest {
            [plural] => Some(Route {
                prefix,
                namespace,
                plural: plural.to_string(),
                name: None,
                status: false,
            }),
            [plural, name] => Some(Route {
                prefix,
                namespace,
                plural: plural.to_string(),
                name: Some(name.to_string()),
                status: false,
            }),
            [plural, name, "status"] => Some(Route {
                prefix,
                namespace,
                plural: plural.to_string(),
                name: Some(name.to_string()),
                status: true,
            }),
            _ => None,
        }
    }

    fn key(&self, name: &str) -> Key {
        (
            self.prefix.clone(),
            self.plural.clone(),
            self.namespace.clone().unwrap_or_default(),
            name.to_string(),
        )
    }
}

/// Stateful in-memory stand-in for the Kubernetes API server
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<State>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a kube Client talking to this server
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn key_of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> Key {
        let path = format!("{}/{}", K::url_path(&(), namespace), name);
        let route = Route::parse(&path).expect("resource path parses");
        route.key(name)
    }

    /// Store an object as if it had been created through the API
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, obj: &K) {
        let name = obj.meta().name.clone().expect("fixture has a name");
        let namespace = obj.meta().namespace.clone();
        let key = Self::key_of::<K>(namespace.as_deref(), &name);
        let mut value = serde_json::to_value(obj).unwrap();

        let mut state = self.state.lock().unwrap();
        state.stamp_new(&mut value, namespace.as_deref().unwrap_or_default(), &name);
        state.objects.insert(key, value);
    }

    pub fn get<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: &str, name: &str) -> Option<K> {
        let key = Self::key_of::<K>(Some(namespace), name);
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key)
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Every stored object of kind `K`, across namespaces
    pub fn list<K: Resource<DynamicType = ()> + DeserializeOwned>(&self) -> Vec<K> {
        let (prefix, plural, _, _) = Self::key_of::<K>(None, "x");
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|((p, r, _, _), _)| *p == prefix && *r == plural)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// Merge `status` into a stored object, the way another controller would
    pub fn set_status<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str, status: Value) {
        let key = Self::key_of::<K>(Some(namespace), name);
        let mut state = self.state.lock().unwrap();
        let rv = state.bump();
        let obj = state.objects.get_mut(&key).expect("object exists");
        merge(obj, &json!({ "status": status }));
        metadata_mut(obj).insert("resourceVersion".into(), json!(rv));
    }

    /// Make the next `method` request to `path` fail with 409, as if another writer
    /// had updated the object between the caller's read and its write
    pub fn conflict_next(&self, method: &str, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.conflicts.push((method.to_string(), path.to_string()));
    }

    /// Number of requests made with `method` to exactly `path`
    pub fn count(&self, method: &str, path: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .requests
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }

    /// Number of requests made with `method`, regardless of path
    pub fn count_method(&self, method: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.requests.iter().filter(|(m, _)| m == method).count()
    }

    /// Bump the stored version of the object at `path` and answer with a conflict
    fn race(&self, path: &str) -> (u16, Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(route) = Route::parse(path) {
            let name = route.name.clone().unwrap_or_default();
            let key = route.key(&name);
            let rv = state.bump();
            if let Some(obj) = state.objects.get_mut(&key) {
                metadata_mut(obj).insert("resourceVersion".into(), json!(rv));
            }
        }
        (
            409,
            status_body(409, "Conflict", "the object has been modified; please apply your changes to the latest version"),
        )
    }

    fn handle(&self, method: &str, route: Route, query: Option<&str>, content_type: &str, body: &[u8]) -> (u16, Value) {
        let mut state = self.state.lock().unwrap();

        let Some(name) = route.name.clone() else {
            return match method {
                "GET" => list(&state, &route, query),
                "POST" => create(&mut state, &route, body),
                _ => (405, status_body(405, "MethodNotAllowed", "not supported")),
            };
        };
        let key = route.key(&name);

        match method {
            "GET" => match state.objects.get(&key) {
                Some(obj) => (200, obj.clone()),
                None => not_found(&route.plural, &name),
            },
            "PUT" => {
                let Some(existing) = state.objects.get(&key).cloned() else {
                    return not_found(&route.plural, &name);
                };
                let mut incoming: Value = serde_json::from_slice(body).unwrap();
                if let Some(conflict) = check_version(&existing, &incoming, &name) {
                    return conflict;
                }
                if route.status {
                    let mut next = existing;
                    next["status"] = incoming["status"].take();
                    store(&mut state, key, next)
                } else {
                    if let Some(status) = existing.get("status") {
                        incoming["status"] = status.clone();
                    }
                    for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
                        if let Some(v) = existing["metadata"].get(field) {
                            metadata_mut(&mut incoming).insert(field.into(), v.clone());
                        }
                    }
                    store(&mut state, key, incoming)
                }
            }
            "PATCH" => {
                if content_type.starts_with("application/json-patch") {
                    return (415, status_body(415, "UnsupportedMediaType", "json patch not supported"));
                }
                let mut patch: Value = serde_json::from_slice(body).unwrap();
                let apply = content_type.starts_with("application/apply-patch");

                let Some(existing) = state.objects.get(&key).cloned() else {
                    if apply {
                        let mut obj = patch;
                        state.stamp_new(&mut obj, route.namespace.as_deref().unwrap_or_default(), &name);
                        state.objects.insert(key, obj.clone());
                        return (201, obj);
                    }
                    return not_found(&route.plural, &name);
                };
                if let Some(conflict) = check_version(&existing, &patch, &name) {
                    return conflict;
                }
                if let Some(meta) = patch.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.remove("resourceVersion");
                }

                let mut next = existing.clone();
                if route.status {
                    if let Some(status) = patch.get("status") {
                        merge(&mut next, &json!({ "status": status }));
                    }
                } else {
                    if let Some(obj) = patch.as_object_mut() {
                        obj.remove("status");
                    }
                    merge(&mut next, &patch);
                }

                if next == existing {
                    return (200, existing);
                }
                store(&mut state, key, next)
            }
            "DELETE" => {
                let Some(mut existing) = state.objects.get(&key).cloned() else {
                    return not_found(&route.plural, &name);
                };
                if has_finalizers(&existing) {
                    if existing["metadata"].get("deletionTimestamp").is_none() {
                        let rv = state.bump();
                        let meta = metadata_mut(&mut existing);
                        meta.insert("deletionTimestamp".into(), json!(now()));
                        meta.insert("resourceVersion".into(), json!(rv));
                        state.objects.insert(key, existing.clone());
                    }
                    (200, existing)
                } else {
                    state.objects.remove(&key);
                    (200, existing)
                }
            }
            _ => (405, status_body(405, "MethodNotAllowed", "not supported")),
        }
    }
}

/// Store an updated object, removing it when a pending deletion has no finalizers left
fn store(state: &mut State, key: Key, mut obj: Value) -> (u16, Value) {
    let rv = state.bump();
    metadata_mut(&mut obj).insert("resourceVersion".into(), json!(rv));

    if obj["metadata"].get("deletionTimestamp").is_some() && !has_finalizers(&obj) {
        state.objects.remove(&key);
    } else {
        state.objects.insert(key, obj.clone());
    }
    (200, obj)
}

fn list(state: &State, route: &Route, query: Option<&str>) -> (u16, Value) {
    let selector: Vec<(String, String)> = query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .filter(|(k, _)| k == "labelSelector")
                .flat_map(|(_, v)| {
                    v.split(',')
                        .filter_map(|pair| pair.split_once('='))
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .unwrap_or_default();

    let items: Vec<Value> = state
        .objects
        .iter()
        .filter(|((p, r, ns, _), _)| {
            *p == route.prefix
                && *r == route.plural
                && route.namespace.as_ref().map_or(true, |want| want == ns)
        })
        .filter(|(_, obj)| {
            selector
                .iter()
                .all(|(k, v)| obj["metadata"]["labels"].get(k).and_then(Value::as_str) == Some(v))
        })
        .map(|(_, obj)| obj.clone())
        .collect();

    (
        200,
        json!({
            "apiVersion": "v1",
            "kind": "List",
            "metadata": { "resourceVersion": state.next_version.to_string() },
            "items": items,
        }),
    )
}

fn create(state: &mut State, route: &Route, body: &[u8]) -> (u16, Value) {
    let mut obj: Value = serde_json::from_slice(body).unwrap();
    let Some(name) = obj["metadata"]["name"].as_str().map(str::to_string) else {
        return (422, status_body(422, "Invalid", "metadata.name is required"));
    };
    let key = route.key(&name);
    if state.objects.contains_key(&key) {
        return (
            409,
            status_body(409, "AlreadyExists", &format!("{} \"{}\" already exists", route.plural, name)),
        );
    }

    state.stamp_new(&mut obj, route.namespace.as_deref().unwrap_or_default(), &name);
    state.objects.insert(key, obj.clone());
    (201, obj)
}

fn check_version(existing: &Value, incoming: &Value, name: &str) -> Option<(u16, Value)> {
    let wanted = incoming["metadata"]["resourceVersion"].as_str()?;
    let current = existing["metadata"]["resourceVersion"].as_str()?;
    (wanted != current).then(|| {
        (
            409,
            status_body(
                409,
                "Conflict",
                &format!("Operation cannot be fulfilled on \"{}\": the object has been modified", name),
            ),
        )
    })
}

fn has_finalizers(obj: &Value) -> bool {
    obj["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn metadata_mut(obj: &mut Value) -> &mut Map<String, Value> {
    if !obj["metadata"].is_object() {
        obj["metadata"] = json!({});
    }
    obj["metadata"].as_object_mut().unwrap()
}

/// JSON merge patch (RFC 7386)
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = json!({});
            }
            let target = target.as_object_mut().unwrap();
            for (k, v) in fields {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn status_body(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
}

fn not_found(resource: &str, name: &str) -> (u16, Value) {
    (404, status_body(404, "NotFound", &format!("{} \"{}\" not found", resource, name)))
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            let method = req.method().to_string();
            let path = req.uri().path().to_string();
            let query = req.uri().query().map(str::to_string);
            let content_type = req
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body: Bytes = req.into_body().collect().await?.to_bytes();

            let conflicted = {
                let mut state = server.state.lock().unwrap();
                state.requests.push((method.clone(), path.clone()));
                let pending = state.conflicts.iter().position(|(m, p)| *m == method && *p == path);
                pending.map(|i| state.conflicts.remove(i)).is_some()
            };

            let (status, value) = if conflicted {
                server.race(&path)
            } else {
                match Route::parse(&path) {
                    Some(route) => server.handle(&method, route, query.as_deref(), &content_type, &body),
                    None => not_found("path", &path),
                }
            };

            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value)?))
                .unwrap())
        })
    }
}

/// A KeycloakImport `realm-import` in `rhbk-import`, targeting `keycloak` in `rhbk-instance`
pub fn make_import(json: &str) -> KeycloakImport {
    let mut import = KeycloakImport::new(
        "realm-import",
        KeycloakImportSpec {
            keycloak_instance: InstanceRef {
                name: "keycloak".to_string(),
                namespace: Some("rhbk-instance".to_string()),
            },
            json: json.to_string(),
            substitutions: vec![],
            override_if_exists: false,
            sizing: None,
        },
    );
    import.metadata.namespace = Some("rhbk-import".to_string());
    import.metadata.uid = Some("import-uid".to_string());
    import
}

pub fn make_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn make_keycloak(name: &str, namespace: &str, ready: bool) -> Keycloak {
    let mut keycloak = Keycloak::new(
        name,
        KeycloakSpec {
            database: PostgresDatabase::default(),
            additional_options: vec![],
            instances: 1,
            trusted_ca_bundles: None,
            admin: AdminUser::default(),
            network_config: None,
        },
    );
    keycloak.metadata.namespace = Some(namespace.to_string());
    keycloak.metadata.uid = Some(format!("{}-uid", name));
    keycloak.status = Some(KeycloakStatus {
        conditions: vec![if ready {
            Condition::ready(true, "Ready", "")
        } else {
            Condition::ready(false, "Waiting", "Waiting for resources to be ready")
        }],
    });
    keycloak
}

/// The StatefulSet the instance controller would build, reporting all replicas ready
pub fn make_statefulset(name: &str, namespace: &str) -> StatefulSet {
    let mut sts = build_statefulset(&make_keycloak(name, namespace, true), "rhbk:test");
    sts.status = Some(StatefulSetStatus {
        replicas: 1,
        ready_replicas: Some(1),
        ..Default::default()
    });
    sts
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};

    #[tokio::test]
    async fn test_fake_server_get_and_not_found() {
        let server = FakeApiServer::new();
        server.insert(&make_secret("ns", "present", &[]));
        let api: Api<Secret> = Api::namespaced(server.into_client(), "ns");

        assert!(api.get_opt("present").await.unwrap().is_some());
        assert!(api.get_opt("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fake_server_create_conflicts_on_existing() {
        let server = FakeApiServer::new();
        let api: Api<Secret> = Api::namespaced(server.into_client(), "ns");

        api.create(&PostParams::default(), &make_secret("ns", "s", &[])).await.unwrap();
        let err = api
            .create(&PostParams::default(), &make_secret("ns", "s", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, kube::Error::Api(e) if e.code == 409));
    }

    #[tokio::test]
    async fn test_fake_server_rejects_stale_patch() {
        let server = FakeApiServer::new();
        server.insert(&make_secret("ns", "s", &[]));
        let api: Api<Secret> = Api::namespaced(server.clone().into_client(), "ns");

        let current = api.get("s").await.unwrap();
        let stale = json!({"metadata": {"resourceVersion": "0", "labels": {"a": "b"}}});
        let err = api
            .patch("s", &PatchParams::default(), &Patch::Merge(&stale))
            .await
            .unwrap_err();
        assert!(matches!(err, kube::Error::Api(e) if e.code == 409));

        let fresh = json!({"metadata": {"resourceVersion": current.metadata.resource_version, "labels": {"a": "b"}}});
        let patched = api
            .patch("s", &PatchParams::default(), &Patch::Merge(&fresh))
            .await
            .unwrap();
        assert_eq!(patched.metadata.labels.unwrap()["a"], "b");
    }

    #[tokio::test]
    async fn test_fake_server_delete_honours_finalizers() {
        let server = FakeApiServer::new();
        let mut secret = make_secret("ns", "s", &[]);
        secret.metadata.finalizers = Some(vec!["example.com/hold".to_string()]);
        server.insert(&secret);
        let api: Api<Secret> = Api::namespaced(server.clone().into_client(), "ns");

        api.delete("s", &DeleteParams::default()).await.unwrap();
        let pending = server.get::<Secret>("ns", "s").unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        let release = json!({"metadata": {"finalizers": []}});
        api.patch("s", &PatchParams::default(), &Patch::Merge(&release))
            .await
            .unwrap();
        assert!(server.get::<Secret>("ns", "s").is_none());
    }

    #[tokio::test]
    async fn test_fake_server_list_by_label() {
        let server = FakeApiServer::new();
        let mut labelled = make_secret("a", "one", &[]);
        labelled.metadata.labels = Some(BTreeMap::from([("k".to_string(), "v".to_string())]));
        server.insert(&labelled);
        server.insert(&make_secret("b", "two", &[]));

        let api: Api<Secret> = Api::all(server.into_client());
        let all = api.list(&Default::default()).await.unwrap();
        assert_eq!(all.items.len(), 2);
        let filtered = api
            .list(&kube::api::ListParams::default().labels("k=v"))
            .await
            .unwrap();
        assert_eq!(filtered.items.len(), 1);
    }
}
