use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::address::{join_path, render_url, sanitize_address, sanitize_path};
use crate::database::constants::PUSH_NAME_FIELD;
use crate::database::error::{decode_error, internal_error, invalid_argument, DatabaseResult};
use crate::database::executor::RequestExecutor;
use crate::database::query::QueryParams;
use crate::database::realtime::{
    ChangeEvent, EventFilter, Listener, ListenerId, StreamController, StreamState,
};
use crate::database::settings::DatabaseSettings;
use crate::database::transport::{HttpTransport, ReqwestTransport};

/// A location in the remote JSON tree.
///
/// A reference renders to `<address>/.json?<params>` and issues every CRUD call against
/// that URL. Children derived from it share its transport but own a copy of its query
/// parameters, so configuring one never changes the other.
///
/// Each reference also carries its own streaming state: at most one live session,
/// started with [`Reference::start_stream`].
pub struct Reference {
    root: Arc<str>,
    address: String,
    params: QueryParams,
    executor: Arc<RequestExecutor>,
    stream: StreamController,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl Reference {
    /// Creates a root reference using the default settings and the HTTPS transport.
    ///
    /// `demo.firebaseio.com` and `https://demo.firebaseio.com/` address the same root.
    pub fn new(address: &str) -> DatabaseResult<Self> {
        Self::with_settings(address, DatabaseSettings::default())
    }

    pub fn with_settings(address: &str, settings: DatabaseSettings) -> DatabaseResult<Self> {
        let transport = ReqwestTransport::new(settings.timeout())?;
        Ok(Self::with_transport(address, settings, Arc::new(transport)))
    }

    /// Creates a root reference that sends every request through `transport`.
    pub fn with_transport(
        address: &str,
        settings: DatabaseSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let address = sanitize_address(address);
        Self {
            root: Arc::from(address.as_str()),
            address,
            params: QueryParams::default(),
            executor: Arc::new(RequestExecutor::new(transport, settings)),
            stream: StreamController::default(),
        }
    }

    fn derive(&self, address: String, params: QueryParams) -> Self {
        Self {
            root: Arc::clone(&self.root),
            address,
            params,
            executor: Arc::clone(&self.executor),
            stream: StreamController::default(),
        }
    }

    fn configured(&self, configure: impl FnOnce(&mut QueryParams)) -> Self {
        let mut params = self.params.clone();
        configure(&mut params);
        self.derive(self.address.clone(), params)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fully qualified request URL, including the `.json` suffix and query string.
    pub fn url(&self) -> String {
        render_url(&self.address, &self.params)
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn settings(&self) -> &DatabaseSettings {
        self.executor.settings()
    }

    /// Returns a reference to `path` below this one, carrying the same query parameters.
    pub fn child(&self, path: &str) -> Reference {
        self.derive(join_path(&self.address, path), self.params.clone())
    }

    /// Returns the parent location, or `None` at the address the root was created with.
    pub fn parent(&self) -> Option<Reference> {
        if self.address.len() <= self.root.len() {
            return None;
        }
        let relative = &self.address[self.root.len()..];
        let parent = match sanitize_path(relative).rsplit_once('/') {
            Some((head, _)) => join_path(&self.root, head),
            None => self.root.to_string(),
        };
        Some(self.derive(parent, self.params.clone()))
    }

    /// Last path segment, `None` for the root.
    pub fn key(&self) -> Option<&str> {
        if self.address.len() <= self.root.len() {
            return None;
        }
        self.address.rsplit('/').next()
    }

    pub fn set_auth(&mut self, token: impl Into<String>) {
        self.params.set_auth(token);
    }

    pub fn remove_auth(&mut self) {
        self.params.remove_auth();
    }

    /// Limits reads to the immediate child keys, with `true` standing in for objects.
    pub fn set_shallow(&mut self, enabled: bool) {
        self.params.set_shallow(enabled);
    }

    /// Asks the service to include priority metadata (`format=export`) in read payloads.
    pub fn include_priority(&mut self, enabled: bool) {
        self.params.set_export_format(enabled);
    }

    /// Orders results by the given child key (`$key`, `$value` and `$priority` included).
    pub fn order_by(&self, key: &str) -> Reference {
        self.configured(|params| params.set_order_by(key))
    }

    pub fn order_by_key(&self) -> Reference {
        self.order_by("$key")
    }

    pub fn order_by_value(&self) -> Reference {
        self.order_by("$value")
    }

    pub fn order_by_priority(&self) -> Reference {
        self.order_by("$priority")
    }

    pub fn start_at(&self, value: impl Into<Value>) -> Reference {
        let value = value.into();
        self.configured(|params| params.set_start_at(&value))
    }

    pub fn end_at(&self, value: impl Into<Value>) -> Reference {
        let value = value.into();
        self.configured(|params| params.set_end_at(&value))
    }

    pub fn equal_to(&self, value: impl Into<Value>) -> Reference {
        let value = value.into();
        self.configured(|params| {
            params.set_start_at(&value);
            params.set_end_at(&value);
        })
    }

    /// A limit of zero clears the parameter.
    pub fn limit_to_first(&self, limit: u32) -> Reference {
        self.configured(|params| params.set_limit_to_first(limit))
    }

    pub fn limit_to_last(&self, limit: u32) -> Reference {
        self.configured(|params| params.set_limit_to_last(limit))
    }

    async fn request(
        &self,
        method: Method,
        params: &QueryParams,
        body: Option<Bytes>,
    ) -> DatabaseResult<Bytes> {
        self.executor
            .execute(method, render_url(&self.address, params), body)
            .await
    }

    /// Reads the raw response body of a GET.
    pub async fn value_raw(&self) -> DatabaseResult<Bytes> {
        self.request(Method::GET, &self.params, None).await
    }

    /// Reads the data at this location into `T`.
    pub async fn value<T: DeserializeOwned>(&self) -> DatabaseResult<T> {
        decode(&self.value_raw().await?)
    }

    /// Reads only the immediate children of this location.
    pub async fn shallow_value<T: DeserializeOwned>(&self) -> DatabaseResult<T> {
        let mut params = self.params.clone();
        params.set_shallow(true);
        decode(&self.request(Method::GET, &params, None).await?)
    }

    /// Reads the data with priority metadata included.
    pub async fn export_value<T: DeserializeOwned>(&self) -> DatabaseResult<T> {
        let mut params = self.params.clone();
        params.set_export_format(true);
        decode(&self.request(Method::GET, &params, None).await?)
    }

    /// Replaces the whole subtree at this location.
    pub async fn set<V: Serialize + ?Sized>(&self, value: &V) -> DatabaseResult<()> {
        let body = encode(value)?;
        self.request(Method::PUT, &self.params, Some(body)).await?;
        Ok(())
    }

    /// Merges the keys of `value` into this location, leaving other children untouched.
    pub async fn update<V: Serialize + ?Sized>(&self, value: &V) -> DatabaseResult<()> {
        let body = encode(value)?;
        self.request(Method::PATCH, &self.params, Some(body)).await?;
        Ok(())
    }

    /// Appends `value` under a server-generated, chronologically ordered key and returns
    /// the reference to it.
    pub async fn push<V: Serialize + ?Sized>(&self, value: &V) -> DatabaseResult<Reference> {
        let body = encode(value)?;
        let response = self.request(Method::POST, &self.params, Some(body)).await?;
        let PushResponse { name } = serde_json::from_slice(&response).map_err(|err| {
            decode_error(format!(
                "push response has no string '{PUSH_NAME_FIELD}' field: {err}"
            ))
        })?;
        Ok(self.child(&name))
    }

    /// Deletes the subtree at this location.
    pub async fn remove(&self) -> DatabaseResult<()> {
        self.request(Method::DELETE, &self.params, None).await?;
        Ok(())
    }

    /// Opens the event stream for this location.
    ///
    /// Fails with `StreamAlreadyActive` while a session is running.
    pub async fn start_stream(&self) -> DatabaseResult<()> {
        self.stream
            .start(Arc::clone(&self.executor), self.url())
            .await
    }

    /// Stops the running session, if any, and releases its listeners.
    pub async fn stop_stream(&self) {
        self.stream.stop().await;
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_state() == StreamState::Streaming
    }

    /// Registers a listener that buffers every matching event of the current (or next)
    /// session.
    pub fn listen(&self, filter: impl Into<EventFilter>) -> Listener {
        self.stream.listen(filter.into())
    }

    /// Forwards matching events to `callback` from a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on<F>(&self, filter: impl Into<EventFilter>, callback: F) -> DatabaseResult<ListenerId>
    where
        F: Fn(DatabaseResult<ChangeEvent>) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| internal_error(format!("no tokio runtime for callbacks: {err}")))?;
        let listener = self.listen(filter);
        let id = listener.id();
        runtime.spawn(async move {
            while let Some(item) = listener.recv().await {
                callback(item);
            }
        });
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.stream.remove_listener(id)
    }

    /// Listeners registered for the current or next session.
    pub fn listener_count(&self) -> usize {
        self.stream.listener_count()
    }
}

/// Copies the reference: same address, an independent copy of the query parameters,
/// the same transport, and a fresh idle streaming state.
impl Clone for Reference {
    fn clone(&self) -> Self {
        self.derive(self.address.clone(), self.params.clone())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("address", &self.address)
            .field("params", &self.params)
            .field("stream", &self.stream.state())
            .finish()
    }
}

fn encode<V: Serialize + ?Sized>(value: &V) -> DatabaseResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| invalid_argument(format!("Failed to encode value: {err}")))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> DatabaseResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| decode_error(format!("Failed to decode database response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorCode;
    use crate::database::realtime::EventType;
    use crate::test_support::{start_mock_server, ChannelTransport};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn offline(address: &str) -> Reference {
        Reference::with_transport(address, DatabaseSettings::default(), ChannelTransport::new())
    }

    #[test]
    fn url_rendering_is_canonical() {
        for address in [
            "demo.firebaseio.com",
            "demo.firebaseio.com/",
            "https://demo.firebaseio.com",
            "https://demo.firebaseio.com/",
        ] {
            assert_eq!(offline(address).url(), "https://demo.firebaseio.com/.json");
        }
    }

    #[test]
    fn child_paths_are_sanitized() {
        let root = offline("demo.firebaseio.com");
        for path in ["users", "/users", "users/", "/users/.json", "users.json"] {
            assert_eq!(
                root.child(path).url(),
                "https://demo.firebaseio.com/users/.json",
                "path {path}"
            );
        }
        assert_eq!(
            root.child("/users/").child("/alice/").url(),
            "https://demo.firebaseio.com/users/alice/.json"
        );
    }

    #[test]
    fn child_params_are_independent() {
        let mut parent = offline("demo.firebaseio.com");
        parent.set_auth("parent-token");

        let mut child = parent.child("items");
        assert_eq!(child.params().get("auth"), Some("parent-token"));

        child.set_auth("child-token");
        child.set_shallow(true);
        assert_eq!(parent.params().get("auth"), Some("parent-token"));
        assert_eq!(parent.params().get("shallow"), None);

        parent.remove_auth();
        assert_eq!(child.params().get("auth"), Some("child-token"));
    }

    #[test]
    fn clone_copies_params() {
        let mut original = offline("demo.firebaseio.com/items");
        original.include_priority(true);
        let mut copy = original.clone();
        copy.include_priority(false);
        assert_eq!(original.params().get("format"), Some("export"));
        assert_eq!(copy.params().get("format"), None);
    }

    #[test]
    fn query_helpers_derive_configured_copies() {
        let root = offline("demo.firebaseio.com/dinosaurs");
        let query = root.order_by("height").start_at(3).end_at(10).limit_to_first(2);
        assert_eq!(
            query.url(),
            "https://demo.firebaseio.com/dinosaurs/.json?endAt=10&limitToFirst=2&orderBy=%22height%22&startAt=3"
        );
        assert!(root.params().is_empty());

        let exact = root.order_by_key().equal_to("stego");
        assert_eq!(exact.params().get("startAt"), Some("\"stego\""));
        assert_eq!(exact.params().get("endAt"), Some("\"stego\""));
        assert_eq!(exact.params().get("orderBy"), Some("\"$key\""));
    }

    #[test]
    fn parent_and_key_navigation() {
        let root = offline("demo.firebaseio.com/app");
        assert!(root.parent().is_none());
        assert_eq!(root.key(), None);

        let leaf = root.child("users/alice/profile");
        assert_eq!(leaf.key(), Some("profile"));
        let parent = leaf.parent().unwrap();
        assert_eq!(parent.address(), "https://demo.firebaseio.com/app/users/alice");
        let top = parent.parent().unwrap().parent().unwrap();
        assert_eq!(top.address(), "https://demo.firebaseio.com/app");
        assert!(top.parent().is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let server = start_mock_server().await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/messages/.json")
                    .query_param("auth", "secret")
                    .json_body(json!({"greeting": "hello"}));
                then.status(200).body(r#"{"greeting":"hello"}"#);
            })
            .await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/messages/.json")
                    .query_param("auth", "secret");
                then.status(200).body(r#"{"greeting":"hello"}"#);
            })
            .await;

        let mut messages = Reference::new(&server.base_url()).unwrap().child("messages");
        messages.set_auth("secret");
        messages.set(&json!({"greeting": "hello"})).await.unwrap();
        let value: Value = messages.value().await.unwrap();

        assert_eq!(value, json!({"greeting": "hello"}));
        put.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn update_sends_patch() {
        let server = start_mock_server().await;
        let patch = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::PATCH)
                    .path("/scores/.json")
                    .json_body(json!({"b": 3}));
                then.status(200).body(r#"{"b":3}"#);
            })
            .await;

        let scores = Reference::new(&server.base_url()).unwrap().child("scores");
        scores.update(&json!({"b": 3})).await.unwrap();
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn push_returns_child_for_generated_key() {
        let server = start_mock_server().await;
        let post = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/queue/.json")
                    .json_body(json!({"job": 1}));
                then.status(200).body(r#"{"name":"-NabcDEF123"}"#);
            })
            .await;

        let queue = Reference::new(&server.base_url()).unwrap().child("queue");
        let pushed = queue.push(&json!({"job": 1})).await.unwrap();

        assert_eq!(pushed.key(), Some("-NabcDEF123"));
        assert_eq!(
            pushed.address(),
            format!("{}/queue/-NabcDEF123", server.base_url())
        );
        post.assert_async().await;
    }

    #[tokio::test]
    async fn push_without_name_is_a_decode_error() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/queue/.json");
                then.status(200).body(r#"{"id":"x"}"#);
            })
            .await;

        let queue = Reference::new(&server.base_url()).unwrap().child("queue");
        let err = queue.push(&json!(1)).await.unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::Decode);
    }

    #[tokio::test]
    async fn remove_sends_delete() {
        let server = start_mock_server().await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/stale/.json");
                then.status(200).body("null");
            })
            .await;

        let stale = Reference::new(&server.base_url()).unwrap().child("stale");
        stale.remove().await.unwrap();
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn shallow_and_export_reads_set_flags_for_one_call() {
        let server = start_mock_server().await;
        let shallow = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/users/.json")
                    .query_param("shallow", "true");
                then.status(200).body(r#"{"alice":true,"bob":true}"#);
            })
            .await;
        let export = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/users/.json")
                    .query_param("format", "export");
                then.status(200)
                    .body(r#"{".priority":1,"alice":{"age":3}}"#);
            })
            .await;

        let users = Reference::new(&server.base_url()).unwrap().child("users");
        let keys: BTreeMap<String, bool> = users.shallow_value().await.unwrap();
        assert_eq!(keys.keys().collect::<Vec<_>>(), ["alice", "bob"]);

        let exported: Value = users.export_value().await.unwrap();
        assert_eq!(exported[".priority"], json!(1));
        assert!(users.params().is_empty());

        shallow.assert_async().await;
        export.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_request_carries_body() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/private/.json");
                then.status(401)
                    .body("{\n  \"error\" : \"Permission denied\"\n}\n");
            })
            .await;

        let private = Reference::new(&server.base_url()).unwrap().child("private");
        let err = private.value::<Value>().await.unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::RemoteRejected);
        assert_eq!(err.status(), Some(401));
        assert_eq!(
            err.server_response(),
            Some("{\n  \"error\" : \"Permission denied\"\n}\n")
        );
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/count/.json");
                then.status(200).body(r#""not a number""#);
            })
            .await;

        let count = Reference::new(&server.base_url()).unwrap().child("count");
        let err = count.value::<u64>().await.unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::Decode);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow/.json");
                then.status(200).body("1").delay(Duration::from_secs(3));
            })
            .await;

        let settings = DatabaseSettings::default().with_timeout(Duration::from_millis(200));
        let slow = Reference::with_settings(&server.base_url(), settings)
            .unwrap()
            .child("slow");
        let err = slow.value::<Value>().await.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn redirects_keep_headers() {
        let server = start_mock_server().await;
        let target = format!("{}/moved/.json", server.base_url());
        let hop = server
            .mock_async(|when, then| {
                when.method(GET).path("/origin/.json");
                then.status(307).header("Location", target.as_str());
            })
            .await;
        let landed = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/moved/.json")
                    .header("authorization", "Bearer abc");
                then.status(200).body("42");
            })
            .await;

        let settings = DatabaseSettings::default().with_header("Authorization", "Bearer abc");
        let origin = Reference::with_settings(&server.base_url(), settings)
            .unwrap()
            .child("origin");
        let value: u32 = origin.value().await.unwrap();

        assert_eq!(value, 42);
        hop.assert_async().await;
        landed.assert_async().await;
    }

    #[tokio::test]
    async fn endless_redirects_hit_the_limit() {
        let server = start_mock_server().await;
        let target = format!("{}/loop/.json", server.base_url());
        server
            .mock_async(|when, then| {
                when.method(GET).path("/loop/.json");
                then.status(307).header("Location", target.as_str());
            })
            .await;

        let looping = Reference::new(&server.base_url()).unwrap().child("loop");
        let err = looping.value::<Value>().await.unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::RedirectLimitExceeded);
    }

    #[tokio::test]
    async fn stream_lifecycle_through_reference() {
        let transport = ChannelTransport::new();
        let mut items = Reference::with_transport(
            "demo.firebaseio.com",
            DatabaseSettings::default(),
            transport.clone(),
        )
        .child("items");
        items.set_auth("token");

        let listener = items.listen(EventType::Value);
        items.start_stream().await.unwrap();
        assert!(items.is_streaming());
        assert_eq!(
            transport.request_header("accept").as_deref(),
            Some("text/event-stream")
        );

        let copy = items.clone();
        assert_eq!(copy.stream_state(), StreamState::Idle);

        transport.send_frame("put", json!({"path": "/", "data": {"a": 1}}));
        let event = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.data, json!({"a": 1}));

        items.stop_stream().await;
        assert_eq!(items.stream_state(), StreamState::Idle);
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn callbacks_receive_events() {
        let transport = ChannelTransport::new();
        let root = Reference::with_transport(
            "demo.firebaseio.com",
            DatabaseSettings::default(),
            transport.clone(),
        );
        let (tx, rx) = async_channel::unbounded();
        let id = root
            .on(EventType::ChildAdded, move |event| {
                let _ = tx.try_send(event);
            })
            .unwrap();

        root.start_stream().await.unwrap();
        transport.send_frame("put", json!({"path": "/new", "data": true}));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::ChildAdded);
        assert_eq!(event.key(), Some("new"));

        assert!(root.remove_listener(id));
        root.stop_stream().await;
    }
}
