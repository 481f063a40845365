use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{block_on, block_on_methods, RT};
use crate::database::{
    ChangeEvent, DatabaseResult, DatabaseSettings, EventFilter, Listener, ListenerId, Reference,
    StreamState,
};

/// Blocking counterpart of [`Reference`].
///
/// Navigation and query helpers return new blocking references; network calls block the
/// current thread until the response arrives. Must not be used from inside an async
/// runtime.
#[derive(Clone, Debug)]
pub struct BlockingReference {
    inner: Reference,
}

impl BlockingReference {
    pub fn new(address: &str) -> DatabaseResult<Self> {
        Ok(Self {
            inner: Reference::new(address)?,
        })
    }

    pub fn with_settings(address: &str, settings: DatabaseSettings) -> DatabaseResult<Self> {
        Ok(Self {
            inner: Reference::with_settings(address, settings)?,
        })
    }

    pub fn as_async(&self) -> &Reference {
        &self.inner
    }

    pub fn into_async(self) -> Reference {
        self.inner
    }

    pub fn url(&self) -> String {
        self.inner.url()
    }

    pub fn key(&self) -> Option<&str> {
        self.inner.key()
    }

    pub fn child(&self, path: &str) -> Self {
        self.inner.child(path).into()
    }

    pub fn parent(&self) -> Option<Self> {
        self.inner.parent().map(Self::from)
    }

    pub fn set_auth(&mut self, token: impl Into<String>) {
        self.inner.set_auth(token);
    }

    pub fn remove_auth(&mut self) {
        self.inner.remove_auth();
    }

    pub fn order_by(&self, key: &str) -> Self {
        self.inner.order_by(key).into()
    }

    pub fn start_at(&self, value: impl Into<Value>) -> Self {
        self.inner.start_at(value).into()
    }

    pub fn end_at(&self, value: impl Into<Value>) -> Self {
        self.inner.end_at(value).into()
    }

    pub fn equal_to(&self, value: impl Into<Value>) -> Self {
        self.inner.equal_to(value).into()
    }

    pub fn limit_to_first(&self, limit: u32) -> Self {
        self.inner.limit_to_first(limit).into()
    }

    pub fn limit_to_last(&self, limit: u32) -> Self {
        self.inner.limit_to_last(limit).into()
    }

    block_on_methods! {
        fn value_raw() -> DatabaseResult<Bytes>;
        fn remove() -> DatabaseResult<()>;
        fn start_stream() -> DatabaseResult<()>;
        fn stop_stream() -> ();
    }

    pub fn value<T: DeserializeOwned>(&self) -> DatabaseResult<T> {
        block_on(self.inner.value())
    }

    pub fn shallow_value<T: DeserializeOwned>(&self) -> DatabaseResult<T> {
        block_on(self.inner.shallow_value())
    }

    pub fn export_value<T: DeserializeOwned>(&self) -> DatabaseResult<T> {
        block_on(self.inner.export_value())
    }

    pub fn set<V: Serialize + ?Sized>(&self, value: &V) -> DatabaseResult<()> {
        block_on(self.inner.set(value))
    }

    pub fn update<V: Serialize + ?Sized>(&self, value: &V) -> DatabaseResult<()> {
        block_on(self.inner.update(value))
    }

    pub fn push<V: Serialize + ?Sized>(&self, value: &V) -> DatabaseResult<Self> {
        block_on(self.inner.push(value)).map(Self::from)
    }

    pub fn stream_state(&self) -> StreamState {
        self.inner.stream_state()
    }

    pub fn listen(&self, filter: impl Into<EventFilter>) -> BlockingListener {
        BlockingListener {
            inner: self.inner.listen(filter),
        }
    }

    /// Registers `callback`; it runs on the shared runtime's worker threads.
    pub fn on<F>(&self, filter: impl Into<EventFilter>, callback: F) -> DatabaseResult<ListenerId>
    where
        F: Fn(DatabaseResult<ChangeEvent>) + Send + 'static,
    {
        let _runtime = RT.enter();
        self.inner.on(filter, callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

impl From<Reference> for BlockingReference {
    fn from(inner: Reference) -> Self {
        Self { inner }
    }
}

/// Blocking counterpart of [`Listener`].
#[derive(Debug)]
pub struct BlockingListener {
    inner: Listener,
}

impl BlockingListener {
    pub fn id(&self) -> ListenerId {
        self.inner.id()
    }

    /// Waits for the next delivery; `None` once the session released this listener.
    pub fn recv(&self) -> Option<DatabaseResult<ChangeEvent>> {
        block_on(self.inner.recv())
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DatabaseResult<ChangeEvent>> {
        block_on(async { tokio::time::timeout(timeout, self.inner.recv()).await.ok().flatten() })
    }

    pub fn try_recv(&self) -> Option<DatabaseResult<ChangeEvent>> {
        self.inner.try_recv()
    }
}
