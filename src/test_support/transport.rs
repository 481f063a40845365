use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;

use crate::database::transport::{
    HttpRequest, HttpResponse, HttpTransport, StreamingResponse, TransportError,
};

type Chunk = Result<Bytes, TransportError>;

/// Streaming transport double fed by the test through a channel.
///
/// Every `open_stream` call opens a fresh "connection"; the connection counts as open
/// until the body stream handed to the caller is dropped or runs dry.
#[derive(Default)]
pub struct ChannelTransport {
    sender: Mutex<Option<async_channel::Sender<Chunk>>>,
    last_request: Mutex<Option<HttpRequest>>,
    opened: AtomicUsize,
    open: Arc<AtomicUsize>,
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total number of connections opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections whose body has not been released yet.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn request_header(&self, name: &str) -> Option<String> {
        self.last_request
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|request| request.header(name).map(str::to_owned))
    }

    pub fn send_raw(&self, text: &str) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.try_send(Ok(Bytes::from(text.to_owned())));
        }
    }

    pub fn send_frame(&self, event: &str, data: Value) {
        self.send_raw(&format!("event: {event}\ndata: {data}\n\n"));
    }

    pub fn fail(&self, error: TransportError) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.try_send(Err(error));
        }
    }

    /// Ends the current connection from the server side.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}

#[async_trait]
impl HttpTransport for ChannelTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Err(TransportError::Network(
            "ChannelTransport only serves streams".into(),
        ))
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let (sender, receiver) = async_channel::unbounded::<Chunk>();
        *self.sender.lock().unwrap() = Some(sender);
        *self.last_request.lock().unwrap() = Some(request);

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard(Arc::clone(&self.open));

        let body = futures::stream::unfold((receiver, guard), |(receiver, guard)| async move {
            let chunk = receiver.recv().await.ok()?;
            Some((chunk, (receiver, guard)))
        })
        .boxed();

        Ok(StreamingResponse {
            status: reqwest::StatusCode::OK,
            location: None,
            body,
        })
    }
}
