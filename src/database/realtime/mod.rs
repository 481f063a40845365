//! Streaming subscriptions over the event-stream REST endpoint.
//!
//! A [`StreamController`] belongs to exactly one reference. It owns the session state
//! and the listener registry behind a single mutex; the decode loop runs on its own
//! tokio task and fans events out through one unbounded channel per listener, so a
//! slow consumer never holds up the loop or the other listeners.
//!
//! Listener registrations are scoped to a session: listeners registered while idle
//! join the next session, and stopping or failing a session releases all of them.

mod event;
mod frame;

pub use event::{ChangeEvent, EventFilter, EventType};

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Weak};

use futures::TryStreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::database::constants::EVENT_STREAM_MIME;
use crate::database::error::{
    internal_error, network_error, stream_already_active, stream_terminated, timeout_error,
    DatabaseError, DatabaseResult,
};
use crate::database::executor::RequestExecutor;
use crate::database::transport::{ByteStream, TransportError};
use crate::logger::Logger;
use event::{FrameOutcome, StreamView};
use frame::FrameDecoder;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database"));

pub type ListenerId = u64;

type EventSender = async_channel::Sender<DatabaseResult<ChangeEvent>>;
type EventReceiver = async_channel::Receiver<DatabaseResult<ChangeEvent>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    /// The last session ended on an error; a new start is required.
    Failed,
}

struct ListenerEntry {
    filter: EventFilter,
    sender: EventSender,
}

struct Session {
    id: u64,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct StreamShared {
    state: StreamState,
    session: Option<Session>,
    next_session_id: u64,
    listeners: HashMap<ListenerId, ListenerEntry>,
    next_listener_id: ListenerId,
}

impl StreamShared {
    fn release_listeners(&mut self) {
        // Dropping the senders closes every listener channel.
        self.listeners.clear();
    }

    fn dispatch(&mut self, event: &ChangeEvent) {
        self.listeners.retain(|_, entry| {
            if !entry.filter.matches(event.event_type) {
                return true;
            }
            entry.sender.try_send(Ok(event.clone())).is_ok()
        });
    }

    fn fail(&mut self, error: &DatabaseError) {
        for entry in self.listeners.values() {
            let _ = entry.sender.try_send(Err(error.clone()));
        }
        self.release_listeners();
    }
}

type SharedState = Arc<Mutex<StreamShared>>;

fn lock(shared: &Mutex<StreamShared>) -> MutexGuard<'_, StreamShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct StreamController {
    shared: SharedState,
}

impl Default for StreamController {
    fn default() -> Self {
        Self {
            shared: Arc::new(Mutex::new(StreamShared {
                state: StreamState::Idle,
                session: None,
                next_session_id: 0,
                listeners: HashMap::new(),
                next_listener_id: 0,
            })),
        }
    }
}

impl StreamController {
    pub(crate) fn state(&self) -> StreamState {
        lock(&self.shared).state
    }

    pub(crate) fn listen(&self, filter: EventFilter) -> Listener {
        let (sender, receiver) = async_channel::unbounded();
        let mut shared = lock(&self.shared);
        let id = shared.next_listener_id;
        shared.next_listener_id += 1;
        shared.listeners.insert(id, ListenerEntry { filter, sender });
        Listener {
            id,
            receiver,
            registry: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.shared).listeners.remove(&id).is_some()
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.shared).listeners.len()
    }

    pub(crate) async fn start(
        &self,
        executor: Arc<RequestExecutor>,
        url: String,
    ) -> DatabaseResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            internal_error(format!("no tokio runtime to drive the stream: {err}"))
        })?;

        let (session_id, token) = {
            let mut shared = lock(&self.shared);
            if shared.state == StreamState::Streaming {
                return Err(stream_already_active());
            }
            let id = shared.next_session_id;
            shared.next_session_id += 1;
            let token = CancellationToken::new();
            // Claim the slot before connecting so a concurrent start sees it.
            shared.state = StreamState::Streaming;
            shared.session = Some(Session {
                id,
                token: token.clone(),
                task: None,
            });
            (id, token)
        };

        LOGGER.debug(format!("starting stream {session_id} on {url}"));
        let opened = executor
            .open_stream(url, &[("Accept", EVENT_STREAM_MIME)])
            .await;

        let mut shared = lock(&self.shared);
        let still_current = shared
            .session
            .as_ref()
            .is_some_and(|session| session.id == session_id);

        let body = match opened {
            Ok(body) if still_current => body,
            Ok(_) => return Err(stream_terminated("the stream was stopped while connecting")),
            Err(err) => {
                if still_current {
                    shared.session = None;
                    shared.state = StreamState::Idle;
                }
                return Err(err);
            }
        };

        let task = runtime.spawn(run_session(
            Arc::downgrade(&self.shared),
            session_id,
            token,
            body,
        ));
        if let Some(session) = shared.session.as_mut() {
            session.task = Some(task);
        }
        Ok(())
    }

    /// Ends the active session and waits for its decode task to drop the connection.
    pub(crate) async fn stop(&self) {
        let task = {
            let mut shared = lock(&self.shared);
            shared.state = StreamState::Idle;
            // Idle: nothing to stop, listeners waiting for the next session stay.
            let Some(session) = shared.session.take() else {
                return;
            };
            shared.release_listeners();
            session.token.cancel();
            session.task
        };

        if let Some(task) = task {
            if let Err(err) = task.await {
                LOGGER.warn(format!("stream task ended abnormally: {err}"));
            }
            LOGGER.debug("stream stopped");
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.shared).session.take() {
            session.token.cancel();
        }
    }
}

async fn run_session(
    shared: Weak<Mutex<StreamShared>>,
    session_id: u64,
    token: CancellationToken,
    body: ByteStream,
) {
    let reader = StreamReader::new(body.map_err(into_io_error));
    let mut lines = reader.lines();
    let mut decoder = FrameDecoder::default();
    let mut view = StreamView::default();

    let failure = loop {
        let line = tokio::select! {
            _ = token.cancelled() => break None,
            line = lines.next_line() => line,
        };

        let frame = match line {
            Ok(Some(line)) => decoder.push_line(&line),
            Ok(None) => match decoder.finish() {
                Some(frame) => {
                    if let Some(error) = deliver(&shared, session_id, &mut view, frame) {
                        break Some(error);
                    }
                    break Some(stream_terminated("the server closed the stream"));
                }
                None => break Some(stream_terminated("the server closed the stream")),
            },
            Err(err) => break Some(read_failure(err)),
        };

        if let Some(frame) = frame {
            if let Some(error) = deliver(&shared, session_id, &mut view, frame) {
                break Some(error);
            }
        }
    };

    let Some(error) = failure else {
        return;
    };
    LOGGER.warn(format!("stream {session_id} terminated: {error}"));
    if let Some(shared) = shared.upgrade() {
        let mut shared = lock(&shared);
        let is_current = shared
            .session
            .as_ref()
            .is_some_and(|session| session.id == session_id);
        if is_current {
            shared.session = None;
            shared.state = StreamState::Failed;
            shared.fail(&error);
        }
    }
}

/// Applies one frame and fans the resulting events out. Returns the error that ends
/// the session, if any.
fn deliver(
    shared: &Weak<Mutex<StreamShared>>,
    session_id: u64,
    view: &mut StreamView,
    frame: frame::RawFrame,
) -> Option<DatabaseError> {
    let (events, terminal) = match view.apply(frame) {
        FrameOutcome::Events(events) => (events, None),
        FrameOutcome::Skip(reason) => {
            LOGGER.warn(format!("skipping stream frame: {reason}"));
            return None;
        }
        FrameOutcome::Terminate { event, error } => (event.into_iter().collect(), Some(error)),
    };

    let Some(shared) = shared.upgrade() else {
        return Some(stream_terminated("the reference was dropped"));
    };
    let mut shared = lock(&shared);
    let is_current = shared
        .session
        .as_ref()
        .is_some_and(|session| session.id == session_id);
    if is_current {
        for event in &events {
            shared.dispatch(event);
        }
    }
    terminal
}

fn into_io_error(err: TransportError) -> io::Error {
    let kind = match err {
        TransportError::Timeout(_) => io::ErrorKind::TimedOut,
        TransportError::Network(_) => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

fn read_failure(err: io::Error) -> DatabaseError {
    match err.get_ref().and_then(|inner| inner.downcast_ref::<TransportError>()) {
        Some(TransportError::Timeout(message)) => timeout_error(message.clone()),
        Some(TransportError::Network(message)) => network_error(message.clone()),
        None => stream_terminated(format!("failed to read the stream: {err}")),
    }
}

/// Receiving end of one listener registration.
///
/// Dropping the listener removes the registration. Once the session it belongs to is
/// stopped or fails, [`Listener::recv`] returns `None` after any pending items.
pub struct Listener {
    id: ListenerId,
    receiver: EventReceiver,
    registry: Weak<Mutex<StreamShared>>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Waits for the next event; `Err` items are terminal for the session.
    pub async fn recv(&self) -> Option<DatabaseResult<ChangeEvent>> {
        self.receiver.recv().await.ok()
    }

    pub fn try_recv(&self) -> Option<DatabaseResult<ChangeEvent>> {
        self.receiver.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    /// Unregisters the listener; events already buffered are discarded with it.
    pub fn detach(self) {
        if let Some(shared) = self.registry.upgrade() {
            lock(&shared).listeners.remove(&self.id);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            lock(&shared).listeners.remove(&self.id);
        }
    }
}
