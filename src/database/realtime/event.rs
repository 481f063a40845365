use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::database::error::{stream_terminated, DatabaseError};
use crate::database::realtime::frame::RawFrame;

/// Kind of a change delivered to stream listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Value,
    ChildAdded,
    ChildChanged,
    ChildRemoved,
    ChildMoved,
    KeepAlive,
    Cancel,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildChanged => "child_changed",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildMoved => "child_moved",
            EventType::KeepAlive => "keep-alive",
            EventType::Cancel => "cancel",
        }
    }

    fn from_typed_name(name: &str) -> Option<Self> {
        match name {
            "value" => Some(EventType::Value),
            "child_added" => Some(EventType::ChildAdded),
            "child_changed" => Some(EventType::ChildChanged),
            "child_removed" => Some(EventType::ChildRemoved),
            "child_moved" => Some(EventType::ChildMoved),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects which events a listener receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventFilter {
    Any,
    Only(EventType),
}

impl EventFilter {
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Only(expected) => *expected == event_type,
        }
    }
}

impl From<EventType> for EventFilter {
    fn from(value: EventType) -> Self {
        EventFilter::Only(value)
    }
}

/// A change observed on a streamed location.
///
/// `path` is relative to the streamed reference: `/` for `value` events, `/<key>` for
/// child events.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub path: String,
    pub data: Value,
}

impl ChangeEvent {
    fn new(event_type: EventType, path: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            path: path.into(),
            data,
        }
    }

    /// Last segment of `path`, `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.path.rsplit('/').find(|segment| !segment.is_empty())
    }
}

pub(crate) enum FrameOutcome {
    Events(Vec<ChangeEvent>),
    /// The frame could not be used; the session continues.
    Skip(String),
    /// The session must end, optionally after delivering one last event.
    Terminate {
        event: Option<ChangeEvent>,
        error: DatabaseError,
    },
}

#[derive(Deserialize)]
struct Envelope {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Local copy of the streamed location, used to turn `put`/`patch` frames into typed
/// change events.
#[derive(Debug, Default)]
pub(crate) struct StreamView {
    root: Value,
}

impl StreamView {
    #[cfg(test)]
    pub(crate) fn root(&self) -> &Value {
        &self.root
    }

    pub(crate) fn apply(&mut self, frame: RawFrame) -> FrameOutcome {
        let Some(name) = frame.event else {
            return FrameOutcome::Skip("frame without an event name".into());
        };

        match name.as_str() {
            "keep-alive" => FrameOutcome::Events(vec![ChangeEvent::new(
                EventType::KeepAlive,
                "/",
                Value::Null,
            )]),
            "cancel" => FrameOutcome::Terminate {
                event: Some(ChangeEvent::new(
                    EventType::Cancel,
                    "/",
                    parse_loose(frame.data.as_deref()),
                )),
                error: stream_terminated("the server cancelled the stream"),
            },
            "auth_revoked" => FrameOutcome::Terminate {
                event: None,
                error: stream_terminated(format!(
                    "the server revoked the stream credentials: {}",
                    frame.data.as_deref().unwrap_or("")
                )),
            },
            "put" | "patch" => {
                let envelope = match parse_envelope(frame.data.as_deref()) {
                    Ok(envelope) => envelope,
                    Err(reason) => return FrameOutcome::Skip(format!("{name}: {reason}")),
                };
                if name == "put" {
                    self.put(&envelope.path, envelope.data)
                } else {
                    self.patch(&envelope.path, envelope.data)
                }
            }
            other => match EventType::from_typed_name(other) {
                Some(event_type) => match parse_envelope(frame.data.as_deref()) {
                    Ok(envelope) => self.typed(event_type, envelope),
                    Err(reason) => FrameOutcome::Skip(format!("{other}: {reason}")),
                },
                None => FrameOutcome::Skip(format!("unrecognized event '{other}'")),
            },
        }
    }

    fn put(&mut self, path: &str, data: Value) -> FrameOutcome {
        let segments = split_path(path);
        let old = self.root.clone();
        set_at(&mut self.root, &segments, data);

        let touched = match segments.first() {
            Some(first) => BTreeSet::from([first.clone()]),
            None => keys_of(&old).chain(keys_of(&self.root)).collect(),
        };
        FrameOutcome::Events(self.changes(&old, touched))
    }

    fn patch(&mut self, path: &str, data: Value) -> FrameOutcome {
        let Value::Object(entries) = data else {
            return FrameOutcome::Skip("patch: data is not an object".into());
        };
        let base = split_path(path);
        let old = self.root.clone();
        let mut touched = BTreeSet::new();

        for (key, value) in entries {
            let mut segments = base.clone();
            segments.extend(split_path(&key));
            if let Some(first) = segments.first() {
                touched.insert(first.clone());
            }
            set_at(&mut self.root, &segments, value);
        }
        FrameOutcome::Events(self.changes(&old, touched))
    }

    /// Frames already named after a change type are delivered as-is; the view follows
    /// them so later `put`/`patch` diffs stay accurate.
    fn typed(&mut self, event_type: EventType, envelope: Envelope) -> FrameOutcome {
        let segments = split_path(&envelope.path);
        match event_type {
            EventType::Value | EventType::ChildAdded | EventType::ChildChanged => {
                set_at(&mut self.root, &segments, envelope.data.clone());
            }
            EventType::ChildRemoved => set_at(&mut self.root, &segments, Value::Null),
            _ => {}
        }
        FrameOutcome::Events(vec![ChangeEvent::new(
            event_type,
            envelope.path,
            envelope.data,
        )])
    }

    fn changes(&self, old: &Value, touched: BTreeSet<String>) -> Vec<ChangeEvent> {
        let mut events = Vec::with_capacity(touched.len() + 1);
        for key in touched {
            let before = child_of(old, &key);
            let after = child_of(&self.root, &key);
            let path = format!("/{key}");
            match (before, after) {
                (None, Some(value)) => {
                    events.push(ChangeEvent::new(EventType::ChildAdded, path, value.clone()))
                }
                (Some(value), None) => {
                    events.push(ChangeEvent::new(EventType::ChildRemoved, path, value.clone()))
                }
                (Some(previous), Some(value)) if previous != value => {
                    events.push(ChangeEvent::new(EventType::ChildChanged, path, value.clone()))
                }
                _ => {}
            }
        }
        events.push(ChangeEvent::new(EventType::Value, "/", self.root.clone()));
        events
    }
}

fn parse_envelope(data: Option<&str>) -> Result<Envelope, String> {
    let raw = data.ok_or_else(|| "missing data".to_string())?;
    serde_json::from_str(raw).map_err(|err| format!("malformed payload: {err}"))
}

fn parse_loose(data: Option<&str>) -> Value {
    data.and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null)
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

fn keys_of(value: &Value) -> impl Iterator<Item = String> + '_ {
    value
        .as_object()
        .into_iter()
        .flat_map(|map| map.keys().cloned())
}

fn child_of<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object()?.get(key).filter(|child| !is_empty_node(child))
}

/// `null` and `{}` both mean "no data" in the database.
fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Writes `value` at `segments`, creating objects on the way and pruning emptied ones.
fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = if is_empty_node(&value) {
            Value::Null
        } else {
            value
        };
        return;
    };

    if !node.is_object() {
        if is_empty_node(&value) {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let now_empty = match node {
        Value::Object(map) => {
            let child = map.entry(head.clone()).or_insert(Value::Null);
            set_at(child, rest, value);
            if is_empty_node(child) {
                map.remove(head);
            }
            map.is_empty()
        }
        _ => false,
    };
    if now_empty {
        *node = Value::Null;
    }
}
