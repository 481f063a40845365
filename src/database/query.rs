use std::collections::BTreeMap;

use serde_json::Value;

use crate::database::constants::{
    AUTH_PARAM, END_AT_PARAM, FORMAT_EXPORT, FORMAT_PARAM, LIMIT_TO_FIRST_PARAM,
    LIMIT_TO_LAST_PARAM, ORDER_BY_PARAM, SHALLOW_PARAM, START_AT_PARAM,
};

/// Query parameters attached to every request issued by a reference.
///
/// Keys are kept sorted so the rendered query string is stable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    values: BTreeMap<String, String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Form-encodes the parameters in key order.
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.values {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    pub(crate) fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub(crate) fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    pub(crate) fn set_auth(&mut self, token: impl Into<String>) {
        self.set(AUTH_PARAM, token);
    }

    pub(crate) fn remove_auth(&mut self) {
        self.remove(AUTH_PARAM);
    }

    pub(crate) fn set_shallow(&mut self, enabled: bool) {
        if enabled {
            self.set(SHALLOW_PARAM, "true");
        } else {
            self.remove(SHALLOW_PARAM);
        }
    }

    pub(crate) fn set_export_format(&mut self, enabled: bool) {
        if enabled {
            self.set(FORMAT_PARAM, FORMAT_EXPORT);
        } else {
            self.remove(FORMAT_PARAM);
        }
    }

    pub(crate) fn set_order_by(&mut self, key: &str) {
        self.set(ORDER_BY_PARAM, encode_string(key));
    }

    pub(crate) fn set_start_at(&mut self, value: &Value) {
        self.set(START_AT_PARAM, value.to_string());
    }

    pub(crate) fn set_end_at(&mut self, value: &Value) {
        self.set(END_AT_PARAM, value.to_string());
    }

    pub(crate) fn set_limit_to_first(&mut self, limit: u32) {
        self.set_limit(LIMIT_TO_FIRST_PARAM, limit);
    }

    pub(crate) fn set_limit_to_last(&mut self, limit: u32) {
        self.set_limit(LIMIT_TO_LAST_PARAM, limit);
    }

    fn set_limit(&mut self, key: &str, limit: u32) {
        if limit == 0 {
            self.remove(key);
        } else {
            self.set(key, limit.to_string());
        }
    }
}

/// Bounds and order keys are sent as JSON literals, so strings get quoted.
fn encode_string(value: &str) -> String {
    Value::String(value.to_owned()).to_string()
}
