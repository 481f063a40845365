use std::time::Duration;

/// End-to-end deadline applied to connect plus header receipt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of redirect hops followed for a single request.
pub const DEFAULT_REDIRECT_LIMIT: usize = 30;

pub(crate) const AUTH_PARAM: &str = "auth";
pub(crate) const FORMAT_PARAM: &str = "format";
pub(crate) const SHALLOW_PARAM: &str = "shallow";
pub(crate) const ORDER_BY_PARAM: &str = "orderBy";
pub(crate) const START_AT_PARAM: &str = "startAt";
pub(crate) const END_AT_PARAM: &str = "endAt";
pub(crate) const LIMIT_TO_FIRST_PARAM: &str = "limitToFirst";
pub(crate) const LIMIT_TO_LAST_PARAM: &str = "limitToLast";

pub(crate) const FORMAT_EXPORT: &str = "export";

pub(crate) const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Field of the push response that carries the generated key.
pub(crate) const PUSH_NAME_FIELD: &str = "name";
