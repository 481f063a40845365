use std::error::Error as StdError;
use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode};

use crate::database::error::{internal_error, DatabaseResult};

/// Body of a streaming response, yielded chunk by chunk as it arrives.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// One HTTP request as handed to a transport.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Deadline for connecting and receiving the response headers.
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Value of the `Location` header, used to follow redirects.
    pub location: Option<String>,
    pub body: Bytes,
}

pub struct StreamingResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: ByteStream,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Failure reported by a transport before a complete response was available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    Timeout(String),
    Network(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(message) => write!(f, "timeout: {message}"),
            TransportError::Network(message) => write!(f, "network error: {message}"),
        }
    }
}

impl StdError for TransportError {}

/// Anything able to issue an HTTP request and hand back status, headers and body.
///
/// Transports must not follow redirects themselves: the executor follows them so that
/// the original headers survive every hop.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs the request and reads the whole body.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Performs the request and returns as soon as headers arrive, leaving the body open.
    async fn open_stream(&self, request: HttpRequest)
        -> Result<StreamingResponse, TransportError>;
}

/// HTTPS transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> DatabaseResult<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| internal_error(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn builder(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = self.builder(&request).timeout(request.timeout);
        let response = send_with_timeout(builder, request.timeout).await?;
        let status = response.status();
        let location = location_of(&response);
        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        // No request-wide timeout here: the body stays open for the whole session.
        let builder = self.builder(&request);
        let response = send_with_timeout(builder, request.timeout).await?;
        let status = response.status();
        let location = location_of(&response);
        let body = response
            .bytes_stream()
            .map_err(classify_reqwest_error)
            .boxed();
        Ok(StreamingResponse {
            status,
            location,
            body,
        })
    }
}

async fn send_with_timeout(
    builder: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<Response, TransportError> {
    match tokio::time::timeout(timeout, builder.send()).await {
        Ok(result) => result.map_err(classify_reqwest_error),
        Err(_) => Err(TransportError::Timeout(format!(
            "no response headers within {}ms",
            timeout.as_millis()
        ))),
    }
}

fn location_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Maps a reqwest failure to a timeout when either reqwest itself or any wrapped
/// I/O error in its source chain reports one.
pub(crate) fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() || source_chain_timed_out(&err) {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

fn source_chain_timed_out(err: &(dyn StdError + 'static)) -> bool {
    let mut current = err.source();
    while let Some(source) = current {
        if let Some(io) = source.downcast_ref::<std::io::Error>() {
            if io.kind() == ErrorKind::TimedOut {
                return true;
            }
        }
        current = source.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapper(std::io::Error);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[derive(Debug)]
    struct Outer(Wrapper);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn nested_io_timeout_is_detected() {
        let err = Outer(Wrapper(std::io::Error::new(ErrorKind::TimedOut, "slow")));
        assert!(source_chain_timed_out(&err));

        let err = Outer(Wrapper(std::io::Error::new(
            ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(!source_chain_timed_out(&err));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = HttpRequest {
            method: Method::GET,
            url: "https://demo.firebaseio.com/.json".into(),
            headers: vec![("Accept".into(), "text/event-stream".into())],
            body: None,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(request.header("accept"), Some("text/event-stream"));
        assert_eq!(request.header("authorization"), None);
    }
}
