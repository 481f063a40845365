use std::sync::{Arc, LazyLock};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::database::error::{
    network_error, redirect_limit_exceeded, remote_rejected, timeout_error, DatabaseError,
    DatabaseResult,
};
use crate::database::settings::DatabaseSettings;
use crate::database::transport::{ByteStream, HttpRequest, HttpTransport, TransportError};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database"));

/// Runs request/response cycles for references, following redirects according to the
/// configured policy and classifying the outcome. No retries happen at this layer.
pub(crate) struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    settings: DatabaseSettings,
}

impl RequestExecutor {
    pub(crate) fn new(transport: Arc<dyn HttpTransport>, settings: DatabaseSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub(crate) fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    fn build_request(
        &self,
        method: Method,
        url: String,
        extra_headers: &[(&str, &str)],
        body: Option<Bytes>,
    ) -> HttpRequest {
        let mut headers = self.settings.default_headers().to_vec();
        headers.extend(
            extra_headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        HttpRequest {
            method,
            url,
            headers,
            body,
            // Read at build time so every request sees the reference's current settings.
            timeout: self.settings.timeout(),
        }
    }

    /// Performs one request and returns the body of a 2xx response verbatim.
    pub(crate) async fn execute(
        &self,
        method: Method,
        url: String,
        body: Option<Bytes>,
    ) -> DatabaseResult<Bytes> {
        let original = self.build_request(method, url, &[], body);
        let mut request = original.clone();
        let mut hops = 0usize;

        loop {
            LOGGER.debug(format!("{} {}", request.method, request.url));
            let response = self
                .transport
                .send(request.clone())
                .await
                .map_err(transport_failure)?;

            if let Some(next) = self.redirect_target(
                &original,
                &request,
                &[],
                response.status,
                response.location,
            )? {
                hops += 1;
                self.check_hops(hops)?;
                request = next;
                continue;
            }

            return classify_status(response.status, response.body);
        }
    }

    /// Opens a long-lived response and returns its body once a 2xx status arrives.
    pub(crate) async fn open_stream(
        &self,
        url: String,
        extra_headers: &[(&str, &str)],
    ) -> DatabaseResult<ByteStream> {
        let original = self.build_request(Method::GET, url, extra_headers, None);
        let mut request = original.clone();
        let mut hops = 0usize;

        loop {
            LOGGER.debug(format!("opening stream {}", request.url));
            let response = self
                .transport
                .open_stream(request.clone())
                .await
                .map_err(transport_failure)?;

            if let Some(next) = self.redirect_target(
                &original,
                &request,
                extra_headers,
                response.status,
                response.location,
            )? {
                hops += 1;
                self.check_hops(hops)?;
                request = next;
                continue;
            }

            if response.status.is_success() {
                return Ok(response.body);
            }

            let body = collect_body(response.body).await?;
            return Err(rejection(response.status, &body));
        }
    }

    fn check_hops(&self, hops: usize) -> DatabaseResult<()> {
        if hops > self.settings.redirect_policy().max_hops {
            LOGGER.warn(format!("giving up after {hops} redirects"));
            return Err(redirect_limit_exceeded(hops));
        }
        Ok(())
    }

    /// Builds the next hop when `status` is a redirect carrying a `Location` header.
    ///
    /// `own_headers` belong to the request itself and go out on every hop; the redirect
    /// policy only decides whether the default headers follow.
    fn redirect_target(
        &self,
        original: &HttpRequest,
        current: &HttpRequest,
        own_headers: &[(&str, &str)],
        status: StatusCode,
        location: Option<String>,
    ) -> DatabaseResult<Option<HttpRequest>> {
        if !status.is_redirection() {
            return Ok(None);
        }
        let Some(location) = location else {
            return Ok(None);
        };

        let base = Url::parse(&current.url)
            .map_err(|err| network_error(format!("invalid request URL {}: {err}", current.url)))?;
        let target = base
            .join(&location)
            .map_err(|err| network_error(format!("invalid redirect location {location}: {err}")))?;

        let mut next = current.clone();
        next.url = target.to_string();
        next.headers = if self.settings.redirect_policy().preserve_headers {
            original.headers.clone()
        } else {
            own_headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        };

        // 301/302/303 turn anything but GET/HEAD into a bodiless GET, 307/308 replay as-is.
        let rewrites_method = matches!(
            status,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
        );
        if rewrites_method && current.method != Method::GET && current.method != Method::HEAD {
            next.method = Method::GET;
            next.body = None;
        }

        LOGGER.debug(format!("{} redirected to {}", status.as_u16(), next.url));
        Ok(Some(next))
    }
}

fn classify_status(status: StatusCode, body: Bytes) -> DatabaseResult<Bytes> {
    if status.is_success() {
        Ok(body)
    } else {
        Err(rejection(status, &body))
    }
}

fn rejection(status: StatusCode, body: &[u8]) -> DatabaseError {
    remote_rejected(status.as_u16(), String::from_utf8_lossy(body))
}

pub(crate) fn transport_failure(err: TransportError) -> DatabaseError {
    match err {
        TransportError::Timeout(message) => timeout_error(message),
        TransportError::Network(message) => network_error(message),
    }
}

async fn collect_body(mut stream: ByteStream) -> DatabaseResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk.map_err(transport_failure)?);
    }
    Ok(buffer.freeze())
}
