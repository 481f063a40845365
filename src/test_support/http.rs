use httpmock::MockServer;

/// Starts a fresh `httpmock::MockServer` for tests running inside a tokio runtime.
pub async fn start_mock_server() -> MockServer {
    MockServer::start_async().await
}
