//! IPC server and client over a Unix domain socket.
//!
//! The protocol is strictly request/response: one JSON object per line in,
//! one per line out. Stats and listings are pulled by clients on their own
//! schedule; the daemon never pushes.

use crate::{error_codes, IpcError, IpcResult, Method, Request, Response};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Handler function type for IPC methods.
pub type HandlerFn =
    Box<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync>;

/// IPC server that listens on a Unix domain socket.
pub struct IpcServer {
    socket_path: String,
    handlers: Arc<RwLock<HashMap<Method, HandlerFn>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Create a new IPC server.
    pub fn new(socket_path: &str) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            socket_path: socket_path.to_string(),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Register a handler for a method.
    pub async fn register_handler<F, Fut>(&self, method: Method, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let boxed_handler: HandlerFn = Box::new(move |req| Box::pin(handler(req)));
        self.handlers.write().await.insert(method, boxed_handler);
    }

    /// Get a shutdown receiver.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a shutdown sender (for handlers that need to trigger shutdown).
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start the server and listen for connections.
    pub async fn run(&self) -> IpcResult<()> {
        // Remove existing socket file
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path, "IPC server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handlers = self.handlers.clone();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let handlers = handlers.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handlers).await {
                                    error!(error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        // Cleanup socket file
        let _ = std::fs::remove_file(&self.socket_path);

        Ok(())
    }
}

/// Handle a single client connection.
async fn handle_connection(
    stream: UnixStream,
    handlers: Arc<RwLock<HashMap<Method, HandlerFn>>>,
) -> IpcResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    debug!("Client connected");

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!(request = %trimmed, "Received request");

        let request = match Request::from_json(trimmed) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Failed to parse request");
                let response =
                    Response::error("", error_codes::PARSE_ERROR, &format!("Parse error: {}", e));
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        let request_id = request.id.clone();
        let method = request.method.clone();

        let response = {
            let handlers = handlers.read().await;
            if let Some(handler) = handlers.get(&method) {
                handler(request).await
            } else {
                Response::error(
                    &request_id,
                    error_codes::METHOD_NOT_FOUND,
                    &format!("Method not found: {:?}", method),
                )
            }
        };

        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> IpcResult<()> {
    let response_json = response.to_json()?;
    debug!(response = %response_json, "Sending response");

    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// IPC client for connecting to the daemon.
pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    /// Create a new IPC client.
    pub fn new(socket_path: &str) -> Self {
        Self {
            socket_path: socket_path.to_string(),
        }
    }

    /// Send a request and wait for response.
    pub async fn call(&self, request: Request) -> IpcResult<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::Socket(format!("Failed to connect: {}", e)))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        // Send request
        let request_json = request.to_json()?;
        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // Read response
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        if line.is_empty() {
            return Err(IpcError::ConnectionClosed);
        }

        let response = Response::from_json(line.trim())?;
        Ok(response)
    }

    /// Send a method call with no parameters.
    pub async fn call_method(&self, method: Method) -> IpcResult<Response> {
        self.call(Request::new(method)).await
    }

    /// Send a method call with parameters.
    pub async fn call_method_with_params(
        &self,
        method: Method,
        params: serde_json::Value,
    ) -> IpcResult<Response> {
        self.call(Request::with_params(method, params)).await
    }

    /// Check if the daemon is running.
    pub async fn is_daemon_running(&self) -> bool {
        self.call_method(Method::Health).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn start_server(server: Arc<IpcServer>) {
        let runner = server.clone();
        tokio::spawn(async move {
            runner.run().await.unwrap();
        });

        // Wait for the listener to come up.
        let client = IpcClient::new(&server.socket_path);
        for _ in 0..100 {
            if client.is_daemon_running().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not start");
    }

    async fn health_server(socket_path: &str) -> Arc<IpcServer> {
        let server = Arc::new(IpcServer::new(socket_path));
        server
            .register_handler(Method::Health, |req| async move {
                Response::success(&req.id, serde_json::json!({"status": "ok"}))
            })
            .await;
        server
    }

    #[tokio::test]
    async fn client_reports_daemon_not_running_without_socket() {
        let client = IpcClient::new("/tmp/stockrelay-missing.sock");
        assert!(!client.is_daemon_running().await);
    }

    #[tokio::test]
    async fn end_to_end_request_response() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("stockrelay.sock");
        let socket_path = socket_path.to_string_lossy();

        let server = health_server(&socket_path).await;
        server
            .register_handler(Method::StatsGet, |req| async move {
                Response::success(&req.id, serde_json::json!({"pending": 3}))
            })
            .await;
        start_server(server.clone()).await;

        let client = IpcClient::new(&socket_path);
        let response = client.call_method(Method::StatsGet).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.result.unwrap()["pending"], 3);

        server.shutdown();
    }

    #[tokio::test]
    async fn unregistered_method_returns_method_not_found() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("stockrelay.sock");
        let socket_path = socket_path.to_string_lossy();

        let server = health_server(&socket_path).await;
        start_server(server.clone()).await;

        let client = IpcClient::new(&socket_path);
        let response = client.call_method(Method::MovementList).await.unwrap();
        assert!(!response.is_success());
        assert_eq!(
            response.error.unwrap().code,
            error_codes::METHOD_NOT_FOUND
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn malformed_request_gets_parse_error() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("stockrelay.sock");
        let socket_path_str = socket_path.to_string_lossy().to_string();

        let server = health_server(&socket_path_str).await;
        start_server(server.clone()).await;

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"this is not json\n").await.unwrap();
        writer.flush().await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response = Response::from_json(line.trim()).unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::PARSE_ERROR);

        server.shutdown();
    }

    #[tokio::test]
    async fn shutdown_removes_socket_file() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("stockrelay.sock");
        let socket_path_str = socket_path.to_string_lossy().to_string();

        let server = health_server(&socket_path_str).await;
        start_server(server.clone()).await;
        assert!(socket_path.exists());

        server.shutdown();
        for _ in 0..100 {
            if !socket_path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("socket file was not cleaned up");
    }

    #[tokio::test]
    async fn shutdown_receiver_fires() {
        let server = IpcServer::new("/tmp/stockrelay-test-shutdown.sock");
        let mut receiver = server.shutdown_receiver();

        server.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
        assert!(result.is_ok());
    }
}
