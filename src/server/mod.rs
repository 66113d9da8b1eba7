//! HTTP Server for Tsubame Uploadr
//!
//! Serves the upload URL issuance endpoint on top of `hyper` and `tokio`.
//!
//! # Endpoints
//!
//! * `POST /api/get-presigned-url` - issue a pre-signed PUT URL
//! * `GET /health` - health check (returns "ok")
//! * `GET /metrics` - Prometheus metrics, when enabled
//!
//! # Example
//!
//! ```no_run
//! use tsubame_uploadr::config::Config;
//! use tsubame_uploadr::server::Server;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::from_env()?;
//! config.server.address = "127.0.0.1:0".to_string();
//! let server = Server::new(config).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::issuance::{ErrorBody, IssuanceService, IssueError, IssueRequest};
use crate::metrics;
use crate::s3::AwsPresigner;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Route of the issuance endpoint
pub const PRESIGN_PATH: &str = "/api/get-presigned-url";

/// Largest accepted issuance request body
const MAX_REQUEST_BODY: usize = 64 * 1024;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

struct AppState {
    service: IssuanceService,
    metrics_enabled: bool,
}

/// HTTP Server
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Create a server signing with the AWS SDK from `config.storage`
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let presigner = AwsPresigner::new(&config.storage);
        info!(
            bucket = presigner.bucket().unwrap_or("<unset>"),
            region = presigner.region(),
            "Signing uploads"
        );
        let service = IssuanceService::new(Arc::new(presigner));
        Self::with_service(config, service).await
    }

    /// Create a server around an existing issuance service.
    ///
    /// Binds immediately; port 0 lets the OS pick a port.
    pub async fn with_service(
        config: Config,
        service: IssuanceService,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(AppState {
                service,
                metrics_enabled: config.metrics.enabled,
            }),
            listener,
            local_addr,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the server until the task is dropped
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// Each connection is served on its own task; accept errors are logged
    /// and do not stop the loop. In-flight connections are left to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Starting server on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Route a request
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<String>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    debug!("Handling {} {}", method, path);

    let response = match (method, path.as_str()) {
        (Method::POST, PRESIGN_PATH) => handle_presign(req, &state).await,
        (_, PRESIGN_PATH) => {
            let mut response = json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &ErrorBody {
                    error: "Method not allowed".into(),
                },
            );
            response
                .headers_mut()
                .insert(ALLOW, hyper::header::HeaderValue::from_static("POST"));
            response
        }
        (Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".into()),
        (Method::GET, "/metrics") if state.metrics_enabled => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics::gather_text(),
        ),
        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody {
                error: "Not found".into(),
            },
        ),
    };

    Ok(response)
}

/// `POST /api/get-presigned-url`
async fn handle_presign(req: Request<Incoming>, state: &AppState) -> Response<String> {
    let body = match Limited::new(req.into_body(), MAX_REQUEST_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read issuance request body: {}", e);
            return error_response(&IssueError::MissingParameter);
        }
    };

    let request: IssueRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed issuance request: {}", e);
            return error_response(&IssueError::MissingParameter);
        }
    };

    match state.service.issue(&request).await {
        Ok(issued) => json_response(StatusCode::OK, &issued),
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &IssueError) -> Response<String> {
    json_response(
        error.status_code(),
        &ErrorBody {
            error: error.public_message().to_string(),
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<String> {
    match serde_json::to_string(body) {
        Ok(json) => text_response(status, "application/json", json),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                r#"{"error":"Failed to generate upload URL"}"#.to_string(),
            )
        }
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
