//! Built-in HTTP server.
//!
//! Routes:
//! - POST {endpoint} - persisted operations
//! - GET /health - Health check
//!
//! Operations that defer nothing are answered with a single JSON body.
//! Otherwise the response is `multipart/mixed` and the rounds are written
//! to the body as the scheduler emits them.

use crate::error::{ServerError, ServerResult};
use crate::server::DeferServer;
use bytes::Bytes;
use deferql_runtime::{ChannelEmitter, DeferOverrides, ExecutionEngine, ExecutionOutcome};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::{HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Content type of deferred responses.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/mixed; boundary=\"-\"";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Parts buffered between the scheduler and the connection.
const CHUNK_BUFFER: usize = 16;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphQLRequest {
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub extensions: RequestExtensions,
}

/// `extensions` of a request; unknown members are ignored.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RequestExtensions {
    /// Budgets for this request only, e.g. `{"maxNestedRounds": 2}`.
    #[serde(default)]
    pub defer: DeferOverrides,
}

/// A validated request body.
#[derive(Debug, Default)]
pub(crate) struct ParsedRequest {
    pub operation_name: Option<String>,
    pub variables: HashMap<String, Value>,
    pub overrides: DeferOverrides,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorEntry {
    pub message: String,
    pub extensions: ErrorExtensions,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorExtensions {
    pub code: &'static str,
}

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Body fed by the scheduler through a channel; ends when the sender is
/// dropped.
#[derive(Debug)]
pub struct ChunkStream {
    receiver: mpsc::Receiver<Bytes>,
}

impl ChunkStream {
    pub fn new(receiver: mpsc::Receiver<Bytes>) -> Self {
        Self { receiver }
    }
}

impl Body for ChunkStream {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.receiver
            .poll_recv(cx)
            .map(|part| part.map(|bytes| Ok(Frame::data(bytes))))
    }
}

fn response_with(
    status: StatusCode,
    content_type: &'static str,
    body: BoxBody,
) -> Response<BoxBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn json_response<T: Serialize>(data: &T) -> Response<BoxBody> {
    match serde_json::to_vec(data) {
        Ok(body) => response_with(StatusCode::OK, JSON_CONTENT_TYPE, full(body)),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Failed to serialize response",
            )
        }
    }
}

fn error_response(status: StatusCode, code: &'static str, message: &str) -> Response<BoxBody> {
    let body = ErrorBody {
        errors: vec![ErrorEntry {
            message: message.to_string(),
            extensions: ErrorExtensions { code },
        }],
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    response_with(status, JSON_CONTENT_TYPE, full(bytes))
}

fn server_error_response(err: &ServerError) -> Response<BoxBody> {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, err.code(), &err.to_string())
}

/// Turns an execution outcome into an HTTP response.
///
/// A streaming outcome gets a `multipart/mixed` body; its rounds run on a
/// spawned task and are written in emission order.
pub fn create_response<E>(outcome: ExecutionOutcome<E>) -> Response<BoxBody>
where
    E: ExecutionEngine + 'static,
{
    match outcome {
        ExecutionOutcome::Complete(response) => json_response(&response),
        ExecutionOutcome::Streaming(stream) => {
            let (mut emitter, receiver) = ChannelEmitter::channel(CHUNK_BUFFER);
            tokio::spawn(async move {
                match stream.run(&mut emitter).await {
                    Ok(report) => debug!(
                        rounds = report.scheduled_rounds,
                        drained = report.drained,
                        "stream finished"
                    ),
                    Err(e) => warn!("Stream aborted: {}", e),
                }
            });

            let body: BoxBody = ChunkStream::new(receiver)
                .map_err(|never| match never {})
                .boxed();
            let mut response = response_with(StatusCode::OK, MULTIPART_CONTENT_TYPE, body);
            response.headers_mut().insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
            response
        }
    }
}

fn parse_request(body: &[u8]) -> ServerResult<ParsedRequest> {
    let request: GraphQLRequest = serde_json::from_slice(body)
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid JSON: {}", e)))?;

    let variables = match request.variables {
        None | Some(Value::Null) => HashMap::new(),
        Some(Value::Object(vars)) => vars.into_iter().collect(),
        Some(other) => {
            return Err(ServerError::InvalidRequest(format!(
                "variables must be an object, found {}",
                other
            )))
        }
    };
    Ok(ParsedRequest {
        operation_name: request.operation_name,
        variables,
        overrides: request.extensions.defer,
    })
}

/// Handles a POST to the GraphQL endpoint.
pub async fn handle_graphql_request(body: Bytes, server: &DeferServer) -> Response<BoxBody> {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => return server_error_response(&e),
    };

    debug!(
        operation = ?request.operation_name,
        overrides = !request.overrides.is_empty(),
        "Executing operation"
    );

    let outcome = server
        .execute_with(
            request.operation_name.as_deref(),
            request.variables,
            &request.overrides,
        )
        .await;
    match outcome {
        Ok(outcome) => create_response(outcome),
        Err(e) => {
            debug!("Rejected request: {}", e);
            server_error_response(&e)
        }
    }
}

pub(crate) fn health_response() -> &'static str {
    r#"{"status":"healthy"}"#
}

async fn route(req: Request<Incoming>, server: &DeferServer) -> Response<BoxBody> {
    let (parts, body) = req.into_parts();
    let endpoint = server.config().endpoint.as_str();

    match (&parts.method, parts.uri.path()) {
        (&Method::GET, "/health") => {
            response_with(StatusCode::OK, JSON_CONTENT_TYPE, full(health_response()))
        }
        (&Method::POST, path) if path == endpoint => match body.collect().await {
            Ok(collected) => handle_graphql_request(collected.to_bytes(), server).await,
            Err(e) => server_error_response(&ServerError::InvalidRequest(e.to_string())),
        },
        _ => response_with(
            StatusCode::NOT_FOUND,
            JSON_CONTENT_TYPE,
            full(r#"{"error":"Not Found"}"#),
        ),
    }
}

/// Serves connections from `listener` until accepting fails.
pub async fn serve(listener: TcpListener, server: Arc<DeferServer>) -> ServerResult<()> {
    loop {
        let (stream, peer) = listener.accept().await.map_err(ServerError::Accept)?;
        let io = TokioIo::new(stream);
        let server = Arc::clone(&server);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let server = Arc::clone(&server);
                async move { Ok::<_, Infallible>(route(req, &server).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                if !err.is_incomplete_message() {
                    error!(%peer, "Connection error: {:?}", err);
                }
            }
        });
    }
}

/// Starts the HTTP server.
pub(crate) async fn run_server(server: Arc<DeferServer>) -> ServerResult<()> {
    let addr = server.config().address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let local = listener
        .local_addr()
        .map_err(|_| ServerError::InvalidAddress(addr.clone()))?;
    info!("Listening on http://{}{}", local, server.config().endpoint);

    serve(listener, server).await
}
