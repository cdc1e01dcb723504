//! axum handler translating HTTP requests into command dispatch.
//!
//! Every request walks the same pipeline: the origin and referer checks
//! run first and reject cross-site requests with 403 before any command
//! code is reached; the URL is parsed into a command request; the
//! executor runs on a blocking thread and streams bridge events back;
//! the handler turns the event stream into a chunked response.
//!
//! The request context is cancelled by whichever fires first: the
//! environment's parent context or the client going away. Both triggers
//! share one cancel state created before parsing, so neither can be lost.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request as HttpRequest, State};
use axum::response::Response;
use axum::Router;
use http::header::{HeaderName, HeaderValue};
use http::{header, HeaderMap, StatusCode};
use http_body_util::StreamBody;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use cask_cmds::{execute, Canceller, Command, CommandError, Context, Error};

use crate::config::ServerConfig;
use crate::errors::{sanitized_message, status_for};
use crate::parse::parse_request;
use crate::response::{
    BridgeBody, BridgeEvent, HttpResponseEmitter, ResponseHead, X_CHUNKED_OUTPUT,
    X_CONTENT_LENGTH, X_STREAM_ERROR,
};

/// Tracing target for bridge diagnostics.
const HANDLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handler");

/// Upper bound on buffered request bodies.
const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Product token identifying cask clients in the user-agent handshake.
const API_PRODUCT_TOKEN: &str = "/cask/";

/// Bound on queued bridge events between the executor and the handler.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Daemon services handed through to command bodies.
///
/// The bridge treats the environment as opaque except for two hooks: the
/// `Any` view passed to run functions for downcasting, and an optional
/// parent context that scopes every request to the daemon's lifetime.
pub trait Environment: Send + Sync + 'static {
    /// Returns the concrete environment for command bodies to downcast.
    fn as_any(&self) -> &dyn Any;

    /// Returns the parent context requests derive from, if any.
    fn context(&self) -> Option<Context> {
        None
    }
}

impl Environment for () {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct BridgeState {
    root: Arc<Command>,
    config: Arc<ServerConfig>,
    env: Arc<dyn Environment>,
}

/// Builds a router serving the command tree at every path.
pub fn router(
    root: Arc<Command>,
    config: Arc<ServerConfig>,
    env: Arc<dyn Environment>,
) -> Router {
    let state = Arc::new(BridgeState { root, config, env });
    Router::new().fallback(handle).with_state(state)
}

async fn handle(State(state): State<Arc<BridgeState>>, request: HttpRequest) -> Response {
    let (parts, body) = request.into_parts();

    if !allow_origin(&parts.headers, &state.config) || !allow_referer(&parts.headers, &state.config)
    {
        warn!(
            target: HANDLER_TARGET,
            uri = %parts.uri,
            "blocked request (possible CSRF)"
        );
        return plain_response(StatusCode::FORBIDDEN, "403 - Forbidden");
    }

    if let Some(user_agent) = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
    {
        // Advisory only: the mismatch is logged, the request still runs.
        if let Err(error) = api_version_matches(user_agent, &state.config.version()) {
            warn!(target: HANDLER_TARGET, %error, "client version mismatch");
        }
    }

    let parent = state.env.context().unwrap_or_else(Context::background);
    let (context, canceller) = parent.with_cancel();

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(error) => {
            canceller.cancel();
            return plain_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {error}"),
            );
        }
    };

    let req = match parse_request(context, &state.root, &parts.uri, body) {
        Ok(req) => req,
        Err(error) => {
            canceller.cancel();
            return plain_response(status_for(&error), &sanitized_message(&error));
        }
    };

    debug!(
        target: HANDLER_TARGET,
        path = %parts.uri.path(),
        "dispatching request"
    );

    let (sender, mut receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let head_sent = Arc::new(AtomicBool::new(false));
    let emitter = HttpResponseEmitter::new(sender.clone(), Arc::clone(&head_sent), &req);

    let env = Arc::clone(&state.env);
    tokio::task::spawn_blocking(move || {
        let mut req = req;
        match execute(&mut req, Box::new(emitter), env.as_any()) {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                debug!(target: HANDLER_TARGET, "request cancelled");
            }
            Err(error) => {
                if head_sent.load(Ordering::SeqCst) {
                    // The emitter already carried the failure as a trailer.
                    debug!(
                        target: HANDLER_TARGET,
                        %error,
                        "command failed after the stream started"
                    );
                } else if sender.blocking_send(BridgeEvent::Fail(error)).is_err() {
                    debug!(
                        target: HANDLER_TARGET,
                        "client went away before the failure was reported"
                    );
                }
            }
        }
    });

    match receiver.recv().await {
        Some(BridgeEvent::Head(head)) => {
            stream_response(head, receiver, canceller, &state.config)
        }
        Some(BridgeEvent::Fail(error)) => {
            canceller.cancel();
            error_response(&state.config, status_for(&error), &sanitized_message(&error))
        }
        Some(BridgeEvent::Chunk(_)) | Some(BridgeEvent::Trailer(_)) | None => {
            canceller.cancel();
            plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "command produced no response",
            )
        }
    }
}

/// Compares the client user-agent against the daemon version.
///
/// The check only applies to cask clients (user-agents carrying the
/// `/cask/` product token); everything else passes.
///
/// # Errors
///
/// Returns a client [`CommandError`] describing the version mismatch.
pub fn api_version_matches(user_agent: &str, daemon_version: &str) -> Result<(), CommandError> {
    if user_agent.is_empty() || !user_agent.contains(API_PRODUCT_TOKEN) {
        return Ok(());
    }
    if user_agent != daemon_version {
        return Err(CommandError::client(format!(
            "api version mismatch ({daemon_version} != {user_agent})"
        )));
    }
    Ok(())
}

/// Checks the Origin header against the allowed origin list.
///
/// Requests without an Origin header (curl, scripts, typed URLs) pass.
fn allow_origin(headers: &HeaderMap, config: &ServerConfig) -> bool {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if origin.is_empty() {
        return true;
    }
    config
        .allowed_origins()
        .iter()
        .any(|allowed| allowed == "*" || allowed == origin)
}

/// Checks the Referer header against the allowed origin list.
///
/// The referer's scheme and host are compared like an origin, which closes
/// the CSRF hole left by browsers that send a referer without an origin.
fn allow_referer(headers: &HeaderMap, config: &ServerConfig) -> bool {
    let referer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if referer.is_empty() {
        return true;
    }

    let Ok(parsed) = url::Url::parse(referer) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };

    config
        .allowed_origins()
        .iter()
        .any(|allowed| allowed == "*" || *allowed == origin)
}

fn stream_response(
    head: ResponseHead,
    receiver: mpsc::Receiver<BridgeEvent>,
    canceller: Canceller,
    config: &ServerConfig,
) -> Response {
    let body = Body::new(StreamBody::new(BridgeBody::new(receiver, canceller)));
    let mut response = Response::new(body);

    let headers = response.headers_mut();
    insert_header(headers, header::CONTENT_TYPE.as_str(), head.content_type);
    insert_header(headers, X_CHUNKED_OUTPUT, "1");
    insert_header(headers, header::TRAILER.as_str(), X_STREAM_ERROR);
    if let Some(length) = head.length {
        insert_header(headers, X_CONTENT_LENGTH, &length.to_string());
    }
    apply_user_headers(config, headers);
    response
}

fn error_response(config: &ServerConfig, status: StatusCode, message: &str) -> Response {
    let mut response = plain_response(status, message);
    apply_user_headers(config, response.headers_mut());
    response
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    let mut response = Response::new(Body::from(message.to_owned()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn apply_user_headers(config: &ServerConfig, headers: &mut HeaderMap) {
    for (name, values) in config.api_headers() {
        for value in values {
            insert_header(headers, &name, &value);
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        }
        _ => warn!(
            target: HANDLER_TARGET,
            name,
            "dropping response header with an invalid name or value"
        ),
    }
}
