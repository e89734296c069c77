use std::{
    convert::Infallible,
    sync::{Arc, RwLock},
    time::Instant,
};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue, Response, StatusCode,
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN, REFERER},
    },
    middleware::{self, Next},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use tracing::{debug, info, warn};
use wire::{
    CONTENT_TYPE_ENVELOPE, HEADER_CONNECTION_NAME, HEADER_ENGINE_PLATFORM, HEADER_ENGINE_VERSION,
    HEADER_REQUEST_DESCRIPTION, HEADER_UI_VERSION, encode_empty_result, encode_error_result,
    encode_success_result, encode_tokenize_result,
};

use crate::{
    connections::EngineBinding,
    events::{EventDispatcher, Subscriber},
    executor::{ExecutionError, RunRequest, execute_run, interrupt_connection},
    logging::{category_access, category_query, method_label, status_label},
    proxy::proxy_handler,
    tokenizer::tokenize_bytes,
};

/// State shared by every request handler of one running server.
#[derive(Clone)]
pub struct SharedState {
    /// `http://localhost:<port>`, compared against `Origin` and `Referer`.
    pub local_url: String,
    pub remote_url: String,
    pub ui_version: String,
    pub binding: Arc<RwLock<EngineBinding>>,
    pub dispatcher: Arc<EventDispatcher>,
    pub client: reqwest::Client,
}

impl SharedState {
    pub fn binding(&self) -> EngineBinding {
        self.binding
            .read()
            .expect("engine binding lock poisoned")
            .clone()
    }

    fn origin_matches(&self, headers: &HeaderMap) -> bool {
        header_str(headers, ORIGIN.as_str()) == self.local_url
    }

    fn referer_matches(&self, headers: &HeaderMap) -> bool {
        header_str(headers, REFERER.as_str()).starts_with(&self.local_url)
    }
}

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .route("/info", get(info_handler))
        .route("/localEvents", get(local_events_handler))
        .route("/localToken", get(local_token_handler))
        .route("/ddb/run", post(run_handler))
        .route("/ddb/tokenize", post(tokenize_handler))
        .route("/ddb/interrupt", post(interrupt_handler))
        .fallback(get(proxy_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

async fn info_handler(State(state): State<SharedState>) -> Response<Body> {
    let binding = state.binding();
    let mut response = text_response(StatusCode::OK, "");
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    for (name, value) in [
        (HEADER_ENGINE_VERSION, binding.engine_version.as_str()),
        (HEADER_ENGINE_PLATFORM, binding.platform.as_str()),
        (HEADER_UI_VERSION, state.ui_version.as_str()),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    response
}

async fn local_events_handler(State(state): State<SharedState>) -> impl IntoResponse {
    // a closed dispatcher yields no subscriber, which ends the stream right away
    let subscriber = state.dispatcher.subscribe();
    let stream = futures::stream::unfold(subscriber, |subscriber: Option<Subscriber>| async move {
        let mut subscriber = subscriber?;
        let event = subscriber.wait_event().await?;
        let frame = SseEvent::default().event(event.name).data(event.data);
        Some((Ok::<_, Infallible>(frame), Some(subscriber)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn local_token_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response<Body> {
    if !state.referer_matches(&headers) {
        return unauthorized_response();
    }

    let binding = state.binding();
    let outcome = tokio::task::spawn_blocking(move || {
        let database = binding.database.lock().ok_or(ExecutionError::Invalidated)?;
        let connection = database.connect()?;
        Ok::<_, ExecutionError>(connection.credential_token()?)
    })
    .await
    .map_err(ExecutionError::TaskJoin)
    .and_then(|outcome| outcome);

    match outcome {
        Ok(token) => text_response(StatusCode::OK, &token),
        Err(ExecutionError::Invalidated) => text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ExecutionError::Invalidated.to_string(),
        ),
        Err(err) => {
            warn!("{} token request failed: {err}", category_query());
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Could not get token: {err}"),
            )
        }
    }
}

async fn run_handler(State(state): State<SharedState>, request: Request) -> Response<Body> {
    if !state.origin_matches(request.headers()) {
        return unauthorized_response();
    }

    let (parts, body) = request.into_parts();
    let sql = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(sql) => sql,
            Err(err) => {
                warn!("{} rejected run body: {err}", category_query());
                return envelope_response(encode_error_result(&format!(
                    "request body is not valid UTF-8: {}",
                    err.utf8_error()
                )));
            }
        },
        Err(err) => {
            warn!("{} failed to read request body: {err}", category_query());
            return envelope_response(encode_error_result(&format!(
                "failed to read request body: {err}"
            )));
        }
    };

    let binding = state.binding();
    let headers = parts.headers;
    let outcome = tokio::task::spawn_blocking(move || {
        let request = RunRequest::from_headers(&headers, sql)?;
        let result = execute_run(&binding, &request)?;
        Ok::<_, ExecutionError>(encode_success_result(&result)?)
    })
    .await
    .map_err(ExecutionError::TaskJoin)
    .and_then(|outcome| outcome);

    match outcome {
        Ok(bytes) => envelope_response(bytes),
        Err(err) => {
            warn!("{} run failed: {err}", category_query());
            envelope_response(encode_error_result(&err.to_string()))
        }
    }
}

async fn tokenize_handler(State(state): State<SharedState>, request: Request) -> Response<Body> {
    if !state.origin_matches(request.headers()) {
        return unauthorized_response();
    }

    let description = header_str(request.headers(), HEADER_REQUEST_DESCRIPTION).to_string();
    let body = match to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("{} failed to read request body: {err}", category_query());
            return text_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };
    let result = tokenize_bytes(&body);
    debug!(
        "{} tokenized {} bytes into {} tokens description={description}",
        category_query(),
        body.len(),
        result.offsets.len()
    );
    envelope_response(encode_tokenize_result(&result))
}

async fn interrupt_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response<Body> {
    if !state.origin_matches(&headers) {
        return unauthorized_response();
    }

    let connection_name = header_str(&headers, HEADER_CONNECTION_NAME);
    let description = header_str(&headers, HEADER_REQUEST_DESCRIPTION);
    if !interrupt_connection(&state.binding(), connection_name) {
        debug!(
            "{} interrupt found no connection name={connection_name} description={description}",
            category_query()
        );
        return empty_response(StatusCode::NOT_FOUND);
    }
    debug!(
        "{} interrupted name={connection_name} description={description}",
        category_query()
    );
    envelope_response(encode_empty_result())
}

fn envelope_response(bytes: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(bytes));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_ENVELOPE));
    response
}

fn unauthorized_response() -> Response<Body> {
    empty_response(StatusCode::UNAUTHORIZED)
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

pub(crate) fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

async fn access_log_middleware(request: Request, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis();
    let status = response.status();

    info!(
        "{} {} {} {} {}ms",
        category_access(),
        method_label(method.as_str()),
        status_label(status.as_u16()),
        uri,
        elapsed_ms
    );

    response
}
