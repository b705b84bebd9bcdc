use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::envelope::{ActionEnvelope, ErrorBody, EventEnvelope};
use crate::handlers::{HandlerKind, HandlerRegistry, InvokeError};
use crate::session::RequestCtx;

/// Why a trigger request did not produce a handler result.
///
/// Every variant answers `400` with `{message, code: "400"}`; the variants stay
/// distinct so callers and tests can tell them apart.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("action '{0}' is not registered")]
    ActionNotFound(String),
    #[error("event '{0}' is not registered")]
    EventNotFound(String),
    #[error("{source}")]
    Invoke {
        kind: HandlerKind,
        name: String,
        #[source]
        source: InvokeError,
    },
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::bad_request(self.to_string()))).into_response()
    }
}

/// Resolves trigger envelopes to registered handlers and invokes them.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(handlers: Arc<HandlerRegistry>, cancel: CancellationToken) -> Self {
        Self { handlers, cancel }
    }

    pub async fn dispatch_action(&self, body: &[u8]) -> Result<Bytes, DispatchError> {
        let envelope: ActionEnvelope = serde_json::from_slice(body).map_err(|e| {
            tracing::debug!(core = "action", error = %e, "Rejected malformed action envelope");
            DispatchError::Decode(e)
        })?;

        let name = envelope.name();
        let Some(handler) = self.handlers.get(HandlerKind::Action, name) else {
            tracing::warn!(core = "action", action = %name, "No handler registered for action");
            return Err(DispatchError::ActionNotFound(name.to_owned()));
        };

        let ctx = RequestCtx::new(
            envelope.session_variables.to_session(),
            self.cancel.child_token(),
        );
        tracing::debug!(core = "action", action = %name, role = %ctx.session().role(), "Dispatching action");

        handler
            .invoke(ctx, envelope.input_bytes())
            .await
            .map_err(|source| DispatchError::Invoke {
                kind: HandlerKind::Action,
                name: name.to_owned(),
                source,
            })
    }

    /// Handlers receive the flattened [`crate::envelope::Event`], never the trigger wrapper.
    pub async fn dispatch_event(&self, body: &[u8]) -> Result<Bytes, DispatchError> {
        let envelope: EventEnvelope = serde_json::from_slice(body).map_err(|e| {
            tracing::debug!(core = "event", error = %e, "Rejected malformed event envelope");
            DispatchError::Decode(e)
        })?;

        let name = envelope.trigger_name().to_owned();
        let Some(handler) = self.handlers.get(HandlerKind::Event, &name) else {
            tracing::warn!(core = "event", trigger = %name, "No handler registered for event");
            return Err(DispatchError::EventNotFound(name));
        };

        let ctx = RequestCtx::new(envelope.session(), self.cancel.child_token());
        let event = envelope.into_event();
        tracing::debug!(core = "event", trigger = %name, op = %event.op, id = %event.id, "Dispatching event");

        let invoke_err = |source| DispatchError::Invoke {
            kind: HandlerKind::Event,
            name: name.clone(),
            source,
        };
        let payload = serde_json::to_vec(&event)
            .map(Bytes::from)
            .map_err(|e| invoke_err(InvokeError::Encode(e)))?;

        handler.invoke(ctx, payload).await.map_err(invoke_err)
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/actions", post(actions))
            .route("/events", post(events))
            .with_state(self)
    }
}

fn respond(result: Result<Bytes, DispatchError>) -> Response {
    match result {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn actions(State(dispatcher): State<Dispatcher>, body: Bytes) -> Response {
    respond(dispatcher.dispatch_action(&body).await)
}

async fn events(State(dispatcher): State<Dispatcher>, body: Bytes) -> Response {
    respond(dispatcher.dispatch_event(&body).await)
}
