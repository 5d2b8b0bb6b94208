//! Request boundary turning faults into JSON replies
//!
//! Handlers return `Result<_, Fault>`. A returned fault is parked in the
//! response extensions and picked up by [`error_boundary`], which logs it and
//! renders the one reply the client gets. Panics are caught underneath the
//! boundary and rendered the same way; the panic hook leaves their logging to
//! the boundary.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

use crate::error::{Fault, GENERIC_DATABASE_MESSAGE, GENERIC_SERVER_MESSAGE};

/// How much error detail replies may carry. Fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub suppress_server_errors: bool,
}

/// Status and JSON body for a fault.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReply {
    pub status: StatusCode,
    pub body: Value,
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

tokio::task_local! {
    /// Where a handler under the boundary panicked, filled in by the panic hook.
    static PANIC_SITE: Arc<Mutex<Option<String>>>;
}

/// Stores `site` for the boundary serving the current task.
///
/// Returns `false` when no request boundary is active, in which case the
/// caller still has to report the panic itself.
pub(crate) fn record_panic_site(site: &str) -> bool {
    PANIC_SITE.try_with(|slot| *slot.lock() = Some(site.to_string())).is_ok()
}

/// Fault waiting in the response extensions for the boundary.
#[derive(Clone)]
struct RaisedFault(Arc<Fault>);

impl IntoResponse for Fault {
    /// Without [`error_boundary`] this is a bare 500 with no body, so nothing
    /// leaks when a route is mounted outside the boundary.
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(RaisedFault(Arc::new(self)));
        response
    }
}

impl Fault {
    /// Reply for this fault under `policy`.
    pub fn render(&self, policy: &ErrorPolicy) -> ErrorReply {
        match self {
            Fault::Domain(err) => {
                let body = if policy.suppress_server_errors {
                    err.to_suppressed_json()
                } else {
                    err.to_json()
                };
                ErrorReply { status: StatusCode::BAD_REQUEST, body }
            },
            _ if policy.suppress_server_errors => {
                let message = match self {
                    Fault::Database { .. } => GENERIC_DATABASE_MESSAGE,
                    _ => GENERIC_SERVER_MESSAGE,
                };
                ErrorReply {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: json!({ "message": message }),
                }
            },
            _ => ErrorReply {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({ "message": self.to_string(), "trace": self.trace() }),
            },
        }
    }
}

/// Middleware replacing any response that carries a fault with its rendered reply.
pub async fn error_boundary(
    State(policy): State<ErrorPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let panic_site = Arc::new(Mutex::new(None));
    let mut response = PANIC_SITE.scope(panic_site.clone(), next.run(request)).await;
    let Some(RaisedFault(fault)) = response.extensions_mut().remove::<RaisedFault>() else {
        return response;
    };

    // Every fault is recorded, whatever the client ends up seeing
    match panic_site.lock().take() {
        Some(site) => tracing::error!(
            method = %method,
            path = %path,
            category = fault.category(),
            panic.site = %site,
            "Request failed: {}",
            fault
        ),
        None => tracing::error!(
            method = %method,
            path = %path,
            category = fault.category(),
            "Request failed: {}",
            fault
        ),
    }

    fault.render(&policy).into_response()
}

/// Wraps every route of `router` in the panic catcher and the error boundary.
pub fn with_error_boundary<S>(router: Router<S>, policy: ErrorPolicy) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(|payload: Box<dyn std::any::Any + Send + 'static>| {
            Fault::from_panic(payload).into_response()
        }))
        .layer(middleware::from_fn_with_state(policy, error_boundary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database,
        error::{ErrorCode, GENERIC_PARAMETER_MESSAGE, GiveError},
    };

    const SUPPRESS: ErrorPolicy = ErrorPolicy { suppress_server_errors: true };
    const VERBOSE: ErrorPolicy = ErrorPolicy { suppress_server_errors: false };

    fn database_fault() -> Fault {
        Fault::from(sqlx::Error::Protocol("secret driver detail".to_string()))
    }

    #[test]
    fn test_domain_error_verbose() {
        let fault = Fault::from(GiveError::new("Table knownGene not ready", ErrorCode::TableNotReady));
        let reply = fault.render(&VERBOSE);

        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["message"], "Table knownGene not ready");
        assert_eq!(reply.body["code"], 100);
        assert_eq!(reply.body["userInputRelated"], false);
    }

    #[test]
    fn test_user_input_error_survives_suppression() {
        let fault = Fault::from(GiveError::user_input("No reference named hg99", ErrorCode::NoRefNamed));
        let reply = fault.render(&SUPPRESS);

        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["code"], 10);
        assert_eq!(reply.body["message"], "No reference named hg99");
    }

    #[test]
    fn test_server_side_domain_error_is_suppressed() {
        let fault = Fault::from(GiveError::new("Table knownGene not ready", ErrorCode::TableNotReady));
        let reply = fault.render(&SUPPRESS);

        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, json!({ "message": GENERIC_PARAMETER_MESSAGE }));
    }

    #[test]
    fn test_database_fault_suppressed() {
        let reply = database_fault().render(&SUPPRESS);

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body, json!({ "message": GENERIC_DATABASE_MESSAGE }));
        assert!(!reply.body.to_string().contains("secret driver detail"));
    }

    #[test]
    fn test_internal_fault_suppressed() {
        let reply = Fault::internal("cache directory missing").render(&SUPPRESS);

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body, json!({ "message": GENERIC_SERVER_MESSAGE }));
    }

    #[test]
    fn test_verbose_faults_carry_message_and_trace() {
        let reply = database_fault().render(&VERBOSE);
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body["message"].as_str().unwrap().contains("secret driver detail"));
        assert!(reply.body["trace"].is_array());

        let fault = Fault::from(
            color_eyre::eyre::eyre!("connection reset").wrap_err("failed to read bigwig header"),
        );
        let reply = fault.render(&VERBOSE);
        assert_eq!(reply.body["message"], "failed to read bigwig header");
        assert_eq!(reply.body["trace"][0], "connection reset");
    }

    #[test]
    fn test_verbose_trace_has_backtrace_frames() {
        let reply = Fault::internal("cache directory missing").render(&VERBOSE);
        let frames = reply.body["trace"].as_array().unwrap();
        assert!(!frames.is_empty());
    }

    #[test]
    fn test_panic_site_needs_active_boundary() {
        assert!(!record_panic_site("src/tracks.rs:10:5"));
    }

    #[tokio::test]
    async fn test_panic_site_recorded_inside_scope() {
        let slot = Arc::new(Mutex::new(None));
        let recorded =
            PANIC_SITE.scope(slot.clone(), async { record_panic_site("src/tracks.rs:10:5") }).await;

        assert!(recorded);
        assert_eq!(slot.lock().as_deref(), Some("src/tracks.rs:10:5"));
    }

    #[test]
    fn test_invalid_schema_is_a_database_fault() {
        let fault = Fault::from(database::Error::InvalidSchemaName("a b".to_string()));
        assert_eq!(fault.render(&SUPPRESS).body["message"], GENERIC_DATABASE_MESSAGE);
    }

    #[test]
    fn test_fault_outside_boundary_is_bare_500() {
        let response = Fault::internal("unrendered").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(axum::http::header::CONTENT_TYPE).is_none());
    }
}
