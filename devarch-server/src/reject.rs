use serde::Serialize;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use devarch_core::{Error, ErrorKind};

/// Carrier that moves a core error through warp's rejection machinery.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl warp::reject::Reject for ApiError {}

pub fn reject(err: Error) -> Rejection {
    warp::reject::custom(ApiError(err))
}

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::PlanStale => StatusCode::CONFLICT,
        ErrorKind::StackBusy => StatusCode::LOCKED,
        ErrorKind::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::PermissionDenied | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Final rejection handler: every error leaves the process as
/// `{kind, message, field?, suggestion?}`.
pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(ApiError(err)) = rejection.find::<ApiError>() {
        if err.kind == ErrorKind::Internal {
            tracing::error!(error = %err, cause = ?err.cause(), "internal error");
        }
        let body = ErrorBody {
            kind: err.kind,
            message: err.message.clone(),
            field: err.field.clone(),
            suggestion: err.suggestion.clone(),
        };
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            status_for(err.kind),
        ));
    }

    if rejection.is_not_found() {
        let body = ErrorBody {
            kind: ErrorKind::NotFound,
            message: "no such route".to_string(),
            field: None,
            suggestion: None,
        };
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::NOT_FOUND,
        ));
    }

    if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        let body = ErrorBody {
            kind: ErrorKind::Validation,
            message: "request body does not match the expected shape".to_string(),
            field: None,
            suggestion: None,
        };
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::BAD_REQUEST,
        ));
    }

    if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        let body = ErrorBody {
            kind: ErrorKind::Validation,
            message: "method not allowed".to_string(),
            field: None,
            suggestion: None,
        };
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            StatusCode::METHOD_NOT_ALLOWED,
        ));
    }

    Err(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_wire_contract() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::PlanStale), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::StackBusy), StatusCode::LOCKED);
        assert_eq!(
            status_for(ErrorKind::EngineUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }
}
