//! Status-code mapping and propagation helpers shared by every HTTP caller

use crate::error::{ReplicationError, Result};
use reqwest::{Response, StatusCode};

/// Maps upstream HTTP failures onto [`ReplicationError`] kinds
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Builds the error for a non-2xx status and its (already drained) body
    pub fn from_status(status: StatusCode, body: &str) -> ReplicationError {
        let message = format!("http status code: {}, body: {}", status.as_u16(), body);
        match status.as_u16() {
            401 => ReplicationError::Unauthorized(message),
            403 => ReplicationError::Forbidden(message),
            404 => ReplicationError::NotFound(message),
            409 => ReplicationError::Conflict(message),
            _ => ReplicationError::Protocol(message),
        }
    }

    /// Drains the body of a failed response and converts it into an error
    pub async fn from_response(response: Response) -> ReplicationError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Self::from_status(status, &body)
    }

    /// Passes 2xx responses through and turns everything else into an error
    pub async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::from_response(response).await)
        }
    }

    /// Token services report their own failures; anything unmapped is a general error
    pub fn token_error(status: StatusCode, body: &str) -> ReplicationError {
        match status.as_u16() {
            401 => ReplicationError::Unauthorized(format!("failed to fetch token: {}", body)),
            403 => ReplicationError::Forbidden(format!("failed to fetch token: {}", body)),
            _ => ReplicationError::Protocol(format!(
                "failed to fetch token, http status code: {}, body: {}",
                status.as_u16(),
                body
            )),
        }
    }
}

/// Create-if-absent paths treat "already exists" as success
pub fn ignore_conflict(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

/// Existence checks report a missing resource as `None`
pub fn absent_on_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (409, ErrorKind::Conflict),
            (500, ErrorKind::Protocol),
            (429, ErrorKind::Protocol),
        ];
        for (code, kind) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(HttpErrorHandler::from_status(status, "body").kind(), kind, "status {}", code);
        }
    }

    #[test]
    fn test_message_carries_body() {
        let err = HttpErrorHandler::from_status(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.to_string(), "protocol error: http status code: 502, body: upstream down");
    }

    #[test]
    fn test_token_error_mapping() {
        assert_eq!(
            HttpErrorHandler::token_error(StatusCode::UNAUTHORIZED, "").kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            HttpErrorHandler::token_error(StatusCode::FORBIDDEN, "").kind(),
            ErrorKind::Forbidden
        );
        // 404 from a token service is not a missing artifact
        assert_eq!(
            HttpErrorHandler::token_error(StatusCode::NOT_FOUND, "").kind(),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn test_propagation_helpers() {
        assert!(ignore_conflict(Err(ReplicationError::Conflict("exists".into()))).is_ok());
        assert!(ignore_conflict(Err(ReplicationError::Forbidden("no".into()))).is_err());

        let absent: Result<Option<u32>> = absent_on_not_found(Err(ReplicationError::NotFound("x".into())));
        assert_eq!(absent.unwrap(), None);
        assert_eq!(absent_on_not_found(Ok(3)).unwrap(), Some(3));
        assert!(absent_on_not_found::<u32>(Err(ReplicationError::Transport("x".into()))).is_err());
    }
}
