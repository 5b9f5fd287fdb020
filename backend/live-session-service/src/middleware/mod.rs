//! Request identity helpers. The API gateway verifies JWTs and
//! re-injects the caller's identity as an X-User-Id header; this
//! service trusts that header and nothing else from the client.

use std::future::{ready, Ready};

use actix_web::{FromRequest, HttpRequest};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;

/// Authenticated caller, extracted from the gateway-injected header
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

impl FromRequest for UserId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let user_id = req
            .headers()
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok());

        ready(user_id.map(UserId).ok_or_else(|| {
            AppError::Authentication("missing or invalid X-User-Id header".to_string())
        }))
    }
}

/// Admin surface gate. Denies everything when no admin token is
/// configured rather than falling open.
pub fn require_admin(req: &HttpRequest, config: &Config) -> Result<(), AppError> {
    let expected = match config.admin_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            return Err(AppError::Forbidden(
                "admin access is not configured".to_string(),
            ))
        }
    };

    let presented = req
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok());

    if presented == Some(expected) {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin token required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn config_with_token(token: Option<&str>) -> Config {
        Config {
            admin_token: token.map(str::to_string),
            ..Config::for_tests()
        }
    }

    #[actix_rt::test]
    async fn extracts_valid_user_id() {
        let id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header(("x-user-id", id.to_string()))
            .to_http_request();
        let extracted = UserId::extract(&req).await.unwrap();
        assert_eq!(extracted.0, id);
    }

    #[actix_rt::test]
    async fn missing_header_is_an_authentication_error() {
        let req = TestRequest::default().to_http_request();
        assert!(UserId::extract(&req).await.is_err());
    }

    #[actix_rt::test]
    async fn garbage_user_id_is_rejected() {
        let req = TestRequest::default()
            .insert_header(("x-user-id", "not-a-uuid"))
            .to_http_request();
        assert!(UserId::extract(&req).await.is_err());
    }

    #[test]
    fn matching_admin_token_passes() {
        let req = TestRequest::default()
            .insert_header(("x-admin-token", "s3cret"))
            .to_http_request();
        assert!(require_admin(&req, &config_with_token(Some("s3cret"))).is_ok());
    }

    #[test]
    fn wrong_admin_token_is_forbidden() {
        let req = TestRequest::default()
            .insert_header(("x-admin-token", "wrong"))
            .to_http_request();
        assert!(require_admin(&req, &config_with_token(Some("s3cret"))).is_err());
    }

    #[test]
    fn unconfigured_admin_token_fails_closed() {
        let req = TestRequest::default()
            .insert_header(("x-admin-token", "anything"))
            .to_http_request();
        assert!(require_admin(&req, &config_with_token(None)).is_err());
        assert!(require_admin(&req, &config_with_token(Some(""))).is_err());
    }
}
