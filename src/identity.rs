use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::core::{app_error::AppError, app_state::AppState};

/// Claims embedded in the storefront's bearer tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    pub exp: usize,
}

/// The user identity resolved before a handler runs: a verified token
/// claim, or the explicit `user_id` query parameter. Mutating endpoints may
/// additionally carry `user_id` in the body; handlers fold that in through
/// [`Identity::resolve`].
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub Option<i32>);

impl Identity {
    pub fn resolve(self, body_user_id: Option<i32>) -> Result<i32, AppError> {
        self.0
            .or(body_user_id)
            .ok_or_else(|| AppError::BadRequest("No user identity supplied".into()))
    }
}

/// Middleware that resolves the request identity and inserts it as an
/// extension. A presented token must verify; it does not fall back to the
/// query parameter on failure.
pub async fn authorization(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match bearer_token(req.headers()) {
        Some(token) => {
            let secret = state
                .config
                .jwt_secret
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("JWT_SECRET is not configured"))?;
            Identity(Some(verify_token(token, secret)?.user_id))
        }
        None => Identity(user_id_from_query(req.uri().query())),
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => AppError::Unauthorized,
        _ => AppError::TokenInvalid,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn user_id_from_query(query: Option<&str>) -> Option<i32> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "user_id" { value.parse().ok() } else { None }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn token_with_exp(exp: usize) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &Claims { user_id: 42, exp },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> usize {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as usize
    }

    #[test]
    fn valid_token_yields_claims() {
        let token = token_with_exp(now() + 3600);
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, 42);
    }

    #[test]
    fn expired_token_is_unauthorized() {
        // Well past the default validation leeway.
        let token = token_with_exp(now() - 3600);
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn garbage_token_is_invalid_not_unauthorized() {
        assert!(matches!(
            verify_token("not-a-jwt", SECRET),
            Err(AppError::TokenInvalid)
        ));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = token_with_exp(now() + 3600);
        assert!(matches!(
            verify_token(&token, "other-secret"),
            Err(AppError::TokenInvalid)
        ));
    }

    #[test]
    fn bearer_token_requires_the_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn user_id_comes_from_the_query_string() {
        assert_eq!(user_id_from_query(Some("user_id=7&x=1")), Some(7));
        assert_eq!(user_id_from_query(Some("x=1")), None);
        assert_eq!(user_id_from_query(Some("user_id=abc")), None);
        assert_eq!(user_id_from_query(None), None);
    }

    #[test]
    fn resolve_prefers_the_request_identity_over_the_body() {
        assert_eq!(Identity(Some(1)).resolve(Some(2)).unwrap(), 1);
        assert_eq!(Identity(None).resolve(Some(2)).unwrap(), 2);
        assert!(matches!(
            Identity(None).resolve(None),
            Err(AppError::BadRequest(_))
        ));
    }
}
