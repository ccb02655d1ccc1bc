use super::server::ApiState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Auth settings for the boundary: token-signing secret plus the role
/// allow-list checked against the caller's account record.
#[derive(Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub allowed_roles: Vec<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("secret", &"[redacted]")
            .field("allowed_roles", &self.allowed_roles)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Caller's account id.
    pub sub: String,
    /// Expiry as a unix timestamp.
    pub exp: i64,
}

fn mac_for(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length")
}

/// Issues a `<payload>.<signature>` bearer token: base64url JSON claims
/// signed with HMAC-SHA256.
pub fn sign_token(secret: &str, sub: &str, exp: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&Claims {
            sub: sub.to_string(),
            exp,
        })
        .expect("claims always serialize"),
    );
    let mut mac = mac_for(secret);
    mac.update(payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{payload}.{signature}")
}

/// Verifies signature and expiry; returns the claims on success.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    let (payload, signature) = token.split_once('.')?;
    let sig_bytes = URL_SAFE_NO_PAD.decode(signature).ok()?;
    let mut mac = mac_for(secret);
    mac.update(payload.as_bytes());
    mac.verify_slice(&sig_bytes).ok()?;

    let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
    if claims.exp < Utc::now().timestamp() {
        return None;
    }
    Some(claims)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolves the caller's account id from the request headers, or the status
/// code to reject with: 401 for a missing/invalid/expired token, 403 for an
/// unapproved account or a role outside the allow-list.
pub async fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<String, StatusCode> {
    // No secret configured means no caller can be verified (fail-closed).
    if state.auth.secret.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let token = bearer(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = verify_token(&state.auth.secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    let account = state
        .backend
        .get_account(&claims.sub)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    match account {
        Some(account)
            if account.approved && state.auth.allowed_roles.iter().any(|r| *r == account.role) =>
        {
            Ok(claims.sub)
        }
        _ => Err(StatusCode::FORBIDDEN),
    }
}

/// Middleware that gates every session route behind the bearer token check
/// and the account approval/role gate.
pub async fn auth_middleware(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&state, request.headers()).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::ApiState;
    use crate::creds::CredentialStore;
    use crate::ingest::IngestionPipeline;
    use crate::media::{InMemoryObjectStore, MediaTransfer};
    use crate::session::{ReconnectPolicy, SessionManager};
    use crate::store::InMemoryBackend;
    use crate::sync::{ContactSync, SyncSettings};
    use crate::transport::scripted::ScriptedTransportFactory;
    use crate::types::AccountRecord;
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with(backend: Arc<InMemoryBackend>) -> ApiState {
        let creds = Arc::new(CredentialStore::new(
            std::env::temp_dir().join("wa-sessiond-auth-test"),
            backend.clone(),
        ));
        let media = Arc::new(MediaTransfer::new(Arc::new(InMemoryObjectStore::new())));
        let pipeline = Arc::new(IngestionPipeline::new(backend.clone(), media, 90, 100));
        let sync = Arc::new(ContactSync::new(backend.clone(), SyncSettings::default()));
        let manager = SessionManager::new(
            backend.clone(),
            Arc::new(ScriptedTransportFactory::new()),
            creds,
            pipeline,
            sync,
            ReconnectPolicy::default(),
            Duration::from_secs(30),
        );
        ApiState {
            manager,
            backend,
            auth: AuthSettings {
                secret: "test-secret".to_string(),
                allowed_roles: vec!["admin".to_string()],
            },
        }
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn sign_verify_roundtrip() {
        let exp = Utc::now().timestamp() + 3600;
        let token = sign_token("secret", "staff-1", exp);
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "staff-1");
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn tampered_or_expired_tokens_fail() {
        let exp = Utc::now().timestamp() + 3600;
        let token = sign_token("secret", "staff-1", exp);
        assert!(verify_token("other-secret", &token).is_none());
        assert!(verify_token("secret", &format!("{token}x")).is_none());

        let expired = sign_token("secret", "staff-1", Utc::now().timestamp() - 10);
        assert!(verify_token("secret", &expired).is_none());
    }

    #[tokio::test]
    async fn approved_admin_passes_gate() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.put_account(AccountRecord {
            staff_id: "staff-1".to_string(),
            approved: true,
            role: "admin".to_string(),
        });
        let state = state_with(backend);
        let token = sign_token("test-secret", "staff-1", Utc::now().timestamp() + 60);
        let sub = authorize(&state, &headers_with(&token)).await.unwrap();
        assert_eq!(sub, "staff-1");
    }

    #[tokio::test]
    async fn unapproved_or_wrong_role_gets_403() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.put_account(AccountRecord {
            staff_id: "pending".to_string(),
            approved: false,
            role: "admin".to_string(),
        });
        backend.put_account(AccountRecord {
            staff_id: "staffer".to_string(),
            approved: true,
            role: "staff".to_string(),
        });
        let state = state_with(backend);

        for sub in ["pending", "staffer", "unknown"] {
            let token = sign_token("test-secret", sub, Utc::now().timestamp() + 60);
            assert_eq!(
                authorize(&state, &headers_with(&token)).await,
                Err(StatusCode::FORBIDDEN),
                "{sub} should be forbidden"
            );
        }
    }

    #[tokio::test]
    async fn missing_token_gets_401() {
        let state = state_with(Arc::new(InMemoryBackend::new()));
        assert_eq!(
            authorize(&state, &HeaderMap::new()).await,
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
