//! Session credentials.
//!
//! A credential is an HS256 JWT carrying `{sub, jti, iat, exp}`. It is accepted
//! from an `Authorization: Bearer` header or from the `token` cookie. Logging
//! out records the credential's `jti` as revoked; the record is dropped again
//! once the credential would have expired anyway.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::{debug, info, warn};

use crate::config::{
    account_email_key, account_key, account_posts_key, revoked_session_key, Config,
    REVOKED_SESSION_PREFIX, SESSION_COOKIE,
};
use crate::context::AppContext;
use crate::core::db::DocumentStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{new_id, parse_json_body, verify_password};
use crate::media::MediaHost;
use crate::models::models::{Account, PublicAccount, SessionClaims};

pub fn issue_token(config: &Config, account_id: &str) -> anyhow::Result<(String, SessionClaims)> {
    let iat = chrono::Utc::now().timestamp();
    let claims = SessionClaims {
        sub: account_id.to_string(),
        jti: new_id(),
        iat,
        exp: iat.saturating_add(config.token_expiration_hours.saturating_mul(3600)),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.session_secret.as_bytes()),
    )?;
    Ok((token, claims))
}

/// Checks signature and expiry only. See [`validate_token`] for the full check.
pub fn decode_token(config: &Config, token: &str) -> Option<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    match decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.session_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            debug!(error = %e, "rejected session credential");
            None
        }
    }
}

pub fn session_token(req: &Request) -> Option<String> {
    if let Some(auth) = req.header("Authorization").and_then(|h| h.as_str()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    let cookies = req.header("Cookie").and_then(|h| h.as_str())?;
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn verify_session<S: DocumentStore>(store: &S, config: &Config, token: &str) -> Option<SessionClaims> {
    let claims = decode_token(config, token)?;
    if store.exists(&revoked_session_key(&claims.jti)).ok()? {
        return None;
    }
    // The account may have disappeared since the token was issued.
    if !store.exists(&account_key(&claims.sub)).ok()? {
        return None;
    }
    Some(claims)
}

/// Resolves the acting account id, if the request carries a live credential.
pub fn validate_token<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Option<String> {
    let token = session_token(req)?;
    verify_session(&ctx.store, &ctx.config, &token).map(|claims| claims.sub)
}

pub fn require_session<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<String, ApiError> {
    validate_token(ctx, req).ok_or_else(ApiError::unauthorized)
}

fn session_cookie(token: &str, max_age: i64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
        SESSION_COOKIE, token, max_age
    )
}

// === Operations ===

pub struct LoginOutcome {
    pub account: Account,
    pub token: String,
    pub claims: SessionClaims,
}

pub fn login<S: DocumentStore>(
    store: &S,
    config: &Config,
    email: &str,
    password: &str,
) -> Result<LoginOutcome, ApiError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    let account = store
        .get_json::<String>(&account_email_key(&email))?
        .map(|id| store.get_json::<Account>(&account_key(&id)))
        .transpose()?
        .flatten()
        .ok_or_else(|| ApiError::not_found("User not found with this email"))?;

    if !verify_password(password, &account.password) {
        warn!(account = %account.id, "rejected login with wrong password");
        return Err(ApiError::Unauthorized("Invalid password".to_string()));
    }

    let (token, claims) = issue_token(config, &account.id)?;
    info!(account = %account.id, "session issued");
    Ok(LoginOutcome {
        account,
        token,
        claims,
    })
}

/// Revokes a presented credential. Unknown or expired credentials are ignored.
pub fn logout<S: DocumentStore>(store: &S, config: &Config, token: Option<&str>) -> anyhow::Result<()> {
    if let Some(claims) = token.and_then(|t| decode_token(config, t)) {
        store.set_json(&revoked_session_key(&claims.jti), &claims.exp)?;
        info!(account = %claims.sub, "session revoked");
    }
    let purged = purge_expired_revocations(store)?;
    if purged > 0 {
        debug!(purged, "dropped expired revocation records");
    }
    Ok(())
}

/// Drops revocation records whose credential has expired since.
fn purge_expired_revocations<S: DocumentStore>(store: &S) -> anyhow::Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let mut purged = 0;
    for key in store.keys_with_prefix(REVOKED_SESSION_PREFIX)? {
        if store.get_json::<i64>(&key)?.map_or(true, |exp| exp <= now) {
            store.delete(&key)?;
            purged += 1;
        }
    }
    Ok(purged)
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub fn login_user<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let body: LoginBody = parse_json_body(req)?;
    let outcome = login(&ctx.store, &ctx.config, &body.email, &body.password)?;

    let posts = ctx.store.members(&account_posts_key(&outcome.account.id))?;
    let resp = serde_json::json!({
        "success": true,
        "message": format!("Welcome back {}", outcome.account.firstname),
        "user": PublicAccount::new(&outcome.account, posts),
        "token": outcome.token,
    });
    let max_age = outcome.claims.exp - outcome.claims.iat;

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "application/json")
        .header("Set-Cookie", session_cookie(&outcome.token, max_age))
        .body(resp.to_string().into_bytes())
        .build())
}

pub fn logout_user<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let token = session_token(req);
    logout(&ctx.store, &ctx.config, token.as_deref())?;

    let resp = serde_json::json!({
        "success": true,
        "message": "Logged out successfully",
    });
    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "application/json")
        .header("Set-Cookie", session_cookie("", 0))
        .body(resp.to_string().into_bytes())
        .build())
}
