// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Login tokens: a JSON claim set signed with HMAC-SHA256. Wire form is
//! `base64url(payload) "." base64url(mac)`. Verification is constant-time
//! through the MAC comparison and rejects expired tokens.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Development fallback; production deployments configure their own secret.
pub const DEFAULT_SECRET: &str = "6c80a82e65d74ab6a68a0b8a0ac0s6a1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub account: String,
    pub app: String,
    /// Unix seconds after which the token is rejected.
    pub exp: i64,
}

impl Token {
    pub fn new(account: &str, app: &str, exp: i64) -> Self {
        Self { account: account.to_string(), app: app.to_string(), exp }
    }
}

fn sign(secret: &str, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts any key size"),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Serializes and signs a token.
pub fn generate(secret: &str, token: &Token) -> Result<String, TokenError> {
    let payload = serde_json::to_vec(token).map_err(|_| TokenError::Malformed)?;
    let mac = sign(secret, &payload);
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(&mac)
    ))
}

/// Verifies the MAC (constant-time) and expiry, then returns the claims.
pub fn parse(secret: &str, token: &str) -> Result<Token, TokenError> {
    let (payload_b64, mac_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed)?;
    let mac = URL_SAFE_NO_PAD
        .decode(mac_b64)
        .map_err(|_| TokenError::Malformed)?;

    let mut verifier = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts any key size"),
    };
    verifier.update(&payload);
    verifier
        .verify_slice(&mac)
        .map_err(|_| TokenError::BadSignature)?;

    let claims: Token =
        serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
    if claims.exp <= chrono::Utc::now().timestamp() {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}
