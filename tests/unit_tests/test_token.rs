// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use im_mesh_rs::token::{Token, TokenError, generate, parse};

const SECRET: &str = "unit-test-secret";

fn fresh_token() -> Token {
    Token::new("alice", "im", chrono::Utc::now().timestamp() + 3600)
}

#[test]
fn test_token_round_trip() -> Result<()> {
    let token = fresh_token();
    let signed = generate(SECRET, &token)?;
    let parsed = parse(SECRET, &signed)?;
    assert_eq!(parsed, token);
    Ok(())
}

#[test]
fn test_wrong_secret_is_rejected() -> Result<()> {
    let signed = generate(SECRET, &fresh_token())?;
    let err = parse("other-secret", &signed).expect_err("must fail");
    assert_eq!(err, TokenError::BadSignature);
    Ok(())
}

#[test]
fn test_tampered_payload_is_rejected() -> Result<()> {
    let signed = generate(SECRET, &fresh_token())?;
    // flip a character inside the base64 payload
    let mut bytes = signed.into_bytes();
    bytes[3] = if bytes[3] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes)?;

    assert!(parse(SECRET, &tampered).is_err());
    Ok(())
}

#[test]
fn test_expired_token_is_rejected() -> Result<()> {
    let token = Token::new("alice", "im", chrono::Utc::now().timestamp() - 1);
    let signed = generate(SECRET, &token)?;
    let err = parse(SECRET, &signed).expect_err("must fail");
    assert_eq!(err, TokenError::Expired);
    Ok(())
}

#[test]
fn test_garbage_is_malformed() {
    assert_eq!(parse(SECRET, "not-a-token"), Err(TokenError::Malformed));
    assert_eq!(parse(SECRET, "a.b"), Err(TokenError::Malformed));
}
