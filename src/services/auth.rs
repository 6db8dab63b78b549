//! Sign-in service — PKCE verifier generation and the provider redirect.
//!
//! The verifier is kept in a short-lived HttpOnly cookie between
//! `/auth/signin` and `/auth/callback`; only its S256 challenge ever reaches
//! the provider.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::state::AppState;

/// Random bytes behind a verifier. 48 bytes encode to 64 base64url chars.
const VERIFIER_BYTES: usize = 48;

/// Generate a fresh PKCE code verifier.
#[must_use]
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// A pending sign-in: where to send the browser and what to remember.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub verifier: String,
    pub redirect_url: String,
}

/// Start a sign-in with the configured OAuth provider.
#[must_use]
pub fn begin_sign_in(state: &AppState) -> SignIn {
    let verifier = generate_verifier();
    let redirect_url = state.auth.authorize_url(
        &state.config.oauth_provider,
        &state.config.callback_url(),
        &code_challenge(&verifier),
    );
    SignIn { verifier, redirect_url }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
