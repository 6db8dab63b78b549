//! Auth endpoints — authorize URL, PKCE code exchange, refresh, user, logout.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use super::{AuthApi, ProviderSession, ProviderUser, SupabaseClient, SupabaseError, check_status, read_json, send};

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl TokenResponse {
    /// Prefer the absolute expiry; fall back to `now + expires_in`.
    pub(crate) fn into_session(self, now: i64) -> ProviderSession {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| now + self.expires_in.unwrap_or(3600));
        ProviderSession { access_token: self.access_token, refresh_token: self.refresh_token, expires_at }
    }
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[async_trait]
impl AuthApi for SupabaseClient {
    fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String {
        let base = self.endpoint("/auth/v1/authorize");
        let Ok(mut url) = url::Url::parse(&base) else {
            return base;
        };
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        url.into()
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<ProviderSession, SupabaseError> {
        let resp = send(
            self.request(Method::POST, "/auth/v1/token")
                .query(&[("grant_type", "pkce")])
                .json(&serde_json::json!({
                    "auth_code": code,
                    "code_verifier": code_verifier,
                })),
        )
        .await?;
        let token: TokenResponse = read_json(resp).await?;
        Ok(token.into_session(unix_now()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, SupabaseError> {
        let resp = send(
            self.request(Method::POST, "/auth/v1/token")
                .query(&[("grant_type", "refresh_token")])
                .json(&serde_json::json!({ "refresh_token": refresh_token })),
        )
        .await?;
        let token: TokenResponse = read_json(resp).await?;
        Ok(token.into_session(unix_now()))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, SupabaseError> {
        let resp = send(self.authed(Method::GET, "/auth/v1/user", access_token)).await?;
        read_json(resp).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError> {
        let resp = send(self.authed(Method::POST, "/auth/v1/logout", access_token)).await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
