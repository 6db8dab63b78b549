//! Table endpoints — bookmark and profile rows through the REST gateway.
//!
//! Every call carries the signed-in user's token, so the provider's row-level
//! security decides visibility; the `user_id` filter only narrows the query.

use async_trait::async_trait;
use reqwest::Method;
use uuid::Uuid;

use super::{ProfileInsert, SupabaseClient, SupabaseError, TableApi, check_status, read_json, send};
use crate::state::{Bookmark, NewBookmark, UserProfile};

const BOOKMARKS: &str = "/rest/v1/bookmarks";
const PROFILES: &str = "/rest/v1/profiles";

/// Postgres unique-violation code as reported by the REST gateway.
const UNIQUE_VIOLATION: &str = "23505";

#[async_trait]
impl TableApi for SupabaseClient {
    async fn list_bookmarks(&self, access_token: &str, user_id: Uuid) -> Result<Vec<Bookmark>, SupabaseError> {
        let resp = send(
            self.authed(Method::GET, BOOKMARKS, access_token)
                .query(&[
                    ("select", "*".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                    ("order", "created_at.desc".to_string()),
                ]),
        )
        .await?;
        read_json(resp).await
    }

    async fn insert_bookmark(&self, access_token: &str, bookmark: &NewBookmark) -> Result<Bookmark, SupabaseError> {
        let resp = send(
            self.authed(Method::POST, BOOKMARKS, access_token)
                .header("Prefer", "return=representation")
                .json(&[bookmark]),
        )
        .await?;
        let mut rows: Vec<Bookmark> = read_json(resp).await?;
        if rows.is_empty() {
            return Err(SupabaseError::Decode("insert returned no rows".into()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete_bookmark(&self, access_token: &str, id: Uuid) -> Result<bool, SupabaseError> {
        let resp = send(
            self.authed(Method::DELETE, BOOKMARKS, access_token)
                .header("Prefer", "return=representation")
                .query(&[("id", format!("eq.{id}"))]),
        )
        .await?;
        let rows: Vec<serde_json::Value> = read_json(resp).await?;
        Ok(!rows.is_empty())
    }

    async fn fetch_profile(&self, access_token: &str, user_id: Uuid) -> Result<Option<UserProfile>, SupabaseError> {
        let resp = send(
            self.authed(Method::GET, PROFILES, access_token)
                .query(&[("select", "*".to_string()), ("id", format!("eq.{user_id}"))]),
        )
        .await?;
        let mut rows: Vec<UserProfile> = read_json(resp).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    async fn insert_profile(&self, access_token: &str, profile: &UserProfile) -> Result<ProfileInsert, SupabaseError> {
        let resp = send(
            self.authed(Method::POST, PROFILES, access_token)
                .header("Prefer", "return=minimal")
                .json(profile),
        )
        .await?;
        match check_status(resp).await {
            Ok(_) => Ok(ProfileInsert::Created),
            Err(err) if is_conflict(&err) => Ok(ProfileInsert::AlreadyExists),
            Err(err) => Err(err),
        }
    }
}

/// A duplicate primary key means another request provisioned the row first.
fn is_conflict(err: &SupabaseError) -> bool {
    match err {
        SupabaseError::Api { status: 409, .. } => true,
        SupabaseError::Api { message, .. } => message.contains("duplicate key") || message.contains(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
