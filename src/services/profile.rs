//! Profile provisioning — one `profiles` row per user, created on first
//! sign-in.
//!
//! Whether the row already existed is what tells a sign-up apart from a
//! log-in. Two tabs finishing the callback at once can both see "missing";
//! the loser's insert reports `AlreadyExists` and is treated as a log-in.

use tracing::info;

use crate::state::UserProfile;
use crate::supabase::{ProfileInsert, ProviderUser, SupabaseError, TableApi};

/// Which way the user arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    SignUp,
    LogIn,
}

impl AuthFlow {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignUp => "sign_up",
            Self::LogIn => "log_in",
        }
    }
}

/// Profile row copied from the provider identity.
#[must_use]
pub fn profile_from_user(user: &ProviderUser) -> UserProfile {
    UserProfile {
        id: user.id,
        email: user.email.clone(),
        full_name: user
            .user_metadata
            .full_name
            .clone()
            .or_else(|| user.user_metadata.name.clone()),
        avatar_url: user.user_metadata.avatar_url.clone(),
    }
}

/// Make sure `user` has a profile row and report which flow this was.
///
/// # Errors
///
/// Returns the storage error if the lookup or insert fails.
pub async fn ensure_profile(
    tables: &dyn TableApi,
    access_token: &str,
    user: &ProviderUser,
) -> Result<AuthFlow, SupabaseError> {
    if tables.fetch_profile(access_token, user.id).await?.is_some() {
        return Ok(AuthFlow::LogIn);
    }

    match tables
        .insert_profile(access_token, &profile_from_user(user))
        .await?
    {
        ProfileInsert::Created => {
            info!(user_id = %user.id, "profile created");
            Ok(AuthFlow::SignUp)
        }
        ProfileInsert::AlreadyExists => {
            info!(user_id = %user.id, "profile inserted concurrently; treating as log-in");
            Ok(AuthFlow::LogIn)
        }
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
