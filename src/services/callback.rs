//! OAuth callback state machine.
//!
//! ARCHITECTURE
//! ============
//! The provider redirects the browser to `/auth/callback` with either a
//! `code` or an `error`. From there the flow is:
//!
//! ```text
//! Received ──> Exchanging ──> AwaitingSession{1..N} ──> Provisioning ──> Complete
//!    │             │                 │                       │
//!    └─────────────┴─────────────────┴───────────────────────┴──> Failed
//! ```
//!
//! `AwaitingSession` covers the window where the provider has issued tokens
//! but its user endpoint does not yet recognise them. Retryable failures are
//! polled a bounded number of times with a fixed interval.
//!
//! DESIGN
//! ======
//! Each step owns the data it needs, so `advance` is a pure transition plus
//! at most one provider call. The route drives the machine with [`run`] and
//! only looks at the terminal step.

use tracing::{debug, info, warn};

use crate::frame::ErrorCode;
use crate::services::profile::{self, AuthFlow};
use crate::state::AppState;
use crate::supabase::{ProviderSession, ProviderUser};

// =============================================================================
// TYPES
// =============================================================================

/// Query string the provider appends to the callback URL.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A signed-in user, ready for a local session.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub session: ProviderSession,
    pub user: ProviderUser,
    pub flow: AuthFlow,
}

/// Why the callback could not complete. `message()` is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackFailure {
    #[error("provider denied sign-in: {error}")]
    ProviderDenied { error: String, description: Option<String> },

    #[error("callback without authorization code")]
    MissingCode,

    #[error("callback without PKCE verifier cookie")]
    MissingVerifier,

    #[error("code exchange failed: {0}")]
    Exchange(String),

    #[error("session not available after {attempts} attempts: {reason}")]
    SessionUnavailable { attempts: u32, reason: String },

    #[error("profile provisioning failed: {0}")]
    Provisioning(String),
}

impl CallbackFailure {
    /// User-facing explanation.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ProviderDenied { description: Some(d), .. } if !d.trim().is_empty() => {
                format!("Sign in failed: {d}")
            }
            Self::ProviderDenied { .. } => "Sign in was cancelled or denied.".into(),
            Self::MissingCode => "Sign in failed: no authorization code was returned.".into(),
            Self::MissingVerifier => "Your sign in attempt expired. Please try again.".into(),
            Self::Exchange(_) => "Sign in failed: the authorization code could not be verified.".into(),
            Self::SessionUnavailable { .. } => "Sign in failed: your session could not be established.".into(),
            Self::Provisioning(_) => "Sign in failed: your profile could not be created.".into(),
        }
    }
}

impl ErrorCode for CallbackFailure {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ProviderDenied { .. } => "E_PROVIDER_DENIED",
            Self::MissingCode => "E_MISSING_CODE",
            Self::MissingVerifier => "E_MISSING_VERIFIER",
            Self::Exchange(_) => "E_CODE_EXCHANGE",
            Self::SessionUnavailable { .. } => "E_SESSION_UNAVAILABLE",
            Self::Provisioning(_) => "E_PROVISIONING",
        }
    }
}

/// One state of the callback flow.
#[derive(Debug, Clone)]
pub enum CallbackStep {
    Received { params: CallbackParams, verifier: Option<String> },
    Exchanging { code: String, verifier: String },
    /// `attempt` is 1-based.
    AwaitingSession { session: ProviderSession, attempt: u32 },
    Provisioning { session: ProviderSession, user: ProviderUser },
    Complete(CallbackOutcome),
    Failed(CallbackFailure),
}

impl CallbackStep {
    #[must_use]
    pub fn start(params: CallbackParams, verifier: Option<String>) -> Self {
        Self::Received { params, verifier }
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Received { .. } => "received",
            Self::Exchanging { .. } => "exchanging",
            Self::AwaitingSession { .. } => "awaiting_session",
            Self::Provisioning { .. } => "provisioning",
            Self::Complete(_) => "complete",
            Self::Failed(_) => "failed",
        }
    }

    /// Perform one transition. Terminal steps return themselves.
    pub async fn advance(self, state: &AppState) -> Self {
        match self {
            Self::Received { params, verifier } => receive(params, verifier),
            Self::Exchanging { code, verifier } => match state.auth.exchange_code(&code, &verifier).await {
                Ok(session) => Self::AwaitingSession { session, attempt: 1 },
                Err(e) => Self::Failed(CallbackFailure::Exchange(e.to_string())),
            },
            Self::AwaitingSession { session, attempt } => await_session(state, session, attempt).await,
            Self::Provisioning { session, user } => {
                match profile::ensure_profile(state.tables.as_ref(), &session.access_token, &user).await {
                    Ok(flow) => Self::Complete(CallbackOutcome { session, user, flow }),
                    Err(e) => Self::Failed(CallbackFailure::Provisioning(e.to_string())),
                }
            }
            terminal @ (Self::Complete(_) | Self::Failed(_)) => terminal,
        }
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

fn receive(params: CallbackParams, verifier: Option<String>) -> CallbackStep {
    if let Some(error) = params.error {
        return CallbackStep::Failed(CallbackFailure::ProviderDenied { error, description: params.error_description });
    }
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return CallbackStep::Failed(CallbackFailure::MissingCode);
    };
    let Some(verifier) = verifier.filter(|v| !v.is_empty()) else {
        return CallbackStep::Failed(CallbackFailure::MissingVerifier);
    };
    CallbackStep::Exchanging { code, verifier }
}

async fn await_session(state: &AppState, session: ProviderSession, attempt: u32) -> CallbackStep {
    let max_attempts = state.config.callback.poll_attempts.max(1);
    match state.auth.fetch_user(&session.access_token).await {
        Ok(user) => CallbackStep::Provisioning { session, user },
        Err(e) if e.retryable() && attempt < max_attempts => {
            warn!(attempt, error = %e, "callback: session not ready, polling");
            tokio::time::sleep(state.config.callback.poll_interval).await;
            CallbackStep::AwaitingSession { session, attempt: attempt + 1 }
        }
        Err(e) => CallbackStep::Failed(CallbackFailure::SessionUnavailable { attempts: attempt, reason: e.to_string() }),
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Drive the callback from the provider redirect to a terminal step.
///
/// # Errors
///
/// Returns the failure that stopped the flow.
pub async fn run(
    state: &AppState,
    params: CallbackParams,
    verifier: Option<String>,
) -> Result<CallbackOutcome, CallbackFailure> {
    let mut step = CallbackStep::start(params, verifier);
    loop {
        step = match step {
            CallbackStep::Complete(outcome) => {
                info!(user_id = %outcome.user.id, flow = outcome.flow.as_str(), "callback: signed in");
                return Ok(outcome);
            }
            CallbackStep::Failed(failure) => {
                warn!(code = failure.error_code(), error = %failure, "callback: sign-in failed");
                return Err(failure);
            }
            pending => {
                debug!(step = pending.name(), "callback: advancing");
                pending.advance(state).await
            }
        };
    }
}

#[cfg(test)]
#[path = "callback_test.rs"]
mod tests;
