//! Sign-in flow as an explicit state machine
//!
//! Interactive sign-in can take up to three attempts: an optional silent
//! attempt for a known account, the primary interactive flow, and a single
//! fallback through the host-delivered redirect. Each attempt ends in a
//! [`StageOutcome`] and [`SignInStage::next`] decides where to go from there.

use credcache_domain::{impl_label_conversions, CredCacheError};

/// Where a sign-in currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignInStage {
    /// Try the cache or a refresh token for the requested account.
    SilentAttempt,
    /// Primary interactive flow (local loopback server or native broker).
    BrokerInteractive,
    /// Interactive flow through the host's URI handler.
    LoopbackFallback,
    Succeeded,
    Failed,
}

impl_label_conversions!(SignInStage {
    SilentAttempt => "silent_attempt",
    BrokerInteractive => "broker_interactive",
    LoopbackFallback => "loopback_fallback",
    Succeeded => "succeeded",
    Failed => "failed",
});

/// Result of running one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// The user or caller cancelled; `fallback_accepted` records whether the
    /// user agreed to try the alternate flow.
    Cancelled { fallback_accepted: bool },
    /// The identity provider rejected the request.
    ServerError,
    OtherError,
}

impl StageOutcome {
    /// Classify a failed attempt. Cancellation needs the prompt answer, so
    /// it is not handled here.
    pub fn from_error(err: &CredCacheError) -> Self {
        if err.is_server_error() {
            Self::ServerError
        } else {
            Self::OtherError
        }
    }
}

impl SignInStage {
    pub fn initial(silent_first: bool, has_account: bool) -> Self {
        if silent_first && has_account {
            Self::SilentAttempt
        } else {
            Self::BrokerInteractive
        }
    }

    /// Transition on `outcome`. Terminal stages stay where they are.
    pub fn next(self, outcome: StageOutcome) -> Self {
        use StageOutcome::*;
        match (self, outcome) {
            (Self::Succeeded, _) | (Self::Failed, _) => self,
            (_, Success) => Self::Succeeded,

            (Self::SilentAttempt, _) => Self::BrokerInteractive,

            (Self::BrokerInteractive, Cancelled { fallback_accepted: true }) => {
                Self::LoopbackFallback
            }
            (Self::BrokerInteractive, Cancelled { fallback_accepted: false }) => Self::Failed,
            (Self::BrokerInteractive, ServerError) => Self::Failed,
            (Self::BrokerInteractive, OtherError) => Self::LoopbackFallback,

            (Self::LoopbackFallback, _) => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}
