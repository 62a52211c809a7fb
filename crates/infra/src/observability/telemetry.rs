use std::sync::atomic::{AtomicU64, Ordering};

use credcache_core::TelemetryReporter;
use credcache_domain::MicrosoftAccountType;
use tracing::info;

/// Point-in-time copy of the reporter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub logins: u64,
    pub login_failures: u64,
    pub logouts: u64,
    pub logout_failures: u64,
    pub msa_accounts: u64,
    pub aad_accounts: u64,
}

/// [`TelemetryReporter`] that emits `tracing` events under the
/// `credcache::telemetry` target.
///
/// Scopes are logged; usernames and tokens never reach this sink.
#[derive(Debug, Default)]
pub struct TracingTelemetryReporter {
    logins: AtomicU64,
    login_failures: AtomicU64,
    logouts: AtomicU64,
    logout_failures: AtomicU64,
    msa_accounts: AtomicU64,
    aad_accounts: AtomicU64,
}

impl TracingTelemetryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            logins: self.logins.load(Ordering::Relaxed),
            login_failures: self.login_failures.load(Ordering::Relaxed),
            logouts: self.logouts.load(Ordering::Relaxed),
            logout_failures: self.logout_failures.load(Ordering::Relaxed),
            msa_accounts: self.msa_accounts.load(Ordering::Relaxed),
            aad_accounts: self.aad_accounts.load(Ordering::Relaxed),
        }
    }
}

impl TelemetryReporter for TracingTelemetryReporter {
    fn send_login_event(&self, scopes: &[String]) {
        self.logins.fetch_add(1, Ordering::Relaxed);
        info!(target: "credcache::telemetry", event = "login", scopes = ?scopes);
    }

    fn send_login_failed_event(&self) {
        self.login_failures.fetch_add(1, Ordering::Relaxed);
        info!(target: "credcache::telemetry", event = "loginFailed");
    }

    fn send_logout_event(&self) {
        self.logouts.fetch_add(1, Ordering::Relaxed);
        info!(target: "credcache::telemetry", event = "logout");
    }

    fn send_logout_failed_event(&self) {
        self.logout_failures.fetch_add(1, Ordering::Relaxed);
        info!(target: "credcache::telemetry", event = "logoutFailed");
    }

    fn send_account_event(&self, scopes: &[String], account_type: MicrosoftAccountType) {
        let counter = match account_type {
            MicrosoftAccountType::Msa => &self.msa_accounts,
            MicrosoftAccountType::Aad => &self.aad_accounts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "credcache::telemetry",
            event = "account",
            account_type = %account_type,
            scopes = ?scopes
        );
    }
}
