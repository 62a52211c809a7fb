//! Account change events

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::account::AccountInfo;

/// Accounts added, changed or deleted by one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsChangeEvent {
    pub added: Vec<AccountInfo>,
    pub changed: Vec<AccountInfo>,
    pub deleted: Vec<AccountInfo>,
}

impl AccountsChangeEvent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn added(accounts: Vec<AccountInfo>) -> Self {
        Self { added: accounts, ..Self::default() }
    }

    pub fn changed(accounts: Vec<AccountInfo>) -> Self {
        Self { changed: accounts, ..Self::default() }
    }

    pub fn deleted(accounts: Vec<AccountInfo>) -> Self {
        Self { deleted: accounts, ..Self::default() }
    }

    /// Merge a burst of events into one.
    ///
    /// Each list is concatenated in order then deduplicated by
    /// `home_account_id`: the last record for an id wins and keeps the
    /// position where the id was first seen.
    #[must_use]
    pub fn merge(events: Vec<Self>) -> Self {
        let mut added = Vec::new();
        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        for event in events {
            added.extend(event.added);
            changed.extend(event.changed);
            deleted.extend(event.deleted);
        }
        Self { added: dedupe(added), changed: dedupe(changed), deleted: dedupe(deleted) }
    }
}

fn dedupe(accounts: Vec<AccountInfo>) -> Vec<AccountInfo> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<AccountInfo> = Vec::with_capacity(accounts.len());
    for account in accounts {
        match position.get(&account.home_account_id) {
            Some(&index) => out[index] = account,
            None => {
                position.insert(account.home_account_id.clone(), out.len());
                out.push(account);
            }
        }
    }
    out
}
