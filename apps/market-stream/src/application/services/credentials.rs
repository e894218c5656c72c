//! Credential Cache
//!
//! Get-or-fetch cache in front of a [`CredentialSource`]. Entries expire at
//! the earlier of the issuer's expiry and `fetched_at + ttl`; expired entries
//! are refetched on the next lookup. Errors are never cached, and
//! [`CredentialError::UnsupportedAccount`] is returned as-is without retry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{AccountSelector, Credential, CredentialError, CredentialSource};

// =============================================================================
// Static Source
// =============================================================================

/// Serves one pre-provisioned token for a single account.
pub struct StaticCredentialSource {
    account: AccountSelector,
    token: String,
}

impl StaticCredentialSource {
    /// Create a static source.
    #[must_use]
    pub fn new(account: AccountSelector, token: impl Into<String>) -> Self {
        Self {
            account,
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn fetch(&self, account: &AccountSelector) -> Result<Credential, CredentialError> {
        if *account != self.account {
            return Err(CredentialError::UnsupportedAccount(account.to_string()));
        }
        Ok(Credential::new(self.token.clone(), None))
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CachedCredential {
    credential: Credential,
    valid_until: DateTime<Utc>,
}

/// Credential cache with time-based expiry.
pub struct CredentialCache<S> {
    source: S,
    ttl: Duration,
    entries: RwLock<HashMap<AccountSelector, CachedCredential>>,
}

impl<S: CredentialSource> CredentialCache<S> {
    /// Create a cache in front of `source`.
    #[must_use]
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get a valid credential, fetching a new one if missing or expired.
    ///
    /// # Errors
    ///
    /// Returns the source's error; nothing is cached on failure.
    pub async fn get(&self, account: &AccountSelector) -> Result<Credential, CredentialError> {
        self.get_at(account, Utc::now()).await
    }

    async fn get_at(
        &self,
        account: &AccountSelector,
        now: DateTime<Utc>,
    ) -> Result<Credential, CredentialError> {
        let cached = self.entries.read().get(account).cloned();
        if let Some(cached) = cached
            && now < cached.valid_until
        {
            return Ok(cached.credential);
        }

        tracing::debug!(account = %account, "Fetching credential");
        let credential = self.source.fetch(account).await?;

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let by_ttl = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let valid_until = credential
            .expires_at()
            .map_or(by_ttl, |expires_at| expires_at.min(by_ttl));

        self.entries.write().insert(
            account.clone(),
            CachedCredential {
                credential: credential.clone(),
                valid_until,
            },
        );

        Ok(credential)
    }

    /// Drop the cached credential for `account`.
    pub fn invalidate(&self, account: &AccountSelector) {
        self.entries.write().remove(account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        fetches: Arc<AtomicUsize>,
        expires_in: Option<chrono::Duration>,
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn fetch(&self, account: &AccountSelector) -> Result<Credential, CredentialError> {
            if account.as_str() != "finnhub" {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                return Err(CredentialError::UnsupportedAccount(account.to_string()));
            }
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Credential::new(
                format!("token-{n}"),
                self.expires_in.map(|d| Utc::now() + d),
            ))
        }
    }

    fn counting_cache(
        expires_in: Option<chrono::Duration>,
    ) -> (CredentialCache<CountingSource>, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            fetches: Arc::clone(&fetches),
            expires_in,
        };
        (CredentialCache::new(source, Duration::from_secs(60)), fetches)
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let (cache, fetches) = counting_cache(None);
        let account = AccountSelector::new("finnhub");
        let now = Utc::now();

        let first = cache.get_at(&account, now).await.unwrap();
        let second = cache
            .get_at(&account, now + chrono::Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(first.token(), second.token());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_ttl() {
        let (cache, fetches) = counting_cache(None);
        let account = AccountSelector::new("finnhub");
        let now = Utc::now();

        let first = cache.get_at(&account, now).await.unwrap();
        let second = cache
            .get_at(&account, now + chrono::Duration::seconds(61))
            .await
            .unwrap();

        assert_ne!(first.token(), second.token());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn issuer_expiry_shortens_ttl() {
        let (cache, fetches) = counting_cache(Some(chrono::Duration::seconds(5)));
        let account = AccountSelector::new("finnhub");
        let now = Utc::now();

        cache.get_at(&account, now).await.unwrap();
        cache
            .get_at(&account, now + chrono::Duration::seconds(10))
            .await
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsupported_account_is_not_cached() {
        let (cache, fetches) = counting_cache(None);
        let account = AccountSelector::new("robinhood");

        let err = cache.get(&account).await.unwrap_err();
        assert!(matches!(err, CredentialError::UnsupportedAccount(_)));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.entries.read().is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let (cache, fetches) = counting_cache(None);
        let account = AccountSelector::new("finnhub");

        cache.get(&account).await.unwrap();
        cache.invalidate(&account);
        cache.get(&account).await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn static_source_rejects_other_accounts() {
        let source = StaticCredentialSource::new(AccountSelector::new("finnhub"), "abc");

        let credential = source.fetch(&AccountSelector::new("finnhub")).await.unwrap();
        assert_eq!(credential.token(), "abc");
        assert!(credential.expires_at().is_none());

        let err = source
            .fetch(&AccountSelector::new("robinhood"))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::UnsupportedAccount(a) if a == "robinhood"));
    }
}
