//! Account registry: one billing account per owner.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use payledger_core::{Account, AccountId, LedgerError, Result, UserId};
use payledger_store::Store;

/// External identity service that knows which owners exist.
#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    /// Whether `owner` is a known identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be reached.
    async fn resolve(&self, owner: &UserId) -> Result<bool>;
}

/// Directory that accepts every owner.
///
/// Used when identities are checked upstream of the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

#[async_trait]
impl OwnerDirectory for OpenDirectory {
    async fn resolve(&self, _owner: &UserId) -> Result<bool> {
        Ok(true)
    }
}

/// Creates and resolves billing accounts.
pub struct AccountRegistry {
    store: Arc<dyn Store>,
    directory: Arc<dyn OwnerDirectory>,
}

impl AccountRegistry {
    /// Create a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, directory: Arc<dyn OwnerDirectory>) -> Self {
        Self { store, directory }
    }

    /// Create the owner's account if absent and return its ID.
    ///
    /// Repeated and concurrent calls for the same owner return the same ID,
    /// including for a disabled account.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the directory does not know the owner.
    /// - `LedgerError::InvalidInput` for a malformed email.
    pub async fn setup(&self, owner: &UserId, email: &str) -> Result<AccountId> {
        if let Some(existing) = self.store.get_account_by_owner(owner)? {
            debug!(owner = %owner, account_id = %existing.account_id, "Account already set up");
            return Ok(existing.account_id);
        }

        if !self.directory.resolve(owner).await? {
            return Err(LedgerError::NotFound {
                entity: "owner",
                id: owner.to_string(),
            });
        }

        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(LedgerError::InvalidInput(format!(
                "invalid contact email: {email:?}"
            )));
        }

        let candidate = Account::new(*owner, email);
        let stored = self.store.insert_account_if_absent(&candidate)?;
        if stored.account_id == candidate.account_id {
            info!(owner = %owner, account_id = %stored.account_id, "Account created");
        }
        Ok(stored.account_id)
    }

    /// The owner's account ID.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the owner has no account.
    pub fn resolve(&self, owner: &UserId) -> Result<AccountId> {
        self.account(owner).map(|account| account.account_id)
    }

    /// The owner's full account record.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the owner has no account.
    pub fn account(&self, owner: &UserId) -> Result<Account> {
        self.store
            .get_account_by_owner(owner)?
            .ok_or_else(|| LedgerError::AccountNotSetup {
                owner: owner.to_string(),
            })
    }

    /// Look up an account by ID, whether or not it is disabled.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the account does not exist.
    pub fn get(&self, account_id: &AccountId) -> Result<Account> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| LedgerError::AccountNotSetup {
                owner: account_id.to_string(),
            })
    }

    /// Load an account that may accept new ledger movements.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AccountNotSetup` if the account does not exist or never
    ///   completed setup.
    /// - `LedgerError::AccountDisabled` if the account was disabled.
    pub fn require_active(&self, account_id: &AccountId) -> Result<Account> {
        let account = self.get(account_id)?;
        if !account.is_active() {
            return Err(LedgerError::AccountNotSetup {
                owner: account.owner.to_string(),
            });
        }
        if account.disabled {
            return Err(LedgerError::AccountDisabled {
                account_id: account_id.to_string(),
            });
        }
        Ok(account)
    }

    /// Soft-disable the owner's account. Idempotent.
    ///
    /// The account keeps resolving and its ledger stays readable.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the owner has no account.
    pub fn disable(&self, owner: &UserId) -> Result<Account> {
        let mut account = self.account(owner)?;
        if account.disabled {
            return Ok(account);
        }
        account.disabled = true;
        account.updated_at = Utc::now();
        self.store.put_account(&account)?;
        info!(owner = %owner, account_id = %account.account_id, "Account disabled");
        Ok(account)
    }

    /// Every account, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self) -> Result<Vec<Account>> {
        Ok(self.store.list_accounts()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payledger_store::MemoryStore;

    struct KnownOwners(Vec<UserId>);

    #[async_trait]
    impl OwnerDirectory for KnownOwners {
        async fn resolve(&self, owner: &UserId) -> Result<bool> {
            Ok(self.0.contains(owner))
        }
    }

    fn registry() -> AccountRegistry {
        AccountRegistry::new(Arc::new(MemoryStore::new()), Arc::new(OpenDirectory))
    }

    #[tokio::test]
    async fn setup_is_idempotent() {
        let registry = registry();
        let owner = UserId::generate();

        let first = registry.setup(&owner, "dev@example.com").await.unwrap();
        let second = registry.setup(&owner, "other@example.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.resolve(&owner).unwrap(), first);
        assert_eq!(registry.account(&owner).unwrap().email, "dev@example.com");
    }

    #[tokio::test]
    async fn concurrent_setup_creates_one_account() {
        let registry = Arc::new(registry());
        let owner = UserId::generate();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.setup(&owner, "dev@example.com").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let known = UserId::generate();
        let registry = AccountRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(KnownOwners(vec![known])),
        );

        registry.setup(&known, "k@example.com").await.unwrap();
        let err = registry
            .setup(&UserId::generate(), "x@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "owner", .. }));
    }

    #[tokio::test]
    async fn resolve_without_setup_fails() {
        let err = registry().resolve(&UserId::generate()).unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotSetup { .. }));
    }

    #[tokio::test]
    async fn disabled_account_resolves_but_rejects_movements() {
        let registry = registry();
        let owner = UserId::generate();
        let account_id = registry.setup(&owner, "dev@example.com").await.unwrap();

        registry.disable(&owner).unwrap();
        registry.disable(&owner).unwrap();

        assert_eq!(registry.resolve(&owner).unwrap(), account_id);
        assert!(matches!(
            registry.require_active(&account_id),
            Err(LedgerError::AccountDisabled { .. })
        ));
        assert_eq!(registry.setup(&owner, "dev@example.com").await.unwrap(), account_id);
    }

    #[tokio::test]
    async fn malformed_email_rejected() {
        let err = registry()
            .setup(&UserId::generate(), "not-an-email")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }
}
