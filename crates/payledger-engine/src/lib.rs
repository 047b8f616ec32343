//! Payment account ledger engine.
//!
//! The components, in dependency order:
//!
//! - [`AccountRegistry`]: one billing account per owner
//! - [`BalanceLedger`]: append-only entries and the materialized balance
//! - [`CouponEngine`], [`CreditCards`] / [`CryptoTokens`], [`ChargeCalculator`]:
//!   the three producers of ledger entries
//! - [`InvoiceAssembler`]: read-only statements
//!
//! [`Payments`] wires them around a single ledger handle.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chrono::Duration;
//! use payledger_core::{SourceKind, UserId};
//! use payledger_engine::{
//!     EngineConfig, OpenDirectory, Payments, RecordedUsage, UnconfiguredGateway,
//! };
//! use payledger_store::MemoryStore;
//!
//! # async fn run() -> payledger_core::Result<()> {
//! let payments = Payments::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(OpenDirectory),
//!     Arc::new(RecordedUsage::new()),
//!     Arc::new(UnconfiguredGateway::new(SourceKind::CreditCard)),
//!     Arc::new(UnconfiguredGateway::new(SourceKind::CryptoToken)),
//!     EngineConfig::default(),
//! )?;
//!
//! let owner = UserId::generate();
//! payments.setup(&owner, "owner@example.com").await?;
//! payments.add_coupon(&owner, None, 500, Duration::days(30), "welcome")?;
//! let balance = payments.balance(&owner)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod charges;
pub mod config;
pub mod coupons;
pub mod invoices;
pub mod ledger;
pub mod payments;
pub mod registry;
pub mod usage;

use std::sync::Arc;

use chrono::Duration;

use payledger_core::{
    BillingPeriod, Coupon, CouponId, ProjectCharge, ProjectId, Result, SourceKind, UserId,
};
use payledger_store::Store;

pub use charges::ChargeCalculator;
pub use config::EngineConfig;
pub use coupons::CouponEngine;
pub use invoices::InvoiceAssembler;
pub use ledger::{BalanceLedger, ProjectEntries};
pub use payments::{
    CardRegistration, ChargeOutcome, ChargeRequest, CreditCards, CryptoTokens, PaymentGateway,
    PaymentMethod, ReconcileReport, TokenRegistration, UnconfiguredGateway,
};
pub use registry::{AccountRegistry, OpenDirectory, OwnerDirectory};
pub use usage::{RecordedUsage, UsageSource};

use payments::SourceBook;

/// The assembled ledger: every component sharing one store and one ledger.
pub struct Payments {
    registry: Arc<AccountRegistry>,
    ledger: Arc<BalanceLedger>,
    coupons: CouponEngine,
    credit_cards: CreditCards,
    crypto_tokens: CryptoTokens,
    charges: ChargeCalculator,
    invoices: InvoiceAssembler,
}

impl Payments {
    /// Wire the components over `store`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if `config` is invalid.
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn OwnerDirectory>,
        usage: Arc<dyn UsageSource>,
        card_gateway: Arc<dyn PaymentGateway>,
        token_gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(AccountRegistry::new(Arc::clone(&store), directory));
        let ledger = Arc::new(BalanceLedger::new(Arc::clone(&store), &config));

        let book = |gateway, kind| {
            SourceBook::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                Arc::clone(&ledger),
                gateway,
                kind,
                config.charge_wait,
            )
        };
        let credit_cards = CreditCards::new(book(card_gateway, SourceKind::CreditCard));
        let crypto_tokens = CryptoTokens::new(book(token_gateway, SourceKind::CryptoToken));

        Ok(Self {
            coupons: CouponEngine::new(Arc::clone(&store), Arc::clone(&registry), Arc::clone(&ledger)),
            charges: ChargeCalculator::new(
                Arc::clone(&registry),
                Arc::clone(&ledger),
                usage,
                config.rates,
            ),
            invoices: InvoiceAssembler::new(Arc::clone(&registry), Arc::clone(&ledger)),
            credit_cards,
            crypto_tokens,
            registry,
            ledger,
        })
    }

    /// Account registry.
    #[must_use]
    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    /// Balance ledger.
    #[must_use]
    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// Coupon engine.
    #[must_use]
    pub const fn coupons(&self) -> &CouponEngine {
        &self.coupons
    }

    /// Credit card rail.
    #[must_use]
    pub const fn credit_cards(&self) -> &CreditCards {
        &self.credit_cards
    }

    /// Crypto token rail.
    #[must_use]
    pub const fn crypto_tokens(&self) -> &CryptoTokens {
        &self.crypto_tokens
    }

    /// Usage charge calculator.
    #[must_use]
    pub const fn charges(&self) -> &ChargeCalculator {
        &self.charges
    }

    /// Statement assembler.
    #[must_use]
    pub const fn invoices(&self) -> &InvoiceAssembler {
        &self.invoices
    }

    // ========================================================================
    // Owner-level shortcuts
    // ========================================================================

    /// Set up the owner's account. See [`AccountRegistry::setup`].
    ///
    /// # Errors
    ///
    /// Same as [`AccountRegistry::setup`].
    pub async fn setup(&self, owner: &UserId, email: &str) -> Result<payledger_core::AccountId> {
        self.registry.setup(owner, email).await
    }

    /// Current balance of the owner's account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the owner has no account.
    pub fn balance(&self, owner: &UserId) -> Result<i64> {
        let account_id = self.registry.resolve(owner)?;
        self.ledger.balance(&account_id)
    }

    /// Issue a coupon to the owner's account.
    ///
    /// # Errors
    ///
    /// Same as [`CouponEngine::add_coupon`], plus `AccountNotSetup` for an
    /// unknown owner.
    pub fn add_coupon(
        &self,
        owner: &UserId,
        project_id: Option<ProjectId>,
        amount_cents: i64,
        duration: Duration,
        description: &str,
    ) -> Result<CouponId> {
        let account_id = self.registry.resolve(owner)?;
        self.coupons
            .add_coupon(&account_id, project_id, amount_cents, duration, description)
    }

    /// Coupons of the owner's account, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the owner has no account.
    pub fn coupons_of(&self, owner: &UserId) -> Result<Vec<Coupon>> {
        let account_id = self.registry.resolve(owner)?;
        self.coupons.list(&account_id)
    }

    /// Price the owner's usage for `period` without charging it.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the owner has no account, or
    /// any error from the usage source.
    pub async fn project_charges(
        &self,
        owner: &UserId,
        period: &BillingPeriod,
    ) -> Result<Vec<ProjectCharge>> {
        let account_id = self.registry.resolve(owner)?;
        self.charges.estimate(&account_id, period).await
    }
}
