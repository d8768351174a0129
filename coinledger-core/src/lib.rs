//! coinledger core - business logic for a crypto and brokerage ledger
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (User, Transaction, balances)
//! - **ports**: Trait definitions for external dependencies (ExchangeClient)
//! - **services**: Business logic orchestration
//! - **adapters**: Concrete implementations (DuckDB, Coinbase)

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod log_migrations;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbRepository;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::{AssetBalance, ChartSeries, Page, Transaction, TransactionSource, User};
pub use domain::result::{domain_error, Error};

/// Database file inside the data directory
pub const DB_FILENAME: &str = "coinledger.duckdb";

/// Main context for coinledger operations
///
/// This is the primary entry point for all business logic. It holds
/// the database connection, configuration, and all services.
pub struct LedgerContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub repository: Arc<DuckDbRepository>,
    pub auth_service: Arc<AuthService>,
    pub two_factor_service: TwoFactorService,
    pub settings_service: Arc<SettingsService>,
    pub import_service: ImportService,
    pub sync_service: SyncService,
    pub ledger_service: LedgerService,
    pub export_service: ExportService,
    pub session_store: SessionStore,
}

impl LedgerContext {
    /// Open the ledger in `data_dir`, creating the directory, database and
    /// credentials key on first use
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let config = Config::load(data_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&data_dir.join(DB_FILENAME))?);
        repository.ensure_schema()?;

        let cipher = CredentialCipher::load_or_create(data_dir, config.secret_key.as_deref())?;

        let auth_service = Arc::new(AuthService::new(
            Arc::clone(&repository),
            config.min_password_length,
        ));
        let two_factor_service =
            TwoFactorService::new(Arc::clone(&repository), config.totp_issuer.clone());
        let settings_service = Arc::new(SettingsService::new(
            Arc::clone(&repository),
            Arc::clone(&auth_service),
            cipher,
        ));
        let import_service = ImportService::new(Arc::clone(&repository));
        let sync_service = SyncService::new(
            Arc::clone(&repository),
            Arc::clone(&settings_service),
            config.clone(),
        );
        let ledger_service = LedgerService::new(Arc::clone(&repository), config.per_page);
        let export_service = ExportService::new(Arc::clone(&repository));
        let session_store = SessionStore::new(data_dir);

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            repository,
            auth_service,
            two_factor_service,
            settings_service,
            import_service,
            sync_service,
            ledger_service,
            export_service,
            session_store,
        })
    }

    /// Id of the logged-in user, or an authentication error
    pub fn current_user_id(&self) -> Result<uuid::Uuid> {
        self.session_store.require_user()
    }
}
