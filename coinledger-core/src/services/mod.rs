//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod auth;
pub mod credentials;
mod export;
pub mod import;
mod ledger;
pub mod logging;
pub mod migration;
pub mod session;
pub mod settings;
mod sync;
pub mod two_factor;

pub use auth::{hash_password, AuthService, LoginOutcome};
pub use credentials::CredentialCipher;
pub use export::{ExportResult, ExportService};
pub use import::{ImportFormat, ImportResult, ImportService, ImportWarning, TransactionPreview};
pub use ledger::{build_chart_series, LedgerService};
pub use logging::{LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use session::{Session, SessionState, SessionStore};
pub use settings::{CoinbaseCredentials, SettingsService};
pub use sync::{map_exchange_transaction, AccountSyncResult, SyncResult, SyncService, SyncWarning};
pub use two_factor::{TwoFactorService, TwoFactorSetup};
