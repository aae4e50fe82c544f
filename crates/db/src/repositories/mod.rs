//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod backup_code_repo;
pub mod ip_security_repo;
pub mod refresh_token_repo;
pub mod session_repo;
pub mod totp_repo;
pub mod user_repo;

pub use backup_code_repo::BackupCodeRepo;
pub use ip_security_repo::IpSecurityRepo;
pub use refresh_token_repo::RefreshTokenRepo;
pub use session_repo::SessionRepo;
pub use totp_repo::TotpRepo;
pub use user_repo::UserRepo;
