//! Configuration management module
//!
//! Responsible for loading and managing application configuration, including environment variables and the accounts seed file.

pub mod file;
pub mod settings;

pub use file::{AccountSeed, AccountsFile, MembershipSeed};
pub use settings::Settings;
