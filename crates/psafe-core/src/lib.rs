pub mod config;
pub mod error;

pub use config::{CryptoConfig, SafeConfig, SafeFileConfig};
pub use error::{CoreError, CoreResult};
