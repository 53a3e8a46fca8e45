pub mod data;
pub mod io;

pub use data::{builtin_providers, Config, ProviderConfig, ProviderKind};
pub use io::ConfigError;
