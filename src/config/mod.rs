pub mod schema;

pub use schema::{
    resolve_config_dir, BotConfig, ComputeConfig, Config, FirestoreConfig, LedgerConfig,
    ProgressMode, QuotaConfig, ServerConfig,
};
