pub mod chains;
pub mod config;
pub mod http;
pub mod queue;

// Re-export commonly used types for integration tests and external usage
pub use chains::build_chain_service;
pub use config::{
    ChainConfig, EngineConfig, LogFormat, RedisConfig, ServerConfig, StoreBackend, StoreConfig,
    WalletsConfig,
};
pub use http::server::{EngineServer, EngineServerState};
pub use queue::manager::QueueManager;
