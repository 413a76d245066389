pub mod config_cache;
pub mod connectivity;
pub mod metrics;
pub mod players;
pub mod privilege;
pub mod profile;
pub mod sample_data;
pub mod schema_inspector;
pub mod session;
pub mod shop;
pub mod storage;
pub mod tenant_resolver;
pub mod trainers;
