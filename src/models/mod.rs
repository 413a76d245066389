pub mod auth;
pub mod player;
pub mod profile;
pub mod schema_info;
pub mod shop;
pub mod storage;
pub mod tenant;
