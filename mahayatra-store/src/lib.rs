pub mod app_config;
pub mod database;
pub mod redis_repo;

pub use database::{DbClient, PgBookingRepository};
pub use redis_repo::RedisSeatStore;
