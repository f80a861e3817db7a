mod model;
mod repository;

pub use model::RateLimitWindowDB;
pub use repository::SqliteWindowStore;
