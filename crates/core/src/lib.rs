pub mod config;
pub mod dataset;
pub mod entity;
pub mod error;
pub mod reminder;
pub mod schedule;
pub mod store;

pub use config::Config;
pub use dataset::*;
pub use entity::*;
pub use error::*;
pub use reminder::*;
pub use schedule::*;
pub use store::{MemoryStore, PgStore, Store};
