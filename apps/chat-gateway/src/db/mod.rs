pub mod kv;
pub mod messages;
pub mod pool;
pub mod schema;
pub mod threads;
