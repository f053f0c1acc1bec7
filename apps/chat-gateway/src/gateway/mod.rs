pub mod append_log;
pub mod envelope;
pub mod fanout;
pub mod handler;
pub mod presence;
pub mod rate_limit;
pub mod registry;
pub mod resume;
pub mod sequence;
pub mod server;
pub mod session;
pub mod sink;
