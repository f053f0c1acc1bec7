pub mod chat_match;
pub mod message;
