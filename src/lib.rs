pub mod archive;
pub mod chat_log;
pub mod config;
