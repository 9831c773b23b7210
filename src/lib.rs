pub mod auth;
pub mod config;
pub mod engine;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod observability;
pub mod resolver;
pub mod sql;
pub mod sweep;
pub mod tls;
pub mod wal;
pub mod wire;
