pub mod auth;
pub mod config;
pub mod db;
pub mod forms;
pub mod fund;
pub mod grants;
pub mod http;
pub mod mail;
pub mod model;
pub mod outbox;
pub mod reports;
pub mod scoring;
pub mod storage;
