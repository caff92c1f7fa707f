#![forbid(unsafe_code)]

pub mod repository;
pub mod snapshot;
pub mod sqlite;
pub mod subscriptions;
