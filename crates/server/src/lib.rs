// sessionroom-server library entry point.

pub mod app;
pub mod config;
pub mod doc;
pub mod error;
pub mod registry;
pub mod room;
pub mod store;
pub mod ws;
