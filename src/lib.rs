pub mod config;
pub mod data;
pub mod join;
pub mod navigate;
pub mod normalize;
pub mod processing;
pub mod registry;
pub mod search;
pub mod server;
pub mod state;
pub mod style;
pub mod types;
