pub mod capsules;
pub mod config;
pub mod geo;
pub mod ledger;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod store;
