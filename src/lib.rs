//! Automation core for lending and concentrated-liquidity AMM interactions.
//!
//! Pure math and planning live in `dex`, `lending` and `flows`; the
//! `orchestrator` executes the resulting action sequences through the traits
//! in `interfaces`, which `dex::client`, `ledger`, `lending::client` and
//! `submitter` implement over `ethers`.

pub mod config;
pub mod dex;
pub mod errors;
pub mod flows;
pub mod interfaces;
pub mod ledger;
pub mod lending;
pub mod models;
pub mod orchestrator;
pub mod submitter;
pub mod utils;
