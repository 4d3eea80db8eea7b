//! fluxback: deterministic bar-by-bar strategy backtesting.
//!
//! Hexagonal architecture: simulation logic in [`domain`], port traits in
//! [`ports`], file-backed implementations in [`adapters`]. External callers
//! need only [`run_backtest`] and [`list_indicators`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod api;
pub mod cli;
pub mod logging;

pub use api::{list_indicators, run_backtest};
pub use domain::backtest::{BacktestConfig, BacktestResult};
pub use domain::error::FluxbackError;
