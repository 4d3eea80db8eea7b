//! Core domain types and logic: no I/O, no global state.

pub mod ohlcv;
pub mod timeseries;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod indicator;
pub mod indicator_helpers;
pub mod regime;
pub mod rule;
pub mod rule_parser;
pub mod rule_eval;
pub mod backtest;
pub mod sweep;
pub mod metrics;
pub mod strategy;
pub mod config_validation;
pub mod error;
