//! Configuration loading and validation.
//!
//! Engine settings come from three layers: [`BacktestConfig::default`], the
//! `[backtest]` and `[slippage]` sections of an INI file read through
//! [`ConfigPort`], and the strategy's own `execution:` overrides. Every layer
//! is checked with [`validate_settings`] before a run starts.
//!
//! ```ini
//! [slippage]
//! type = adaptive
//! base_ticks = 1
//! vol_multiplier = 0.001
//! ```

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::FluxbackError;
use crate::domain::execution::{AdaptiveSlippage, SlippageModel};
use crate::ports::config_port::ConfigPort;

pub const SECTION: &str = "backtest";
pub const SLIPPAGE_SECTION: &str = "slippage";

const SLIPPAGE_KEYS: [&str; 9] = [
    "base_ticks",
    "tick_size",
    "vol_multiplier",
    "vol_low",
    "vol_high",
    "low_factor",
    "high_factor",
    "vol_period",
    "vol_annualization",
];

const NUMERIC_KEYS: [&str; 7] = [
    "initial_capital",
    "commission_per_trade",
    "commission_pct",
    "slippage_pct",
    "risk_free_rate",
    "periods_per_year",
    "regime_lookback",
];

const BOOL_KEYS: [&str; 3] = ["allow_shorting", "whole_units", "exclude_volatile_regime"];

/// Check that every `[backtest]` key present parses and is in range.
pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), FluxbackError> {
    validate_types(config)?;
    validate_settings(&read_backtest_config(config), SECTION)
}

/// Defaults overlaid with the `[backtest]` section, validated.
pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, FluxbackError> {
    validate_backtest_config(config)?;
    Ok(read_backtest_config(config))
}

fn read_backtest_config(config: &dyn ConfigPort) -> BacktestConfig {
    let defaults = BacktestConfig::default();
    let mut cfg = defaults.clone();
    cfg.initial_capital = config.get_double(SECTION, "initial_capital", defaults.initial_capital);
    cfg.execution.commission_per_trade = config.get_double(
        SECTION,
        "commission_per_trade",
        defaults.execution.commission_per_trade,
    );
    cfg.execution.commission_pct =
        config.get_double(SECTION, "commission_pct", defaults.execution.commission_pct);
    cfg.execution.slippage_pct =
        config.get_double(SECTION, "slippage_pct", defaults.execution.slippage_pct);
    cfg.execution.allow_shorting =
        config.get_bool(SECTION, "allow_shorting", defaults.execution.allow_shorting);
    cfg.execution.whole_units =
        config.get_bool(SECTION, "whole_units", defaults.execution.whole_units);
    cfg.risk_free_rate = config.get_double(SECTION, "risk_free_rate", defaults.risk_free_rate);
    cfg.periods_per_year =
        config.get_double(SECTION, "periods_per_year", defaults.periods_per_year);
    cfg.exclude_volatile_regime = config.get_bool(
        SECTION,
        "exclude_volatile_regime",
        defaults.exclude_volatile_regime,
    );
    let lookback = config.get_int(SECTION, "regime_lookback", defaults.regime_lookback as i64);
    cfg.regime_lookback = usize::try_from(lookback).unwrap_or(0);
    if slippage_type(config).as_deref() == Some("adaptive") {
        cfg.execution.slippage_model = SlippageModel::Adaptive(read_adaptive_slippage(config));
    }
    cfg
}

fn slippage_type(config: &dyn ConfigPort) -> Option<String> {
    config
        .get_string(SLIPPAGE_SECTION, "type")
        .map(|t| t.trim().to_lowercase())
}

fn read_adaptive_slippage(config: &dyn ConfigPort) -> AdaptiveSlippage {
    let d = AdaptiveSlippage::default();
    let num = |key: &str, default: f64| config.get_double(SLIPPAGE_SECTION, key, default);
    let period = config.get_int(SLIPPAGE_SECTION, "vol_period", d.vol_period as i64);
    AdaptiveSlippage {
        base_ticks: num("base_ticks", d.base_ticks),
        tick_size: num("tick_size", d.tick_size),
        vol_multiplier: num("vol_multiplier", d.vol_multiplier),
        vol_low: num("vol_low", d.vol_low),
        vol_high: num("vol_high", d.vol_high),
        low_factor: num("low_factor", d.low_factor),
        high_factor: num("high_factor", d.high_factor),
        vol_period: usize::try_from(period).unwrap_or(0),
        vol_annualization: num("vol_annualization", d.vol_annualization),
    }
}

/// `get_double` and `get_bool` fall back to defaults on junk; catch it here.
fn validate_types(config: &dyn ConfigPort) -> Result<(), FluxbackError> {
    for key in NUMERIC_KEYS {
        if let Some(raw) = config.get_string(SECTION, key) {
            if raw.trim().parse::<f64>().is_err() {
                return Err(invalid(SECTION, key, format!("'{raw}' is not a number")));
            }
        }
    }
    for key in BOOL_KEYS {
        if let Some(raw) = config.get_string(SECTION, key) {
            let known = matches!(
                raw.trim().to_lowercase().as_str(),
                "true" | "false" | "yes" | "no" | "1" | "0"
            );
            if !known {
                return Err(invalid(SECTION, key, format!("'{raw}' is not a boolean")));
            }
        }
    }

    let kind = slippage_type(config);
    if let Some(kind) = &kind {
        if kind != "fixed" && kind != "adaptive" {
            return Err(invalid(
                SLIPPAGE_SECTION,
                "type",
                format!("'{kind}' is not one of fixed, adaptive"),
            ));
        }
    }
    for key in SLIPPAGE_KEYS {
        if let Some(raw) = config.get_string(SLIPPAGE_SECTION, key) {
            if raw.trim().parse::<f64>().is_err() {
                return Err(invalid(SLIPPAGE_SECTION, key, format!("'{raw}' is not a number")));
            }
            if kind.as_deref() != Some("adaptive") {
                return Err(invalid(
                    SLIPPAGE_SECTION,
                    key,
                    "only applies with type = adaptive",
                ));
            }
        }
    }
    Ok(())
}

/// Range checks shared by the config file and per-strategy overrides.
/// `section` names the layer the values came from.
pub fn validate_settings(cfg: &BacktestConfig, section: &str) -> Result<(), FluxbackError> {
    if !(cfg.initial_capital.is_finite() && cfg.initial_capital > 0.0) {
        return Err(invalid(
            section,
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    let exec = &cfg.execution;
    if !(exec.commission_per_trade.is_finite() && exec.commission_per_trade >= 0.0) {
        return Err(invalid(
            section,
            "commission_per_trade",
            "commission_per_trade must be non-negative",
        ));
    }
    if !(exec.commission_pct.is_finite() && exec.commission_pct >= 0.0) {
        return Err(invalid(
            section,
            "commission_pct",
            "commission_pct must be non-negative",
        ));
    }
    if !(exec.slippage_pct.is_finite() && (0.0..100.0).contains(&exec.slippage_pct)) {
        return Err(invalid(
            section,
            "slippage_pct",
            "slippage_pct must be in [0, 100)",
        ));
    }
    if !(0.0..1.0).contains(&cfg.risk_free_rate) {
        return Err(invalid(
            section,
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    if !(cfg.periods_per_year.is_finite() && cfg.periods_per_year > 0.0) {
        return Err(invalid(
            section,
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }
    if cfg.regime_lookback < 2 {
        return Err(invalid(
            section,
            "regime_lookback",
            "regime_lookback must be at least 2",
        ));
    }
    if let SlippageModel::Adaptive(model) = &exec.slippage_model {
        validate_adaptive_slippage(model, section)?;
    }
    Ok(())
}

fn validate_adaptive_slippage(model: &AdaptiveSlippage, section: &str) -> Result<(), FluxbackError> {
    let non_negative = [
        ("slippage.base_ticks", model.base_ticks),
        ("slippage.vol_multiplier", model.vol_multiplier),
        ("slippage.vol_low", model.vol_low),
        ("slippage.low_factor", model.low_factor),
        ("slippage.high_factor", model.high_factor),
    ];
    for (key, value) in non_negative {
        if !(value.is_finite() && value >= 0.0) {
            return Err(invalid(section, key, format!("{key} must be non-negative")));
        }
    }
    if !(model.tick_size.is_finite() && model.tick_size > 0.0) {
        return Err(invalid(section, "slippage.tick_size", "tick_size must be positive"));
    }
    if !(model.vol_high.is_finite() && model.vol_high >= model.vol_low) {
        return Err(invalid(
            section,
            "slippage.vol_high",
            "vol_high must be at least vol_low",
        ));
    }
    if model.vol_period < 2 {
        return Err(invalid(
            section,
            "slippage.vol_period",
            "vol_period must be at least 2",
        ));
    }
    if !(model.vol_annualization.is_finite() && model.vol_annualization >= 1.0) {
        return Err(invalid(
            section,
            "slippage.vol_annualization",
            "vol_annualization must be at least 1",
        ));
    }
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> FluxbackError {
    FluxbackError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}
