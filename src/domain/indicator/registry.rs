//! Indicator registry: maps canonical names to descriptors, factories and
//! lookback functions. Built explicitly with [`IndicatorRegistry::with_builtins`]
//! and passed by reference to the strategy parser and the simulator.

use std::collections::BTreeMap;

use super::{
    IndicatorDescriptor, IndicatorSpec, IndicatorState, ParamKind, RollingIndicator, atr,
    bollinger, ema, lag, macd, obv, roc, rsi, rvol, sma, stddev, stochastic, vwap, wma,
};
use crate::domain::error::FluxbackError;

pub type Factory = fn(&[f64]) -> Box<dyn RollingIndicator>;
pub type LookbackFn = fn(&[f64]) -> usize;

struct Entry {
    descriptor: IndicatorDescriptor,
    factory: Factory,
    lookback: LookbackFn,
}

#[derive(Default)]
pub struct IndicatorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl IndicatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every builtin indicator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(sma::descriptor(), sma::build, sma::min_lookback);
        registry.register(ema::descriptor(), ema::build, ema::min_lookback);
        registry.register(wma::descriptor(), wma::build, wma::min_lookback);
        registry.register(rsi::descriptor(), rsi::build, rsi::min_lookback);
        registry.register(roc::descriptor(), roc::build, roc::min_lookback);
        registry.register(stddev::descriptor(), stddev::build, stddev::min_lookback);
        registry.register(
            bollinger::descriptor(),
            bollinger::build,
            bollinger::min_lookback,
        );
        registry.register(macd::descriptor(), macd::build, macd::min_lookback);
        registry.register(
            stochastic::descriptor(),
            stochastic::build,
            stochastic::min_lookback,
        );
        registry.register(atr::descriptor(), atr::build, atr::min_lookback);
        registry.register(obv::descriptor(), obv::build, obv::min_lookback);
        registry.register(vwap::descriptor(), vwap::build, vwap::min_lookback);
        registry.register(rvol::descriptor(), rvol::build, rvol::min_lookback);
        registry.register(lag::descriptor(), lag::build, lag::min_lookback);
        registry
    }

    /// Register (or replace) an indicator. Names are stored upper-case.
    pub fn register(&mut self, descriptor: IndicatorDescriptor, factory: Factory, lookback: LookbackFn) {
        let mut descriptor = descriptor;
        descriptor.name = descriptor.name.to_ascii_uppercase();
        self.entries.insert(
            descriptor.name.clone(),
            Entry {
                descriptor,
                factory,
                lookback,
            },
        );
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Result<&IndicatorDescriptor, FluxbackError> {
        self.entry(name).map(|e| &e.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_uppercase())
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<IndicatorDescriptor> {
        self.entries.values().map(|e| e.descriptor.clone()).collect()
    }

    fn entry(&self, name: &str) -> Result<&Entry, FluxbackError> {
        self.entries
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| FluxbackError::IndicatorNotFound {
                name: name.to_string(),
            })
    }

    /// Resolve positional arguments; missing trailing parameters take defaults.
    pub fn resolve_positional(&self, name: &str, args: &[f64]) -> Result<IndicatorSpec, FluxbackError> {
        let descriptor = self.get(name)?;
        if args.len() > descriptor.params.len() {
            return Err(FluxbackError::strategy(format!(
                "{} takes at most {} parameter(s), got {}",
                descriptor.name,
                descriptor.params.len(),
                args.len()
            )));
        }
        let params = descriptor
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| args.get(i).copied().unwrap_or(p.default))
            .collect();
        self.validated(descriptor, params)
    }

    /// Resolve named arguments; unknown names are rejected.
    pub fn resolve_named(
        &self,
        name: &str,
        args: &BTreeMap<String, f64>,
    ) -> Result<IndicatorSpec, FluxbackError> {
        let descriptor = self.get(name)?;
        if let Some(unknown) = args
            .keys()
            .find(|k| !descriptor.params.iter().any(|p| p.name.eq_ignore_ascii_case(k)))
        {
            return Err(FluxbackError::strategy(format!(
                "{} has no parameter '{}'",
                descriptor.name, unknown
            )));
        }
        let params = descriptor
            .params
            .iter()
            .map(|p| {
                args.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&p.name))
                    .map(|(_, v)| *v)
                    .unwrap_or(p.default)
            })
            .collect();
        self.validated(descriptor, params)
    }

    fn validated(
        &self,
        descriptor: &IndicatorDescriptor,
        params: Vec<f64>,
    ) -> Result<IndicatorSpec, FluxbackError> {
        for (spec, value) in descriptor.params.iter().zip(&params) {
            if !value.is_finite() {
                return Err(FluxbackError::strategy(format!(
                    "{}: parameter '{}' must be finite",
                    descriptor.name, spec.name
                )));
            }
            if spec.kind == ParamKind::Integer && value.fract() != 0.0 {
                return Err(FluxbackError::strategy(format!(
                    "{}: parameter '{}' must be an integer, got {}",
                    descriptor.name, spec.name, value
                )));
            }
            if *value < spec.min {
                return Err(FluxbackError::strategy(format!(
                    "{}: parameter '{}' must be >= {}, got {}",
                    descriptor.name, spec.name, spec.min, value
                )));
            }
        }
        Ok(IndicatorSpec {
            name: descriptor.name.clone(),
            params,
        })
    }

    pub fn min_lookback(&self, spec: &IndicatorSpec) -> Result<usize, FluxbackError> {
        Ok((self.entry(&spec.name)?.lookback)(&spec.params).max(1))
    }

    /// Fresh per-run state for `spec`.
    pub fn instantiate(&self, spec: &IndicatorSpec) -> Result<IndicatorState, FluxbackError> {
        let entry = self.entry(&spec.name)?;
        let inner = (entry.factory)(&spec.params);
        let lookback = (entry.lookback)(&spec.params);
        Ok(IndicatorState::new(spec.clone(), inner, lookback))
    }
}
