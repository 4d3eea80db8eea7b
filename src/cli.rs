//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{self, CsvAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::adapters::trade_log_adapter::TradeLogAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::config_validation::build_backtest_config;
use crate::domain::error::FluxbackError;
use crate::domain::indicator::IndicatorRegistry;
use crate::domain::metrics::Metrics;
use crate::domain::rule_parser;
use crate::domain::strategy::{Strategy, StrategyDescription, TradingRule};
use crate::domain::sweep;
use crate::domain::timeseries::TimeSeries;
use crate::logging::setup_logging;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "fluxback", about = "Bar-by-bar strategy backtester")]
pub struct Cli {
    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one strategy over one series
    Run {
        #[arg(short, long)]
        strategy: PathBuf,
        /// OHLCV CSV file, or a directory of SYMBOL.csv files
        #[arg(short, long)]
        data: PathBuf,
        /// Symbol to load when --data is a directory (defaults to strategy.symbol)
        #[arg(long)]
        symbol: Option<String>,
        /// INI file with a [backtest] section
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Write the closed-trade log as CSV
        #[arg(long)]
        trades: Option<PathBuf>,
    },
    /// Print the indicator registry as JSON
    Indicators,
    /// Parse and bind a strategy without running it
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Run several strategies over one series in parallel
    Batch {
        #[arg(short, long, required = true)]
        strategy: Vec<PathBuf>,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Base path for per-strategy JSON results
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Summarise a data file: bar count, date range and return statistics
    Stats {
        /// OHLCV CSV file, or a directory of SYMBOL.csv files
        #[arg(short, long)]
        data: PathBuf,
        /// Symbol to load when --data is a directory
        #[arg(long)]
        symbol: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    setup_logging(&cli.log_level, cli.json_logs);
    match cli.command {
        Command::Run {
            strategy,
            data,
            symbol,
            config,
            out,
            trades,
        } => run_single(
            &strategy,
            &data,
            symbol.as_deref(),
            config.as_ref(),
            out.as_ref(),
            trades.as_ref(),
        ),
        Command::Indicators => run_indicators(),
        Command::Validate { strategy } => run_validate(&strategy),
        Command::Batch {
            strategy,
            data,
            symbol,
            config,
            out,
        } => run_batch(&strategy, &data, symbol.as_deref(), config.as_ref(), out.as_ref()),
        Command::Stats { data, symbol } => run_stats(&data, symbol.as_deref()),
    }
}

fn fail(err: &FluxbackError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Defaults, overlaid with the config file when one is given.
fn resolve_config(config_path: Option<&PathBuf>) -> Result<BacktestConfig, ExitCode> {
    let Some(path) = config_path else {
        return Ok(BacktestConfig::default());
    };
    eprintln!("Loading config from {}", path.display());
    let adapter = load_config(path)?;
    build_backtest_config(&adapter).map_err(|e| fail(&e))
}

fn read_text(path: &Path) -> Result<String, FluxbackError> {
    fs::read_to_string(path).map_err(|e| {
        FluxbackError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {e}", path.display()),
        ))
    })
}

pub fn load_strategy(path: &Path, registry: &IndicatorRegistry) -> Result<Strategy, FluxbackError> {
    Strategy::parse(&read_text(path)?, registry)
}

fn load_series(
    data: &Path,
    symbol: Option<&str>,
    strategy: Option<&Strategy>,
) -> Result<TimeSeries, FluxbackError> {
    if !data.is_dir() {
        return csv_adapter::load_file(data);
    }
    let symbol = symbol
        .map(str::to_string)
        .or_else(|| strategy.and_then(|s| s.symbol.clone()))
        .ok_or_else(|| FluxbackError::ConfigMissing {
            section: "strategy".into(),
            key: "symbol".into(),
        })?;
    CsvAdapter::new(data.to_path_buf()).fetch_series(&symbol)
}

fn run_single(
    strategy_path: &Path,
    data_path: &Path,
    symbol: Option<&str>,
    config_path: Option<&PathBuf>,
    out: Option<&PathBuf>,
    trades: Option<&PathBuf>,
) -> ExitCode {
    let config = match resolve_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let registry = IndicatorRegistry::with_builtins();
    eprintln!("Loading strategy from {}", strategy_path.display());
    let strategy = match load_strategy(strategy_path, &registry) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    let series = match load_series(data_path, symbol, Some(&strategy)) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    eprintln!("Running {} over {} bars", strategy.name, series.len());

    let result = match backtest_engine::run_backtest(&series, &strategy, &registry, &config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    print_summary(&result);

    let report = JsonReportAdapter::new(true);
    match out {
        Some(path) => {
            if let Err(e) = report.write(&result, path) {
                return fail(&e);
            }
            eprintln!("\nResult written to: {}", path.display());
        }
        None => match report.render(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => return fail(&e),
        },
    }

    if let Some(path) = trades {
        if let Err(e) = TradeLogAdapter.write(&result, path) {
            return fail(&e);
        }
        eprintln!("Trade log written to: {}", path.display());
    }

    ExitCode::SUCCESS
}

fn run_indicators() -> ExitCode {
    match serde_json::to_string_pretty(&crate::api::list_indicators()) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&FluxbackError::Report {
            reason: e.to_string(),
        }),
    }
}

fn run_validate(strategy_path: &Path) -> ExitCode {
    eprintln!("Validating strategy: {}", strategy_path.display());
    let text = match read_text(strategy_path) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };
    let description: StrategyDescription = match serde_yaml::from_str(&text) {
        Ok(d) => d,
        Err(e) => {
            return fail(&FluxbackError::StrategyFormat {
                reason: format!("invalid strategy YAML: {e}"),
            });
        }
    };

    for (i, decl) in description.rules.iter().enumerate() {
        if let Err(e) = rule_parser::parse(&decl.expression) {
            eprintln!("\nRule {}:", i + 1);
            eprintln!("  error: {}", e.display_with_context(&decl.expression));
            return (&FluxbackError::from(e)).into();
        }
    }

    let registry = IndicatorRegistry::with_builtins();
    let strategy = match Strategy::from_description(description, &registry) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    eprintln!("\nStrategy: {}", strategy.name);
    eprintln!("\nRules (bound):");
    for (i, rule) in strategy.rules.iter().enumerate() {
        match rule {
            TradingRule::Entry(e) => eprintln!("  {}. entry {}: {}", i + 1, e.side, e.rule),
            TradingRule::Exit(x) => match x.side {
                Some(side) => eprintln!("  {}. exit {}: {}", i + 1, side, x.rule),
                None => eprintln!("  {}. exit: {}", i + 1, x.rule),
            },
        }
    }

    eprintln!("\nIndicators to compute:");
    for spec in &strategy.indicators {
        match registry.min_lookback(spec) {
            Ok(lookback) => eprintln!("  {spec} (lookback {lookback})"),
            Err(e) => return fail(&e),
        }
    }

    match strategy.max_lookback(&registry) {
        Ok(lookback) => eprintln!("\nMinimum bars required: {lookback}"),
        Err(e) => return fail(&e),
    }
    eprintln!("\nStrategy is valid.");
    ExitCode::SUCCESS
}

fn run_batch(
    strategy_paths: &[PathBuf],
    data_path: &Path,
    symbol: Option<&str>,
    config_path: Option<&PathBuf>,
    out: Option<&PathBuf>,
) -> ExitCode {
    let config = match resolve_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let registry = IndicatorRegistry::with_builtins();
    let mut strategies = Vec::with_capacity(strategy_paths.len());
    for path in strategy_paths {
        match load_strategy(path, &registry) {
            Ok(s) => strategies.push(s),
            Err(e) => {
                eprintln!("error: {}: {e}", path.display());
                return (&e).into();
            }
        }
    }

    let series = match load_series(data_path, symbol, strategies.first()) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    eprintln!(
        "Running {} strategies over {} bars",
        strategies.len(),
        series.len()
    );

    let outcomes = sweep::run_batch(&series, &strategies, &registry, &config);

    eprintln!(
        "\n{:<24} {:>10} {:>8} {:>9} {:>7}",
        "Strategy", "Return", "Sharpe", "Drawdown", "Trades"
    );
    let mut first_failure: Option<ExitCode> = None;
    let mut results = Vec::with_capacity(outcomes.len());
    for (index, (strategy, outcome)) in strategies.iter().zip(outcomes).enumerate() {
        match outcome {
            Ok(result) => {
                let m = &result.metrics;
                eprintln!(
                    "{:<24} {:>9.2}% {:>8.2} {:>8.1}% {:>7}",
                    strategy.name,
                    m.total_return * 100.0,
                    m.sharpe_ratio,
                    m.max_drawdown * 100.0,
                    m.trade_count
                );
                results.push((index, result));
            }
            Err(e) => {
                eprintln!("{:<24} error: {e}", strategy.name);
                first_failure.get_or_insert((&e).into());
            }
        }
    }

    match out {
        Some(path) => {
            if let Err(e) = JsonReportAdapter::new(true).write_batch(&results, path) {
                return fail(&e);
            }
            eprintln!("\nResults written next to: {}", path.display());
        }
        None => match serde_json::to_string_pretty(
            &results.iter().map(|(_, r)| r).collect::<Vec<_>>(),
        ) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                return fail(&FluxbackError::Report {
                    reason: e.to_string(),
                });
            }
        },
    }

    first_failure.unwrap_or(ExitCode::SUCCESS)
}

fn run_stats(data_path: &Path, symbol: Option<&str>) -> ExitCode {
    let series = match load_series(data_path, symbol, None) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let Some(stats) = series.stats() else {
        return fail(&FluxbackError::InsufficientData {
            bars: 0,
            minimum: 1,
        });
    };

    eprintln!("Bars:             {}", stats.bars);
    eprintln!("Range:            {} .. {}", stats.start, stats.end);
    eprintln!("Return Mean:      {:.6}", stats.return_mean);
    eprintln!("Return StdDev:    {:.6}", stats.return_stddev);
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&FluxbackError::Report {
            reason: e.to_string(),
        }),
    }
}

fn print_summary(result: &BacktestResult) {
    let m: &Metrics = &result.metrics;
    eprintln!("\n=== Results: {} ===", result.strategy);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", m.trade_count);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    match m.profit_factor {
        Some(pf) => eprintln!("Profit Factor:    {pf:.2}"),
        None => eprintln!("Profit Factor:    n/a"),
    }
    eprintln!("Final Equity:     {:.2}", m.final_equity);
    if result.rejected_orders > 0 {
        eprintln!("Rejected Orders:  {}", result.rejected_orders);
    }
    for (regime, count) in &m.trades_by_regime {
        let pnl = m.pnl_by_regime.get(regime).copied().unwrap_or(0.0);
        eprintln!("  {regime:<9} trades: {count:>4}  pnl: {pnl:.2}");
    }
}
