//! Command-line entry point. No HTTP server: every operation the illustrative
//! REST surface describes is reachable as a subcommand instead, the same way
//! `rustrade`'s `bin/optimize.rs`/`bin/benchmark.rs` expose batch tooling
//! without a long-running service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use krw_eth_engine::application::job_runner::{BacktestTask, JobRunner, TaskFuture};
use krw_eth_engine::application::orchestrators::tp_sl::ExitStyle;
use krw_eth_engine::application::orchestrators::{self, ThresholdMode, resolve_threshold};
use krw_eth_engine::application::{ingestion, trading};
use krw_eth_engine::config::Config;
use krw_eth_engine::domain::cusum::CusumSignalStore;
use krw_eth_engine::domain::fold::{MAX_FOLD, MIN_FOLD, fold_by_number};
use krw_eth_engine::domain::prediction::Prediction;
use krw_eth_engine::domain::repositories::{AccountRepository, BacktestJobRepository, CandleRepository, PredictionRepository, TradeOrderRepository};
use krw_eth_engine::domain::sizing::PositionSizer;
use krw_eth_engine::infrastructure::csv_loader::{load_cusum_csv, load_prediction_csv};
use krw_eth_engine::infrastructure::exchange::UpbitClient;
use krw_eth_engine::infrastructure::observability::{Metrics, MetricsReporter};
use krw_eth_engine::infrastructure::persistence::{
    Database, SqliteAccountRepository, SqliteBacktestJobRepository, SqliteCandleRepository, SqlitePredictionRepository, SqliteTradeOrderRepository,
};

#[derive(Parser)]
#[command(author, version, about = "KRW-ETH backtesting and data engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Historical data ingestion (C9 + C10)
    Ingest {
        #[command(subcommand)]
        command: IngestCommands,
    },
    /// CSV data loading (C1)
    Data {
        #[command(subcommand)]
        command: DataCommands,
    },
    /// Backtest orchestration (C6/C7/C8)
    Backtest {
        #[command(subcommand)]
        command: BacktestCommands,
    },
    /// Live-trading collaborator
    Trading {
        #[command(subcommand)]
        command: TradingCommands,
    },
}

#[derive(Subcommand)]
enum IngestCommands {
    /// Backfill minute candles down to `start` from today (or from the
    /// existing store's oldest row, whichever resumes further along).
    Minutes {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        #[arg(long)]
        start: NaiveDate,
    },
    /// Backfill minute candles far enough back to cover every signal in the
    /// given CUSUM CSV, clipping (with a warning) if the signal range runs
    /// into the future.
    ForSignals {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        cusum_csv: PathBuf,
    },
}

#[derive(Subcommand)]
enum DataCommands {
    /// Load a per-(fold, model) prediction CSV, replacing any existing rows for that key.
    LoadPredictions {
        path: PathBuf,
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        #[arg(long)]
        fold: u32,
        #[arg(long)]
        model: String,
    },
    /// Load the master CUSUM signal CSV into the in-memory cache (not persisted).
    LoadCusum { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum SizerArg {
    ConservativeKelly,
    EstimationRiskKelly,
    HalfKelly,
    Fixed100Percent,
    CurrentKellyTimesConfidence,
}

impl From<SizerArg> for PositionSizer {
    fn from(value: SizerArg) -> Self {
        match value {
            SizerArg::ConservativeKelly => PositionSizer::ConservativeKelly,
            SizerArg::EstimationRiskKelly => PositionSizer::EstimationRiskKelly,
            SizerArg::HalfKelly => PositionSizer::HalfKelly,
            SizerArg::Fixed100Percent => PositionSizer::Fixed100Percent,
            SizerArg::CurrentKellyTimesConfidence => PositionSizer::CurrentKellyTimesConfidence,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExitStyleArg {
    Single,
    Laddered,
}

impl From<ExitStyleArg> for ExitStyle {
    fn from(value: ExitStyleArg) -> Self {
        match value {
            ExitStyleArg::Single => ExitStyle::Single,
            ExitStyleArg::Laddered => ExitStyle::Laddered,
        }
    }
}

/// Which prediction column a confidence threshold is computed/applied against.
#[derive(Clone, Copy, ValueEnum)]
enum ConfidenceColumnArg {
    /// `PRED_PROBA_UP`, range [0, 1].
    PredProbaUp,
    /// `CONFIDENCE`, range [0, 0.5].
    Confidence,
}

#[derive(Subcommand)]
enum BacktestCommands {
    /// Run the TP/SL orchestrator once for one (fold, model).
    TpSl {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        #[arg(long)]
        fold: u32,
        #[arg(long)]
        model: String,
        #[arg(long, value_enum, default_value = "conservative-kelly")]
        sizer: SizerArg,
        #[arg(long, value_enum, default_value = "single")]
        exit_style: ExitStyleArg,
        #[arg(long, default_value = "7")]
        holding_period_days: i64,
        #[arg(long, default_value = "10000000")]
        initial_capital: Decimal,
        /// Confidence threshold; predictions below it are excluded.
        #[arg(long)]
        confidence_threshold: Option<Decimal>,
        /// Interpret `confidence_threshold` as a quantile (0-1) instead of a fixed value.
        #[arg(long, default_value_t = false)]
        quantile_threshold: bool,
        /// Which prediction column the threshold is computed/applied against.
        #[arg(long, value_enum, default_value = "pred-proba-up")]
        confidence_column: ConfidenceColumnArg,
    },
    /// Run the rule-based (golden-cross) orchestrator once for one fold.
    RuleBased {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        #[arg(long)]
        fold: u32,
        #[arg(long, default_value = "10000000")]
        initial_capital: Decimal,
    },
    /// Run the buy-and-hold orchestrator once for one fold.
    BuyAndHold {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        #[arg(long)]
        fold: u32,
        #[arg(long, default_value = "10000000")]
        initial_capital: Decimal,
    },
    /// Walk every fold in order, chaining capital through the fixed-fraction
    /// Kelly strand and independently through a buy-and-hold strand.
    RunSequential {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "1.0")]
        fixed_fraction_pct: Decimal,
        #[arg(long, default_value = "7")]
        holding_period_days: i64,
        #[arg(long, default_value = "10000000")]
        initial_capital: Decimal,
    },
    /// Submit an async batch of TP/SL backtests (one task per fold × model) and return a job id.
    SubmitBatch {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        /// Comma-separated fold numbers.
        #[arg(long)]
        folds: String,
        /// Comma-separated model names.
        #[arg(long)]
        models: String,
        #[arg(long, value_enum, default_value = "conservative-kelly")]
        sizer: SizerArg,
        #[arg(long, default_value = "7")]
        holding_period_days: i64,
        #[arg(long, default_value = "10000000")]
        initial_capital: Decimal,
    },
    /// Poll a submitted job's status and progress.
    JobStatus { job_id: Uuid },
    /// Fetch a completed job's per-task results.
    JobResults { job_id: Uuid },
    /// Run the CUSUM-signal orchestrator over a master signal CSV, optionally
    /// narrowed to one strategy/model/fold.
    Cusum {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        cusum_csv: PathBuf,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        fold: Option<u32>,
        #[arg(long, default_value = "10000000")]
        initial_capital: Decimal,
    },
}

#[derive(Subcommand)]
enum TradingCommands {
    /// Place a market buy for `amount` quote currency.
    Buy {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        amount: Decimal,
    },
    /// Place a market sell for `volume` base currency.
    Sell {
        #[arg(long, default_value = "KRW-ETH")]
        market: String,
        volume: Decimal,
    },
    /// List locally-stored orders.
    Orders,
    /// Sync every pending local order against the exchange.
    SyncAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    let metrics = Metrics::new()?;

    let candles = SqliteCandleRepository::new(db.pool.clone());
    let predictions = SqlitePredictionRepository::new(db.pool.clone());
    let jobs: Arc<dyn BacktestJobRepository> = Arc::new(SqliteBacktestJobRepository::new(db.pool.clone()));
    let orders = SqliteTradeOrderRepository::new(db.pool.clone());
    let accounts = SqliteAccountRepository::new(db.pool.clone());
    let client = UpbitClient::new(config.exchange.base_url.clone(), config.exchange.access_key.clone(), config.exchange.secret_key.clone(), metrics.clone());

    let result = match cli.command {
        Commands::Ingest { command } => run_ingest(command, &client, &candles, &config, &metrics).await,
        Commands::Data { command } => run_data(command, &predictions).await,
        Commands::Backtest { command } => run_backtest(command, &candles, &predictions, jobs.clone(), db.pool.clone(), &metrics).await,
        Commands::Trading { command } => run_trading(command, &client, &orders, &accounts, &config).await,
    };

    info!(target: "metrics", "{}", metrics.render());
    result
}

async fn run_ingest(command: IngestCommands, client: &UpbitClient, candles: &SqliteCandleRepository, config: &Config, metrics: &Metrics) -> Result<()> {
    // Backfills can run for a long time against a large history; report
    // progress on an interval instead of only once at process exit.
    let reporter = tokio::spawn(MetricsReporter::new(metrics.clone(), 30).run());

    match command {
        IngestCommands::Minutes { market, start } => {
            let runner = ingestion::MinuteCandleBackfill::new(client, candles, &config.ingestion, metrics);
            let outcome = runner.run(&market, start, chrono::Utc::now().date_naive()).await?;
            info!(?outcome, market, "minute-candle backfill finished");
        }
        IngestCommands::ForSignals { market, cusum_csv } => {
            let signals = load_cusum_csv(&cusum_csv)?;
            let store = CusumSignalStore::new(signals);
            let Some((earliest, latest)) = store.date_range() else {
                reporter.abort();
                info!("no signals in {} to backfill against", cusum_csv.display());
                return Ok(());
            };
            let outcome = ingestion::backfill_for_signals(client, candles, &config.ingestion, metrics, &market, earliest.date(), latest.date()).await?;
            info!(?outcome, market, "signal-coverage backfill finished");
        }
    }

    reporter.abort();
    Ok(())
}

async fn run_data(command: DataCommands, predictions: &SqlitePredictionRepository) -> Result<()> {
    match command {
        DataCommands::LoadPredictions { path, market, fold, model } => {
            let inserted = load_prediction_csv(predictions, &path, &market, fold, &model).await?;
            info!(inserted, fold, model, "loaded predictions");
        }
        DataCommands::LoadCusum { path } => {
            // Validates the CSV and reports what it would yield; `backtest cusum`
            // re-reads the same file for the actual run since each CLI
            // invocation is its own process with nothing to hand a cache to.
            let signals = load_cusum_csv(&path)?;
            let count = signals.len();
            let store = CusumSignalStore::new(signals);
            let summary = store.summary();
            info!(count, total_buy = summary.total_buy, overall_accuracy = ?summary.overall_accuracy, "loaded CUSUM signals");
        }
    }
    Ok(())
}

fn validate_fold(fold: u32) -> Result<()> {
    if fold_by_number(fold).is_none() {
        anyhow::bail!("fold {fold} is out of range [{MIN_FOLD}, {MAX_FOLD}]");
    }
    Ok(())
}

async fn run_backtest(
    command: BacktestCommands,
    candles: &SqliteCandleRepository,
    predictions: &SqlitePredictionRepository,
    jobs: Arc<dyn BacktestJobRepository>,
    pool: sqlx::SqlitePool,
    metrics: &Metrics,
) -> Result<()> {
    match command {
        BacktestCommands::TpSl {
            market,
            fold,
            model,
            sizer,
            exit_style,
            holding_period_days,
            initial_capital,
            confidence_threshold,
            quantile_threshold,
            confidence_column,
        } => {
            validate_fold(fold)?;
            let mut rows = predictions.find_by_fold_model(&market, fold, &model).await?;
            if let Some(threshold_input) = confidence_threshold {
                let column = |p: &Prediction| match confidence_column {
                    ConfidenceColumnArg::PredProbaUp => p.pred_proba_up,
                    ConfidenceColumnArg::Confidence => p.confidence,
                };
                let historical: Vec<Decimal> = rows.iter().map(column).collect();
                let mode = if quantile_threshold { ThresholdMode::Quantile(threshold_input) } else { ThresholdMode::Fixed(threshold_input) };
                let threshold = resolve_threshold(mode, &historical);
                rows.retain(|p| column(p) >= threshold);
            }
            let report = orchestrators::tp_sl::run_tp_sl_fold(candles, &market, fold, &rows, sizer.into(), exit_style.into(), holding_period_days, initial_capital).await?;
            record_backtest_metrics(metrics, "tp_sl", &report);
            print_report(&report);
        }
        BacktestCommands::RuleBased { market, fold, initial_capital } => {
            validate_fold(fold)?;
            let fold_config = fold_by_number(fold).expect("validated above");
            // 30 days of warm-up so the 4h-resampled SMA50 (needs ~8.3 days of
            // 4h bars) is populated before the fold's entry scan begins, plus
            // one trailing day so the last entry's exit window has candles.
            let window_start = (fold_config.start - chrono::Duration::days(30)).and_hms_opt(0, 0, 0).expect("midnight is valid");
            let window_end = (fold_config.end + chrono::Duration::days(1)).and_hms_opt(23, 59, 59).expect("end of day is valid");
            let minute_series = candles.find_range(&market, window_start, window_end).await?;
            let report = orchestrators::rule_based::run_rule_based_fold(candles, &market, fold_config, &minute_series, initial_capital).await?;
            record_backtest_metrics(metrics, "rule_based", &report);
            print_report(&report);
        }
        BacktestCommands::BuyAndHold { market, fold, initial_capital } => {
            validate_fold(fold)?;
            let fold_config = fold_by_number(fold).expect("validated above");
            let report = orchestrators::buy_and_hold::run_buy_and_hold_fold(candles, &market, fold_config, initial_capital).await?;
            record_backtest_metrics(metrics, "buy_and_hold", &report);
            print_report(&report);
        }
        BacktestCommands::RunSequential { market, model, fixed_fraction_pct, holding_period_days, initial_capital } => {
            let result = orchestrators::sequential::run_sequential_chain(candles, predictions, &market, &model, fixed_fraction_pct, holding_period_days, initial_capital).await?;
            for report in &result.kelly {
                record_backtest_metrics(metrics, "sequential_kelly", report);
                print_report(report);
            }
            for report in &result.buy_and_hold {
                record_backtest_metrics(metrics, "sequential_buy_and_hold", report);
                info!(fold = report.fold, final_capital = %report.final_capital, "buy-and-hold strand");
            }
        }
        BacktestCommands::SubmitBatch { market, folds, models, sizer, holding_period_days, initial_capital } => {
            let fold_numbers = parse_u32_list(&folds)?;
            let model_names: Vec<String> = models.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            for fold in &fold_numbers {
                validate_fold(*fold)?;
            }

            let mut tasks = Vec::new();
            for fold in &fold_numbers {
                for model in &model_names {
                    tasks.push(BacktestTask { fold: *fold, model: model.clone() });
                }
            }

            let runner = JobRunner::new(jobs, 4);
            let sizer: PositionSizer = sizer.into();
            let pool = pool.clone();
            let market = market.clone();

            let executor = Arc::new(move |task: BacktestTask| -> TaskFuture {
                let candles = SqliteCandleRepository::new(pool.clone());
                let predictions = SqlitePredictionRepository::new(pool.clone());
                let market = market.clone();
                Box::pin(async move {
                    let rows = predictions.find_by_fold_model(&market, task.fold, &task.model).await?;
                    orchestrators::tp_sl::run_tp_sl_fold(&candles, &market, task.fold, &rows, sizer, ExitStyle::Single, holding_period_days, initial_capital).await
                })
            });

            let job_id = runner.submit_batch(tasks, executor).await?;
            info!(%job_id, "submitted backtest batch");
            println!("{job_id}");
        }
        BacktestCommands::JobStatus { job_id } => {
            let runner = JobRunner::new(jobs, 4);
            match runner.get_status(job_id).await? {
                Some(view) => {
                    metrics.set_jobs_by_status(&format!("{:?}", view.job.status), 1.0);
                    println!("{:?} {}%", view.job.status, view.progress_pct);
                }
                None => println!("no such job"),
            }
        }
        BacktestCommands::JobResults { job_id } => {
            let runner = JobRunner::new(jobs, 4);
            for (fold, model, result_json) in runner.get_results(job_id).await? {
                println!("fold={fold} model={model} {result_json}");
            }
        }
        BacktestCommands::Cusum { market, cusum_csv, strategy, model, fold, initial_capital } => {
            let signals = load_cusum_csv(&cusum_csv)?;
            let store = CusumSignalStore::new(signals);
            let filter = orchestrators::cusum::CusumFilter { strategy, model, fold };
            let matching_signals: Vec<_> = store.buy_signals().into_iter().filter(|s| filter.matches(s)).collect();
            let report = orchestrators::cusum::run_cusum_fold(candles, &market, &store, &filter, initial_capital).await?;
            let aggregates = orchestrators::cusum::cusum_aggregates(&report, &matching_signals);
            record_backtest_metrics(metrics, "cusum", &report);
            print_report(&report);
            info!(
                mean_confidence = %aggregates.mean_confidence,
                mean_selectivity_pct = %aggregates.mean_selectivity_pct,
                mean_investment_ratio = %aggregates.mean_investment_ratio,
                win_rate_excluding_timeouts_pct = %aggregates.win_rate_excluding_timeouts_pct,
                "cusum aggregates"
            );
        }
    }
    Ok(())
}

fn parse_u32_list(csv: &str) -> Result<Vec<u32>> {
    csv.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().with_context(|| format!("invalid fold number: {s}")))
        .collect()
}

async fn run_trading(
    command: TradingCommands,
    client: &UpbitClient,
    orders: &dyn TradeOrderRepository,
    accounts: &dyn AccountRepository,
    config: &Config,
) -> Result<()> {
    match command {
        TradingCommands::Buy { market, amount } => {
            let order = trading::buy(client, orders, accounts, &config.backtest, &market, amount).await?;
            println!("{:?}", order.id);
        }
        TradingCommands::Sell { market, volume } => {
            let order = trading::sell(client, orders, accounts, &config.backtest, &market, volume).await?;
            println!("{:?}", order.id);
        }
        TradingCommands::Orders => {
            for order in orders.list().await? {
                println!("{} {:?} {:?} {}", order.id, order.side, order.status, order.amount);
            }
        }
        TradingCommands::SyncAll => {
            let synced = trading::sync_all(client, orders).await?;
            info!(synced, "synced pending orders against exchange");
        }
    }
    Ok(())
}

fn record_backtest_metrics(metrics: &Metrics, orchestrator: &str, report: &orchestrators::BacktestReport) {
    metrics.inc_backtest(orchestrator);
    for trade in &report.trades {
        metrics.inc_trade(&format!("{:?}", trade.exit_reason));
    }
    for reason in &report.skipped {
        metrics.inc_skip(&format!("{:?}", reason));
    }
}

fn print_report(report: &orchestrators::BacktestReport) {
    let period = match report.period {
        Some((start, end)) => format!("{start}..{end}"),
        None => "none".to_string(),
    };
    println!(
        "fold={} model={:?} strategy={:?} period={} trades={} skipped={} initial_capital={} final_capital={} return={}% avg_holding_days={} win_rate={}% mdd={}% sharpe={} avg_win={} avg_loss={} win_loss_ratio={}",
        report.fold,
        report.model,
        report.strategy,
        period,
        report.trades.len(),
        report.skipped.len(),
        report.initial_capital,
        report.final_capital,
        report.total_return_pct,
        report.average_holding_days,
        report.stats.win_rate_pct,
        report.stats.max_drawdown_pct,
        report.stats.sharpe,
        report.stats.avg_win,
        report.stats.avg_loss,
        report.stats.win_loss_ratio,
    );
}
