//! Confluence engine CLI and runtime
//!
//! Wires providers, analytics, the per-underlying scalpers and the alert
//! engine together, and offers config tooling plus a one-off Greeks
//! calculator.

use alerts::{AlertEngine, AlertSettings, LogNotifier, MarketView};
use analytics::black_scholes::{black_scholes_greeks, black_scholes_price, d1_d2, implied_volatility, intrinsic_value};
use analytics::{AnalyticsCoordinator, BsInputs};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Cli, Commands, OptionKind};
use common::{OptionType, ShutdownController};
use config::{generate_default_config, load_config, save_config, validate_config, MasterConfig};
use observability::{init_logging, init_metrics, LogSettings};
use providers::{ChainUpdate, DataProviders, Pipeline};
use scalper::{ScalperEvent, ScalperManager, ScalperSettings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One-minute bars requested per underlying at startup
const WARM_UP_BARS: usize = 120;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start { config } => start_engine(config).await,
        Commands::Validate { config } => {
            init_logging("confluence", &LogSettings::default())?;
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("confluence", &LogSettings::default())?;
            init_command(output).await
        }
        Commands::Greeks {
            spot,
            strike,
            days,
            vol,
            rate,
            option_type,
            price,
        } => greeks_command(spot, strike, days, vol, rate, option_type, price),
    }
}

fn load_validated<P: AsRef<Path>>(config_path: P) -> Result<MasterConfig> {
    let config = load_config(config_path)?;
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!(
            "Cannot start engine due to {} configuration error(s)",
            report.errors.len()
        );
    }
    Ok(config)
}

async fn start_engine<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let config = load_validated(config_path)?;

    let logging = LogSettings::new(
        &config.logging.format,
        config.logging.level.clone(),
        config.logging.modules.clone(),
    );
    init_logging(&config.app.name, &logging)?;
    info!(app = %config.app.name, environment = %config.app.environment, "Confluence engine starting");

    if let Some(metrics) = config.metrics.as_ref().filter(|m| m.enabled) {
        init_metrics(metrics.port)?;
    }

    let shutdown = ShutdownController::with_ctrl_c();

    let providers = DataProviders::from_config(&config.providers, &config.underlyings)
        .context("No usable data providers configured")?;
    let coordinator = AnalyticsCoordinator::from_config(&config);
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(providers),
        coordinator.clone(),
        Duration::from_secs(config.providers.poll_interval_secs.max(1)),
    ));

    let underlyings: Vec<String> = config.enabled_underlyings().map(|u| u.symbol.clone()).collect();
    for underlying in &underlyings {
        pipeline.warm_up(underlying, WARM_UP_BARS).await;
    }

    let ledger = scalper::ledger::from_config(&config.ledger_or_default());
    let manager = Arc::new(ScalperManager::new(
        ScalperSettings::from(&config.scalper),
        ledger,
        &shutdown.token(),
    ));
    if config.scalper.enabled {
        for underlying in config.enabled_underlyings().filter(|u| u.scalp) {
            manager.start(&underlying.symbol, None).await?;
        }
    }

    let alert_config = config.alerts_or_default();
    let alert_engine = Arc::new(AlertEngine::new(AlertSettings::from(&alert_config)));
    alert_engine.add_notifier(Arc::new(LogNotifier));
    if alert_config.presets {
        for underlying in &underlyings {
            alert_engine.install_presets(underlying)?;
        }
    }

    let stream = match pipeline.start_stream(&underlyings, shutdown.child_token()).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "No live stream; running on polled chains only");
            None
        }
    };

    for task in pipeline.spawn_ingestion(&underlyings, &shutdown.token()) {
        shutdown.track(task);
    }
    shutdown.track(spawn_chain_consumer(
        pipeline.clone(),
        manager.clone(),
        alert_engine.clone(),
        shutdown.child_token(),
    ));
    shutdown.track(spawn_tick_router(pipeline.clone(), manager.clone(), shutdown.child_token()));
    shutdown.track(spawn_event_logger(manager.clone(), shutdown.child_token()));
    if let Some(stream) = stream {
        shutdown.track(stream);
    }

    info!(
        underlyings = underlyings.len(),
        scalpers = manager.running().len(),
        alerts = alert_engine.len(),
        "Engine running; press Ctrl+C to stop"
    );
    shutdown.wait().await;

    let mut unflushed = 0;
    for (underlying, result) in manager.stop_all().await {
        match result {
            Ok(status) => info!(
                underlying = %underlying,
                trades = status.trades_closed,
                pnl = status.realized_pnl,
                "Scalper closed"
            ),
            Err(e) => {
                unflushed += 1;
                error!(underlying = %underlying, error = %e, "Scalper could not flush its open trade");
            }
        }
    }

    let failed = shutdown.drain(SHUTDOWN_GRACE).await;
    if failed > 0 {
        warn!(failed, "Some background tasks did not stop cleanly");
    }

    if unflushed > 0 {
        anyhow::bail!("{} scalper(s) stopped with an unrecorded exit", unflushed);
    }
    info!("Confluence engine stopped");
    Ok(())
}

/// Feed each analysed chain into its scalper and the alert engine
fn spawn_chain_consumer(
    pipeline: Arc<Pipeline>,
    manager: Arc<ScalperManager>,
    alert_engine: Arc<AlertEngine>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut updates = pipeline.subscribe_updates();
    tokio::spawn(async move {
        loop {
            let update: ChainUpdate = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = updates.recv() => match received {
                    Ok(update) => update,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Chain consumer lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let underlying = update.underlying.as_str();
            let coordinator = pipeline.coordinator();

            if manager.is_running(underlying) {
                match manager.sync_from(coordinator, underlying).await {
                    Ok(Some(legs)) => {
                        let symbols: Vec<String> = legs.symbols().iter().map(|s| s.to_string()).collect();
                        if let Err(e) = pipeline.watch(&symbols).await {
                            debug!(underlying, error = %e, "Leg subscription skipped");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(underlying, error = %e, "Scalper sync failed"),
                }
            }

            let now = Utc::now();
            let view = MarketView::capture(coordinator, underlying, now).await;
            let fired = alert_engine.evaluate(&view, now).await;
            if !fired.is_empty() {
                debug!(underlying, fired = fired.len(), "Alerts fired");
            }
        }
    })
}

fn spawn_tick_router(pipeline: Arc<Pipeline>, manager: Arc<ScalperManager>, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut ticks = pipeline.subscribe_ticks();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = ticks.recv() => match received {
                    Ok(tick) => {
                        manager.route_tick(&tick);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Tick router lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn spawn_event_logger(manager: Arc<ScalperManager>, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            };
            match event {
                ScalperEvent::Exited(record) => info!(
                    underlying = %record.underlying,
                    leg = %record.leg,
                    reason = %record.exit_reason,
                    pnl = record.realized_pnl,
                    "Trade closed"
                ),
                ScalperEvent::LedgerFailed { trade_id, reason, error } => error!(
                    trade_id = %trade_id,
                    reason = %reason,
                    error = %error,
                    "Trade exit not recorded; retrying on next event"
                ),
                _ => {}
            }
        }
    })
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("App: {} ({})", config.app.name, config.app.environment);
    println!(
        "Underlyings: {}",
        config
            .enabled_underlyings()
            .map(|u| u.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Provider sources: {}", config.providers.sources.len());
    println!("Scalper: {}", if config.scalper.enabled { "enabled" } else { "disabled" });

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Point providers.sources at your replay fixtures or keep the static source");
    println!("  2. Adjust underlyings, scalper risk and alert settings");
    println!("  3. Run 'confluence validate --config {:?}' to check configuration", output_path);
    println!("  4. Run 'confluence start --config {:?}' to start the engine", output_path);

    Ok(())
}

fn greeks_command(
    spot: f64,
    strike: f64,
    days: f64,
    vol: f64,
    rate: f64,
    kind: OptionKind,
    price: Option<f64>,
) -> Result<()> {
    let option_type = match kind {
        OptionKind::Call => OptionType::Call,
        OptionKind::Put => OptionType::Put,
    };
    let defaults = generate_default_config().greeks;
    let mut inputs = BsInputs {
        spot,
        strike,
        time: days / 365.0,
        vol,
        rate,
        option_type,
    };

    if let Some(market) = price {
        let solved = implied_volatility(market, &inputs, vol, defaults.iv_tolerance, defaults.iv_max_iterations);
        println!(
            "Implied vol: {:.4} ({:?} confidence, {} iterations)",
            solved.vol, solved.confidence, solved.iterations
        );
        inputs = inputs.with_vol(solved.vol);
    }

    let (Some((d1, d2)), Some(theoretical), Some(greeks)) =
        (d1_d2(&inputs), black_scholes_price(&inputs), black_scholes_greeks(&inputs))
    else {
        anyhow::bail!("Inputs are outside the model's domain (spot, strike, days and vol must be positive)");
    };
    let intrinsic = intrinsic_value(spot, strike, option_type);
    let reference = price.unwrap_or(theoretical);

    println!("{} {} @ spot {} ({} days, vol {:.4}, rate {:.4})", strike, kind.as_str(), spot, days, inputs.vol, rate);
    println!("  d1           {:>12.4}", d1);
    println!("  d2           {:>12.4}", d2);
    println!("  price        {:>12.4}", theoretical);
    println!("  intrinsic    {:>12.4}", intrinsic);
    println!("  time value   {:>12.4}", (reference - intrinsic).max(0.0));
    println!("  delta        {:>12.4}", greeks.delta);
    println!("  gamma        {:>12.6}", greeks.gamma);
    println!("  theta / day  {:>12.4}", greeks.theta);
    println!("  vega / 1%    {:>12.4}", greeks.vega);
    println!("  rho / 1%     {:>12.4}", greeks.rho);
    Ok(())
}
