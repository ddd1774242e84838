mod api;
mod config;
mod db;
mod models;
mod repositories;
mod services;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use dotenv::dotenv;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

use crate::api::orca_api::OrcaApi;
use crate::config::AppConfig;
use crate::models::positions_model::PositionOpenOutcome;
use crate::repositories::job_repo::{InMemoryJobRepo, JobRepoTrait, PgJobRepo};
use crate::services::liquidity_service::OpenPositionRequest;
use crate::services::monitor_service::MonitorService;
use crate::services::pipeline_service::{constants::USDC_DECIMALS, PipelineService, PipelineStep, RunSummary};
use crate::services::wallet_service::{derive_wallet, derive_wallet_range};
use crate::utils::price_calcs::to_base_units;

#[derive(Parser, Debug)]
#[command(name = "lp-bot")]
#[command(about = "CEX withdrawal, bridge, swap and Orca liquidity across derived wallets")]
struct Cli {
    /// Plan every step without submitting anything
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print derived wallet addresses
    Wallets {
        #[arg(long, default_value_t = 0)]
        start: u32,
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
    /// Withdraw a random USDC amount from Bybit or Binance to a wallet
    Withdraw {
        #[arg(long)]
        wallet: u32,
    },
    /// Bridge USDC from the source chain to Solana
    Bridge {
        #[arg(long)]
        wallet: u32,
        /// USDC, whole units
        #[arg(long)]
        amount: f64,
    },
    /// Swap USDC into the pool's other token
    Swap {
        #[arg(long)]
        wallet: u32,
        #[arg(long)]
        amount: f64,
    },
    /// Open and fund an Orca position with USDC input
    ProvideLiquidity {
        #[arg(long)]
        wallet: u32,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        lower_pct: Option<f64>,
        #[arg(long)]
        upper_pct: Option<f64>,
    },
    /// Run the whole chain once for a wallet range
    Run {
        #[arg(long, default_value_t = 0)]
        start: u32,
        /// Exclusive. Defaults to WALLET_COUNT.
        #[arg(long)]
        end: Option<u32>,
        #[arg(long, value_enum, default_value_t = StartStep::Withdraw)]
        from: StartStep,
    },
    /// List a wallet's positions in the configured pool
    Positions {
        #[arg(long)]
        wallet: u32,
    },
    /// Poll balances, drive pending steps and raise alerts until Ctrl-C
    Monitor {
        #[arg(long, default_value_t = 0)]
        start: u32,
        #[arg(long)]
        end: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StartStep {
    Withdraw,
    Bridge,
    Swap,
    Liquidity,
}

impl From<StartStep> for PipelineStep {
    fn from(step: StartStep) -> Self {
        match step {
            StartStep::Withdraw => PipelineStep::Withdraw,
            StartStep::Bridge => PipelineStep::Bridge,
            StartStep::Swap => PipelineStep::Swap,
            StartStep::Liquidity => PipelineStep::Liquidity,
        }
    }
}

async fn job_repo(config: &AppConfig) -> Result<Arc<dyn JobRepoTrait>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgJobRepo::new(db::connect(url).await?))),
        None => {
            info!("DATABASE_URL not set, bridge jobs are kept in memory");
            Ok(Arc::new(InMemoryJobRepo::new()))
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for result in &summary.results {
        let status = if result.success {
            "OK".green().bold()
        } else {
            "FAIL".red().bold()
        };
        println!("{} wallet {} ({})", status, result.wallet_index, result.solana_address);
        for step in &result.steps {
            let marker = match (step.success, step.skipped) {
                (_, true) => "skip".dimmed(),
                (true, false) => "ok".green(),
                (false, false) => "fail".red(),
            };
            match &step.error {
                Some(error) => println!("    {:<10} {} {}", format!("{:?}", step.step), marker, error.yellow()),
                None => println!("    {:<10} {}", format!("{:?}", step.step), marker),
            }
        }
    }
    println!(
        "{} succeeded, {} failed of {}",
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.wallets
    );
}

fn report_position(outcome: &PositionOpenOutcome) -> Result<bool> {
    if outcome.needs_reconciliation() {
        warn!(
            "Position NFT {} exists without liquidity, position account {}",
            outcome.position_mint.as_deref().unwrap_or("?"),
            outcome.position_address.as_deref().unwrap_or("?")
        );
    }
    print_json(outcome)?;
    Ok(outcome.success)
}

async fn run(cli: Cli) -> Result<bool> {
    if let Command::Wallets { start, count } = cli.command {
        let mnemonic = std::env::var("WALLET_MNEMONIC").context("WALLET_MNEMONIC must be set")?;
        for wallet in derive_wallet_range(&mnemonic, start, start.saturating_add(count))? {
            println!(
                "{:>4}  {}  {}",
                wallet.index,
                wallet.solana_address().to_string().cyan(),
                wallet.evm_address()
            );
        }
        return Ok(true);
    }

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let dry_run = cli.dry_run || config.dry_run;
    if dry_run {
        warn!("Dry run: nothing will be submitted");
    }
    let pipeline = PipelineService::from_config(&config, job_repo(&config).await?)?;

    match cli.command {
        Command::Wallets { .. } => Ok(true),
        Command::Withdraw { wallet } => {
            let wallet = derive_wallet(&config.wallet_mnemonic, wallet)?;
            let outcome = pipeline
                .withdrawals()
                .withdraw_random(&wallet.evm_address().to_string(), dry_run)
                .await;
            print_json(&outcome)?;
            Ok(outcome.success)
        }
        Command::Bridge { wallet, amount } => {
            let wallet = derive_wallet(&config.wallet_mnemonic, wallet)?;
            let outcome = pipeline
                .bridge()
                .bridge(&wallet, to_base_units(amount, USDC_DECIMALS), dry_run)
                .await?;
            print_json(&outcome)?;
            Ok(outcome.success)
        }
        Command::Swap { wallet, amount } => {
            let wallet = derive_wallet(&config.wallet_mnemonic, wallet)?;
            let pool = pipeline.pool_context().await?;
            let outcome = pipeline
                .swap()
                .swap(
                    &wallet,
                    &pool.usdc_mint,
                    &pool.target_mint,
                    to_base_units(amount, USDC_DECIMALS),
                    dry_run,
                )
                .await?;
            print_json(&outcome)?;
            Ok(outcome.success)
        }
        Command::ProvideLiquidity {
            wallet,
            amount,
            lower_pct,
            upper_pct,
        } => {
            let wallet = derive_wallet(&config.wallet_mnemonic, wallet)?;
            let pool = pipeline.pool_context().await?;
            let request = OpenPositionRequest {
                pool: pool.address,
                input_mint: pool.usdc_mint,
                input_amount: to_base_units(amount, USDC_DECIMALS),
                lower_pct: lower_pct.unwrap_or(config.lp_lower_pct),
                upper_pct: upper_pct.unwrap_or(config.lp_upper_pct),
            };
            let outcome = pipeline
                .liquidity()
                .open_position(&wallet, &request, dry_run)
                .await?;
            report_position(&outcome)
        }
        Command::Run { start, end, from } => {
            let wallets =
                derive_wallet_range(&config.wallet_mnemonic, start, end.unwrap_or(config.wallet_count))?;
            let summary = pipeline.run(&wallets, from.into(), dry_run).await;
            print_summary(&summary);
            print_json(&summary)?;
            Ok(summary.failed == 0)
        }
        Command::Positions { wallet } => {
            let wallet = derive_wallet(&config.wallet_mnemonic, wallet)?;
            let pool = pipeline.pool_context().await?;
            let positions = pipeline
                .liquidity()
                .list_positions(&wallet.solana_address(), Some(&pool.address))
                .await?;
            match OrcaApi::new().get_pool_info(&pool.address.to_string()).await {
                Ok(info) => println!(
                    "{} {}  price {}  tvl {}",
                    info.name().bold(),
                    pool.address,
                    info.price.as_deref().unwrap_or("-"),
                    info.tvl_usdc.as_deref().unwrap_or("-")
                ),
                Err(e) => warn!("Pool metadata unavailable: {:#}", e),
            }
            println!(
                "on-chain price {:.6} USDC, tick {}",
                pool.price, pool.tick_current_index
            );
            if positions.is_empty() {
                println!("No positions in pool {}", pool.address);
            }
            for live in positions {
                let position = &live.position;
                let range = if position.is_in_range(pool.tick_current_index) {
                    "in range".green()
                } else {
                    "out of range".red()
                };
                println!(
                    "{}  [{}, {}] {}  liquidity {}  fees owed a={} b={}",
                    live.address,
                    position.tick_lower_index,
                    position.tick_upper_index,
                    range,
                    position.liquidity,
                    position.fee_owed_a,
                    position.fee_owed_b
                );
            }
            Ok(true)
        }
        Command::Monitor { start, end } => {
            let wallets =
                derive_wallet_range(&config.wallet_mnemonic, start, end.unwrap_or(config.wallet_count))?;
            let mut monitor = MonitorService::new(pipeline, &config);
            monitor.run(&wallets, dry_run).await?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
