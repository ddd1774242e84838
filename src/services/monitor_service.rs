use anyhow::Context;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::models::wallet_model::{Wallet, WalletBalances};
use crate::services::pipeline_service::{PipelineService, PipelineStep};

pub mod constants {
    pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RpcUnhealthy,
    PoolUnavailable,
    BalanceReadFailed,
    LowSol,
    PositionOutOfRange,
    ActionFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub wallet_index: Option<u32>,
    pub message: String,
}

impl Alert {
    fn wallet(kind: AlertKind, wallet_index: u32, message: String) -> Self {
        Self {
            kind,
            wallet_index: Some(wallet_index),
            message,
        }
    }

    fn global(kind: AlertKind, message: String) -> Self {
        Self {
            kind,
            wallet_index: None,
            message,
        }
    }
}

/// What the monitor should drive for a wallet, mapped onto the pipeline
/// step it starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Fund,
    Bridge,
    Deploy,
}

impl MonitorAction {
    pub fn start_step(self) -> PipelineStep {
        match self {
            MonitorAction::Fund => PipelineStep::Withdraw,
            MonitorAction::Bridge => PipelineStep::Bridge,
            MonitorAction::Deploy => PipelineStep::Swap,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub min_sol: f64,
    pub min_usdc_to_deploy: f64,
    pub enable_cex: bool,
}

/// Alerts and at most one action for a wallet's latest balances. A wallet
/// short on SOL gets no action since it cannot pay fees.
pub fn decide(
    wallet_index: u32,
    balances: &WalletBalances,
    thresholds: &Thresholds,
) -> (Vec<Alert>, Option<MonitorAction>) {
    let mut alerts = Vec::new();

    if balances.positions_out_of_range > 0 {
        alerts.push(Alert::wallet(
            AlertKind::PositionOutOfRange,
            wallet_index,
            format!(
                "{} of {} positions out of range",
                balances.positions_out_of_range, balances.open_positions
            ),
        ));
    }

    if balances.sol < thresholds.min_sol {
        alerts.push(Alert::wallet(
            AlertKind::LowSol,
            wallet_index,
            format!("{:.4} SOL below minimum {:.4}", balances.sol, thresholds.min_sol),
        ));
        return (alerts, None);
    }

    let action = if balances.usdc >= thresholds.min_usdc_to_deploy {
        Some(MonitorAction::Deploy)
    } else if balances.evm_usdc >= thresholds.min_usdc_to_deploy {
        Some(MonitorAction::Bridge)
    } else if thresholds.enable_cex && balances.open_positions == 0 && balances.target_token == 0.0 {
        Some(MonitorAction::Fund)
    } else {
        None
    };
    (alerts, action)
}

/// Suppresses an alert of the same kind for the same wallet until the
/// cooldown has passed since it was last sent.
pub struct AlertDeduplicator {
    cooldown: Duration,
    last_sent: HashMap<(AlertKind, Option<u32>), Instant>,
}

impl AlertDeduplicator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    pub fn should_send(&mut self, alert: &Alert, now: Instant) -> bool {
        let key = (alert.kind, alert.wallet_index);
        match self.last_sent.get(&key) {
            Some(sent) if now.duration_since(*sent) < self.cooldown => false,
            _ => {
                self.last_sent.insert(key, now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub wallets_checked: usize,
    pub alerts_sent: usize,
    pub actions_run: usize,
}

pub struct MonitorService {
    pipeline: PipelineService,
    thresholds: Thresholds,
    interval: Duration,
    dedup: AlertDeduplicator,
    balances: HashMap<u32, WalletBalances>,
    funded: HashSet<u32>,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl MonitorService {
    pub fn new(pipeline: PipelineService, config: &AppConfig) -> Self {
        Self {
            pipeline,
            thresholds: Thresholds {
                min_sol: config.min_sol_balance,
                min_usdc_to_deploy: config.min_usdc_to_deploy,
                enable_cex: config.enable_cex,
            },
            interval: Duration::from_secs(config.monitor_interval_secs),
            dedup: AlertDeduplicator::new(Duration::from_secs(config.alert_cooldown_secs)),
            balances: HashMap::new(),
            funded: HashSet::new(),
            webhook_url: config.alert_webhook_url.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub fn balances(&self) -> &HashMap<u32, WalletBalances> {
        &self.balances
    }

    /// Returns whether the alert went out.
    async fn alert(&mut self, alert: Alert) -> bool {
        if !self.dedup.should_send(&alert, Instant::now()) {
            debug!("Suppressed repeat alert {:?} for {:?}", alert.kind, alert.wallet_index);
            return false;
        }

        match alert.wallet_index {
            Some(index) => warn!("ALERT [{:?}] wallet {}: {}", alert.kind, index, alert.message),
            None => warn!("ALERT [{:?}]: {}", alert.kind, alert.message),
        }

        if let Some(url) = &self.webhook_url {
            let sent = self
                .client
                .post(url)
                .timeout(Duration::from_secs(constants::WEBHOOK_TIMEOUT_SECS))
                .json(&alert)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(e) = sent {
                warn!("Alert webhook failed: {}", e);
            }
        }
        true
    }

    pub async fn tick(&mut self, wallets: &[Wallet], dry_run: bool) -> TickReport {
        let mut report = TickReport::default();

        if let Err(e) = self.pipeline.rpc().health().await {
            let alert = Alert::global(AlertKind::RpcUnhealthy, e.to_string());
            report.alerts_sent += self.alert(alert).await as usize;
            return report;
        }

        let pool = match self.pipeline.pool_context().await {
            Ok(pool) => pool,
            Err(e) => {
                let alert = Alert::global(AlertKind::PoolUnavailable, e.to_string());
                report.alerts_sent += self.alert(alert).await as usize;
                return report;
            }
        };

        for wallet in wallets {
            let balances = match self.pipeline.read_balances(wallet, &pool).await {
                Ok(balances) => balances,
                Err(e) => {
                    let alert =
                        Alert::wallet(AlertKind::BalanceReadFailed, wallet.index, e.to_string());
                    report.alerts_sent += self.alert(alert).await as usize;
                    continue;
                }
            };
            report.wallets_checked += 1;

            if self.balances.get(&wallet.index) != Some(&balances) {
                debug!("Wallet {} balances: {:?}", wallet.index, balances);
            }
            self.balances.insert(wallet.index, balances);

            let (alerts, action) = decide(wallet.index, &balances, &self.thresholds);
            for alert in alerts {
                report.alerts_sent += self.alert(alert).await as usize;
            }

            let Some(action) = action else { continue };
            if action == MonitorAction::Fund && !self.funded.insert(wallet.index) {
                continue;
            }

            info!("Wallet {}: monitor triggers {:?}", wallet.index, action);
            report.actions_run += 1;
            let result = self
                .pipeline
                .run_wallet(wallet, action.start_step(), dry_run)
                .await;
            if !result.success {
                let reason = result
                    .steps
                    .last()
                    .and_then(|step| step.error.clone())
                    .unwrap_or_else(|| "unknown failure".to_string());
                let alert = Alert::wallet(
                    AlertKind::ActionFailed,
                    wallet.index,
                    format!("{:?} failed: {}", action, reason),
                );
                report.alerts_sent += self.alert(alert).await as usize;
            }
        }
        report
    }

    /// Ticks on the configured interval until Ctrl-C. A tick in progress is
    /// finished before stopping.
    pub async fn run(&mut self, wallets: &[Wallet], dry_run: bool) -> anyhow::Result<()> {
        info!(
            "Monitoring {} wallets every {}s",
            wallets.len(),
            self.interval.as_secs()
        );
        if let Some(report) = self.pipeline.resume_bridges(dry_run).await {
            if !report.unreconciled.is_empty() {
                self.alert(Alert::global(
                    AlertKind::ActionFailed,
                    format!(
                        "bridge jobs may have sent funds without a recorded tx: {}",
                        report.unreconciled.join(", ")
                    ),
                ))
                .await;
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(wallets, dry_run).await;
                    info!(
                        "Monitor tick: {} wallets checked, {} alerts, {} actions",
                        report.wallets_checked, report.alerts_sent, report.actions_run
                    );
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    info!("Ctrl-C received, stopping monitor");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{test_config, TEST_MNEMONIC};
    use crate::services::pipeline_service::tests::harness;
    use crate::services::wallet_service::derive_wallet_range;

    fn thresholds() -> Thresholds {
        Thresholds {
            min_sol: 0.05,
            min_usdc_to_deploy: 10.0,
            enable_cex: true,
        }
    }

    fn balances(sol: f64, usdc: f64, evm_usdc: f64) -> WalletBalances {
        WalletBalances {
            sol,
            usdc,
            evm_usdc,
            ..WalletBalances::default()
        }
    }

    #[test]
    fn test_decide_prefers_the_furthest_along_step() {
        let (_, action) = decide(0, &balances(1.0, 50.0, 50.0), &thresholds());
        assert_eq!(action, Some(MonitorAction::Deploy));

        let (_, action) = decide(0, &balances(1.0, 1.0, 50.0), &thresholds());
        assert_eq!(action, Some(MonitorAction::Bridge));

        let (_, action) = decide(0, &balances(1.0, 0.0, 0.0), &thresholds());
        assert_eq!(action, Some(MonitorAction::Fund));

        let mut funded = balances(1.0, 0.0, 0.0);
        funded.open_positions = 1;
        let (alerts, action) = decide(0, &funded, &thresholds());
        assert!(alerts.is_empty());
        assert_eq!(action, None);
    }

    #[test]
    fn test_low_sol_alerts_without_acting() {
        let mut low = balances(0.01, 50.0, 0.0);
        low.open_positions = 2;
        low.positions_out_of_range = 1;

        let (alerts, action) = decide(3, &low, &thresholds());

        assert_eq!(action, None);
        let kinds: Vec<_> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::PositionOutOfRange, AlertKind::LowSol]);
        assert!(alerts.iter().all(|a| a.wallet_index == Some(3)));
    }

    #[test]
    fn test_deduplicator_suppresses_repeats_within_cooldown() {
        let mut dedup = AlertDeduplicator::new(Duration::from_secs(3600));
        let start = Instant::now();
        let alert = Alert::wallet(AlertKind::LowSol, 1, "low".to_string());
        let other_wallet = Alert::wallet(AlertKind::LowSol, 2, "low".to_string());

        assert!(dedup.should_send(&alert, start));
        assert!(!dedup.should_send(&alert, start + Duration::from_secs(60)));
        assert!(dedup.should_send(&other_wallet, start + Duration::from_secs(60)));
        assert!(!dedup.should_send(&alert, start + Duration::from_secs(3599)));
        assert!(dedup.should_send(&alert, start + Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_tick_records_balances_and_deploys() {
        let harness = harness(0.5, false);
        let mut config = test_config();
        config.enable_cex = false;
        let mut monitor = MonitorService::new(harness.pipeline, &config);
        let wallets = derive_wallet_range(TEST_MNEMONIC, 0, 1).unwrap();

        let report = monitor.tick(&wallets, true).await;

        assert_eq!(report.wallets_checked, 1);
        assert_eq!(report.actions_run, 1);
        assert_eq!(monitor.balances()[&0].usdc, 100.0);
        assert_eq!(harness.rpc.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_low_sol_alert_is_sent_once() {
        let harness = harness(0.5, false);
        let mut config = test_config();
        config.min_sol_balance = 1.0;
        let mut monitor = MonitorService::new(harness.pipeline, &config);
        let wallets = derive_wallet_range(TEST_MNEMONIC, 0, 1).unwrap();

        let first = monitor.tick(&wallets, true).await;
        let second = monitor.tick(&wallets, true).await;

        assert_eq!((first.alerts_sent, first.actions_run), (1, 0));
        assert_eq!((second.alerts_sent, second.actions_run), (0, 0));
    }
}
