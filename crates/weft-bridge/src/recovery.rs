//! Periodic self-check and repair of the bridge wiring.
//!
//! The supervisor runs on a coarse period (minutes, not seconds) independent
//! of the main event flow. Each tick verifies that the page's store root and
//! auth object are still reachable and that every cached binding still
//! resolves to a callable; each failed check triggers only its own scoped
//! repair. Repairs are idempotent -- the repair scripts carry page-side
//! guards and binding re-exposure goes through the registry -- so a
//! false-positive detection cannot cause double delivery.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::binding::{js_string, BindingRegistry};
use crate::page::PageContext;

/// One scoped health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCheck {
    /// Is the internal store root still reachable?
    StoreRoot,
    /// Is the auth object still reachable?
    AuthStore,
    /// Do all cached bindings still resolve to callables?
    Bindings,
}

impl BridgeCheck {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StoreRoot => "store_root",
            Self::AuthStore => "auth_store",
            Self::Bindings => "bindings",
        }
    }
}

/// Check expressions and repair scripts the session owner provides.
///
/// Check expressions must evaluate truthy when healthy. Repair scripts must
/// be safe to run against intact wiring (page-side install guards, detach
/// before attach).
pub struct RecoveryHooks {
    pub store_check: String,
    pub store_repair: String,
    pub auth_check: String,
    pub auth_repair: String,
}

/// Outcome of one supervisor tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Checks that failed this tick.
    pub failed: Vec<BridgeCheck>,
    /// Checks whose repair completed.
    pub repaired: Vec<BridgeCheck>,
    /// Checks whose repair itself failed; retried next tick.
    pub repair_failed: Vec<BridgeCheck>,
    /// Binding names found missing from the page.
    pub missing_bindings: Vec<String>,
}

impl TickReport {
    pub fn is_healthy(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Periodic detection-and-repair task for one session's bridge.
pub struct RecoverySupervisor;

impl RecoverySupervisor {
    /// Run every check once, repairing what failed. Pure detection+repair;
    /// no state beyond the registry is touched.
    pub async fn run_tick(
        page: &dyn PageContext,
        registry: &BindingRegistry,
        hooks: &RecoveryHooks,
    ) -> TickReport {
        let mut report = TickReport::default();

        let scripted = [
            (BridgeCheck::StoreRoot, &hooks.store_check, &hooks.store_repair),
            (BridgeCheck::AuthStore, &hooks.auth_check, &hooks.auth_repair),
        ];
        for (check, probe, repair) in scripted {
            if Self::probe(page, probe).await {
                continue;
            }
            tracing::warn!(check = check.name(), "bridge check failed, repairing");
            report.failed.push(check);
            match page.evaluate(repair).await {
                Ok(_) => {
                    tracing::info!(check = check.name(), "repair completed");
                    report.repaired.push(check);
                }
                Err(err) => {
                    tracing::warn!(check = check.name(), error = %err, "repair failed, will retry next tick");
                    report.repair_failed.push(check);
                }
            }
        }

        for name in registry.live_names() {
            let expr = format!("typeof window[{}] === 'function'", js_string(&name));
            if Self::probe(page, &expr).await {
                continue;
            }
            tracing::warn!(check = "bindings", binding = %name, "binding lost, re-exposing");
            if report.missing_bindings.is_empty() {
                report.failed.push(BridgeCheck::Bindings);
            }
            report.missing_bindings.push(name.clone());

            registry.invalidate(&name);
            match registry.expose_if_absent(page, &name).await {
                Ok(()) => {
                    if !report.repaired.contains(&BridgeCheck::Bindings) {
                        report.repaired.push(BridgeCheck::Bindings);
                    }
                }
                Err(err) => {
                    tracing::warn!(binding = %name, error = %err, "binding re-exposure failed");
                    if !report.repair_failed.contains(&BridgeCheck::Bindings) {
                        report.repair_failed.push(BridgeCheck::Bindings);
                    }
                }
            }
        }

        report
    }

    async fn probe(page: &dyn PageContext, expression: &str) -> bool {
        matches!(
            page.evaluate(&format!("!!({expression})")).await,
            Ok(Value::Bool(true))
        )
    }

    /// Spawn the supervisor task.
    ///
    /// Ticks every `period`; ends when `shutdown` flips or the page reports
    /// closed. When repairs keep failing for `failure_budget` consecutive
    /// ticks the report is sent on `degraded_tx` so the owner can surface a
    /// degraded session; the supervisor itself keeps retrying.
    pub fn spawn(
        page: Arc<dyn PageContext>,
        registry: Arc<BindingRegistry>,
        hooks: RecoveryHooks,
        period: Duration,
        failure_budget: u32,
        degraded_tx: mpsc::UnboundedSender<TickReport>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a fresh interval fires immediately; the
            // wiring was just built, so skip straight to the next period.
            interval.tick().await;

            let mut consecutive_failures: u32 = 0;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if page.is_closed() {
                            tracing::debug!("page closed, recovery supervisor exiting");
                            break;
                        }
                        let report = Self::run_tick(page.as_ref(), &registry, &hooks).await;
                        if report.repair_failed.is_empty() {
                            consecutive_failures = 0;
                        } else {
                            consecutive_failures += 1;
                            if consecutive_failures >= failure_budget {
                                tracing::error!(
                                    consecutive_failures,
                                    "bridge repairs keep failing, reporting degraded"
                                );
                                if degraded_tx.send(report).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            tracing::debug!("recovery supervisor stopped");
        })
    }
}
