use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use stressgate_core::circuit_breaker::{BreakerEvent, GateStatus, TradingMetrics};
use stressgate_core::{CircuitBreakerGate, EngineConfig, ManualClock, Verdict};
use tokio::sync::mpsc;
use tracing::warn;

use crate::input::{self, ReplayStep};
use crate::output::{print_structured, OutputFormat};

#[derive(Args)]
pub struct GateArgs {
    /// Trade replay file (JSON or YAML list of steps)
    #[arg(short, long)]
    trades: PathBuf,

    /// Clear expired breakers before each step
    #[arg(long)]
    auto_reset: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct ReplaySummary {
    verdicts: Vec<Verdict>,
    events: Vec<BreakerEvent>,
    status: GateStatus,
    metrics: Option<TradingMetrics>,
    interrupted: bool,
}

pub async fn run(config: &EngineConfig, args: GateArgs) -> Result<()> {
    let steps: Vec<ReplayStep> = input::load(&args.trades)?;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (sender, mut receiver) = mpsc::channel(256);
    let gate = CircuitBreakerGate::with_clock(config.circuit_breaker.clone(), clock.clone())
        .with_event_sender(sender);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, halting trading...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    let mut verdicts = Vec::with_capacity(steps.len());
    let mut events = Vec::new();

    for step in steps {
        if interrupted.load(Ordering::SeqCst) {
            gate.emergency_stop("operator interrupt").await;
            break;
        }

        clock.advance_secs(step.after_secs);
        if args.auto_reset {
            gate.reset_expired().await;
        }

        let verdict = gate.evaluate(&step.trade).await;
        if verdict.allowed {
            if let Some(realized) = step.realized_profit {
                if let Err(e) = gate.record_settlement(&step.trade.id, realized).await {
                    warn!("Could not settle {}: {}", step.trade.id, e);
                }
            }
        }
        verdicts.push(verdict);

        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
    }
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }

    let summary = ReplaySummary {
        verdicts,
        events,
        status: gate.status().await,
        metrics: gate.trading_metrics().await,
        interrupted: interrupted.load(Ordering::SeqCst),
    };

    if print_structured(&summary, args.format)? {
        return Ok(());
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ReplaySummary) {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Trade", "Decision", "Breakers", "Warnings"]);

    for verdict in &summary.verdicts {
        let decision = if verdict.allowed {
            Cell::new("allowed").fg(Color::Green)
        } else {
            Cell::new("denied").fg(Color::Red)
        };
        let breakers: Vec<String> = verdict.triggered_breakers.iter().map(|b| b.to_string()).collect();
        table.add_row(vec![
            Cell::new(&verdict.trade_id),
            decision,
            Cell::new(breakers.join(", ")),
            Cell::new(verdict.warnings.join("; ")),
        ]);
    }
    println!("{table}");

    for event in &summary.events {
        let breaker = event.breaker.map(|b| b.to_string()).unwrap_or_else(|| "all".to_string());
        println!("  [{:?}] {}: {}", event.kind, breaker, event.message);
    }

    let status = &summary.status;
    let health = if status.healthy {
        "healthy".green()
    } else {
        "tripped".red().bold()
    };
    println!(
        "\nGate is {}; daily P&L {:.2} ({:.2}% loss), {} consecutive losses",
        health,
        status.daily_pnl,
        status.daily_loss_fraction * 100.0,
        status.consecutive_losses
    );
    for breaker in status.breakers.iter().filter(|b| b.triggered) {
        println!(
            "  {} triggered, cooldown {}s remaining",
            breaker.kind, breaker.cooldown_remaining_secs
        );
    }

    if let Some(metrics) = &summary.metrics {
        println!(
            "Settled trades: {} (win rate {:.1}%, total profit {:.2}, max drawdown {:.2}, risk {:?})",
            metrics.total_trades,
            metrics.win_rate * 100.0,
            metrics.total_profit,
            metrics.max_drawdown,
            metrics.risk_level
        );
    }
    if summary.interrupted {
        println!("{}", "Replay interrupted; emergency stop engaged".yellow());
    }
}
