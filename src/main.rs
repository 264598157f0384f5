// author: kodeholic (powered by Gemini)

// mcptt-sim: floor control 시뮬레이션 CLI
//
// 사용법:
//   mcptt-sim scenario <a|b|c|d|e> [--attr Name=value]... [--json]
//   mcptt-sim random --users N --seed S --duration SECS [--mixed] [--attr Name=value]... [--json]
//
// 예시:
//   mcptt-sim scenario c                       # 우선순위 Revoke
//   mcptt-sim scenario a --attr AckRequired=false
//   mcptt-sim random --users 8 --seed 42 --duration 120 --json | jq .
//
// 트레이스는 stdout, 로그(RUST_LOG)는 stderr

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use mcptt_floor::config::parse_attribute;
use mcptt_floor::sim::{Plan, Scenario};
use mcptt_floor::trace::{SharedSink, TraceDir, TraceEvent, TraceHub, TraceKind};
use mcptt_floor::utils::format_secs;

/// 긴 랜덤 실행도 출력 태스크가 따라잡을 수 있는 버퍼
const TRACE_CAPACITY: usize = 1 << 16;

// ----------------------------------------------------------------------------
// [CLI 인자]
// ----------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name  = "mcptt-sim",
    about = "MCPTT floor control 시뮬레이터",
    version,
)]
struct Cli {
    /// FloorConfig 속성 덮어쓰기 (예: AckRequired=true), 반복 가능
    #[arg(long = "attr", global = true, value_parser = parse_attribute)]
    attrs: Vec<(String, String)>,

    /// JSON lines로 출력
    #[arg(long, global = true)]
    json: bool,

    /// 시드 (scenario에서도 call id / SSRC 할당에 사용)
    #[arg(long, global = true, default_value_t = 1)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 내장 시나리오 실행
    Scenario {
        /// a | b | c | d | e
        name: Scenario,
    },
    /// 무작위 PTT 경합
    Random {
        #[arg(long, default_value_t = 4)]
        users: u32,
        /// 실행 시간 (초)
        #[arg(long, default_value_t = 60)]
        duration: u64,
        /// 우선순위 무작위 변경 + audio cut-in
        #[arg(long)]
        mixed: bool,
    },
}

// ----------------------------------------------------------------------------
// [메인]
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let plan = match cli.command {
        Command::Scenario { name } => Ok(name.plan()),
        Command::Random { users, duration, mixed: false } => Plan::random(users, cli.seed, duration),
        Command::Random { users, duration, mixed: true } => Plan::random_mixed(users, cli.seed, duration),
    };
    let plan = match plan {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(2);
        }
    };

    let hub = TraceHub::with_capacity(TRACE_CAPACITY);
    let rx = hub.subscribe();
    let printer = tokio::spawn(print_events(rx, cli.json));

    let sink: SharedSink = hub;
    let sim = match plan.build(cli.seed, &cli.attrs, sink) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(2);
        }
    };

    // 시뮬레이션은 동기 루프: 블로킹 스레드에서 돌리고 끝나면 hub도 drop
    let duration = plan.duration;
    let run = tokio::task::spawn_blocking(move || {
        let mut sim = sim;
        sim.run_until(duration);
    });
    if let Err(e) = run.await {
        error!("[sim] simulation task failed: {}", e);
    }

    match printer.await {
        Ok(count) if !cli.json => {
            println!("{}", "─".repeat(96).dimmed());
            println!("  {} events", count);
        }
        Ok(_) => {}
        Err(e) => error!("[sim] printer task failed: {}", e),
    }
}

// ----------------------------------------------------------------------------
// [이벤트 출력]
// ----------------------------------------------------------------------------

async fn print_events(mut rx: broadcast::Receiver<TraceEvent>, json: bool) -> u64 {
    if !json {
        println!("{}", "─".repeat(96).dimmed());
        println!(
            "  {:<8} {:<6} {:<5} {:<6} {:<24} {}",
            "TIME".dimmed(),
            "NODE".dimmed(),
            "DIR".dimmed(),
            "CALL".dimmed(),
            "EVENT".dimmed(),
            "DETAIL".dimmed(),
        );
        println!("{}", "─".repeat(96).dimmed());
    }

    let mut count = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                count += 1;
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("[sim] trace serialize failed: {}", e),
                    }
                } else {
                    print_row(&event);
                }
            }
            Err(RecvError::Lagged(n)) => warn!("[sim] trace printer lagged, {} events skipped", n),
            Err(RecvError::Closed) => break,
        }
    }
    count
}

fn print_row(e: &TraceEvent) {
    let node = if e.node == 0 { "srv".to_string() } else { format!("u{}", e.node) };
    let dir = match e.dir {
        TraceDir::In  => "↓ rx".bright_blue().to_string(),
        TraceDir::Out => "↑ tx".bright_green().to_string(),
        TraceDir::Sys => "· sys".bright_yellow().to_string(),
    };

    let (event, detail) = match &e.kind {
        TraceKind::StateChange { machine, old, new, trigger } => (
            format!("{}:{}", machine, new).bright_cyan().to_string(),
            format!("{} → {} ({})", old, new, trigger),
        ),
        TraceKind::Message { name, header } => (colorize_name(name), header.clone()),
        TraceKind::DeliveryFailure { name, attempts } => (
            "DeliveryFailure".bright_red().bold().to_string(),
            format!("{} after {} attempts", name, attempts),
        ),
        TraceKind::RequestFailed { attempts } => (
            "RequestFailed".bright_red().bold().to_string(),
            format!("after {} attempts", attempts),
        ),
        TraceKind::AccessTime { millis } => (
            "AccessTime".bright_magenta().to_string(),
            format!("{} ms", millis),
        ),
        TraceKind::Error { reason } => ("Error".red().to_string(), reason.clone()),
    };

    println!(
        "  {} {:<6} {} {:<6} {:<24} {}",
        format_secs(e.ts).dimmed(),
        node,
        dir,
        e.call_id,
        event,
        detail.dimmed(),
    );
}

fn colorize_name(name: &str) -> String {
    if name.contains("Granted") {
        name.bright_green().bold().to_string()
    } else if name.contains("Revoke") || name.contains("Deny") {
        name.bright_red().bold().to_string()
    } else if name.starts_with("Floor") {
        name.bright_yellow().to_string()
    } else if name == "Media" {
        name.dimmed().to_string()
    } else {
        name.normal().to_string()
    }
}
