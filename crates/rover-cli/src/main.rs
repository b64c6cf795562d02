//! `rover` – command line entry point for the exploring robot.
//!
//! ```text
//! rover               interactive shell (/help for commands)
//! rover explore [N]   run N exploration cycles (default 1)
//! rover manual        drive by hand with a live preview
//! ```
//!
//! On start it:
//!
//! 1. Initialises tracing (`RUST_LOG`, `ROVER_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.rover/config.toml`, running a short first-run wizard in
//!    interactive mode when it is missing.
//! 3. Installs a Ctrl-C handler that sets a shared shutdown flag; exploration
//!    and manual drive both watch it and return the wheels to neutral.

mod config;
mod repl;
mod session;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

enum Mode {
    Repl,
    Explore(u64),
    Manual,
    Help,
}

fn parse_args(args: &[String]) -> Result<Mode, String> {
    match args {
        [] => Ok(Mode::Repl),
        [cmd] if cmd == "explore" => Ok(Mode::Explore(1)),
        [cmd, n] if cmd == "explore" => n
            .parse::<u64>()
            .map(Mode::Explore)
            .map_err(|_| format!("'{n}' is not a cycle count")),
        [cmd] if cmd == "manual" => Ok(Mode::Manual),
        [cmd] if cmd == "help" || cmd == "--help" || cmd == "-h" => Ok(Mode::Help),
        other => Err(format!("unrecognised arguments: {}", other.join(" "))),
    }
}

fn main() -> ExitCode {
    let _telemetry = rover_runtime::init_tracing("rover");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match parse_args(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            print_usage();
            return ExitCode::from(2);
        }
    };
    if let Mode::Help = mode {
        print_usage();
        return ExitCode::SUCCESS;
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the robot cleanly");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match mode {
        Mode::Explore(cycles) => {
            let cfg = match config::load_or_default() {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("{}: {}", "Config error".red(), e);
                    return ExitCode::FAILURE;
                }
            };
            match runtime.block_on(session::explore(&cfg, cycles, &shutdown)) {
                Ok(done) => {
                    println!("{} {} cycle(s) completed", "✓".green().bold(), done);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}: {}", "Exploration failed".red(), e);
                    ExitCode::FAILURE
                }
            }
        }
        Mode::Manual => {
            let cfg = match config::load_or_default() {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("{}: {}", "Config error".red(), e);
                    return ExitCode::FAILURE;
                }
            };
            match session::manual_drive(&cfg, &shutdown) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("{}: {}", "Manual drive failed".red(), e);
                    ExitCode::FAILURE
                }
            }
        }
        Mode::Repl | Mode::Help => {
            print_banner();
            match config::load() {
                Ok(None) => run_first_run_wizard(),
                Ok(Some(_)) => println!(
                    "  Config loaded from {}",
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => {
                    println!("{}: {}", "Config error".red(), e);
                    println!("  Using default configuration.");
                }
            }
            println!();
            println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
            repl::run(shutdown, &runtime);
            ExitCode::SUCCESS
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        Rover First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Rover.\n");

    let mut cfg = config::Config::default();

    println!("  Which vision model provider would you like to use?");
    println!("    1) Google Gemini  (default)");
    println!("    2) OpenAI-compatible server (Ollama, OpenAI, …)");
    let choice = repl::prompt_str("  Enter choice [1]: ", "1");
    if choice.trim() == "2" {
        cfg.provider = config::Provider::OpenAi;
        cfg.model = cfg.provider.default_model().to_string();
        let url = repl::prompt_str("  Server URL [http://localhost:11434]: ", "");
        cfg.base_url = Some(url).filter(|u| !u.is_empty());
    }

    cfg.model = repl::prompt_str(&format!("  Model [{}]: ", cfg.model), &cfg.model);
    cfg.api_key = repl::prompt_str("  API key (leave empty to set later): ", "");

    let simulate = repl::prompt_str("  Simulate hardware? [y/N]: ", "n");
    cfg.hardware.simulate = simulate.eq_ignore_ascii_case("y") || simulate.eq_ignore_ascii_case("yes");

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ____                        "#.bold().cyan());
    println!("{}", r#"   / __ \____ _   _____  _____  "#.bold().cyan());
    println!("{}", r#"  / /_/ / __ \ | / / _ \/ ___/  "#.bold().cyan());
    println!("{}", r#" / _, _/ /_/ / |/ /  __/ /      "#.bold().cyan());
    println!("{}", r#"/_/ |_|\____/|___/\___/_/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Rover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vision-guided exploring robot");
    println!();
}

fn print_usage() {
    println!("{}", "Usage".bold().underline());
    println!("  {}               interactive shell", "rover".bold());
    println!("  {}   run N exploration cycles (default 1)", "rover explore [N]".bold());
    println!("  {}        drive by hand with a live preview", "rover manual".bold());
}
