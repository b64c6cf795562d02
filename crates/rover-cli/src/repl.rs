//! REPL – the interactive Rover shell.
//!
//! Supported slash-commands:
//!   /help          – show this list
//!   /explore [N]   – run N exploration cycles (default 1)
//!   /journal [N]   – show the last N journal entries (default 10)
//!   /manual        – drive by hand with a live preview
//!   /settings      – interactively edit `~/.rover/config.toml`
//!   /quit | /exit  – exit the shell

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rover_runtime::journal;

use crate::config::{self, Config, Provider};
use crate::session;

const DEFAULT_JOURNAL_LINES: usize = 10;

/// A parsed shell line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Explore(u64),
    Journal(usize),
    Manual,
    Settings,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let arg = words.next();
    let command = match (head, arg) {
        ("/help", _) => Command::Help,
        ("/explore", None) => Command::Explore(1),
        ("/explore", Some(n)) => match n.parse() {
            Ok(n) => Command::Explore(n),
            Err(_) => Command::Unknown(line.trim().to_string()),
        },
        ("/journal", None) => Command::Journal(DEFAULT_JOURNAL_LINES),
        ("/journal", Some(n)) => match n.parse() {
            Ok(n) => Command::Journal(n),
            Err(_) => Command::Unknown(line.trim().to_string()),
        },
        ("/manual", _) => Command::Manual,
        ("/settings", _) => Command::Settings,
        ("/quit" | "/exit", _) => Command::Quit,
        _ => Command::Unknown(line.trim().to_string()),
    };
    Some(command)
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
/// Ctrl-C during `/explore` or `/manual` only ends that command.
pub fn run(shutdown: Arc<AtomicBool>, runtime: &tokio::runtime::Runtime) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "rover>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        // Ctrl-C at the prompt.
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Help => cmd_help(),
            Command::Explore(cycles) => {
                cmd_explore(cycles, &shutdown, runtime);
                if rearm(&shutdown) {
                    println!("{}", "Exploration interrupted.".yellow());
                }
            }
            Command::Journal(limit) => cmd_journal(limit),
            Command::Manual => {
                cmd_manual(&shutdown);
                if rearm(&shutdown) {
                    println!("{}", "Manual drive interrupted. Press Enter to return to the prompt.".yellow());
                }
            }
            Command::Settings => cmd_settings(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Rover Commands".bold().underline());
    println!("  {}  – run N exploration cycles (default 1)", "/explore [N]".bold().cyan());
    println!("  {}  – show recent journal entries", "/journal [N]".bold().cyan());
    println!("  {}        – drive by hand with a live preview", "/manual".bold().cyan());
    println!("  {}      – edit ~/.rover/config.toml settings", "/settings".bold().cyan());
    println!("  {}  – exit the shell", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_explore(cycles: u64, shutdown: &AtomicBool, runtime: &tokio::runtime::Runtime) {
    let Some(cfg) = load_config() else { return };

    println!(
        "  Exploring for {} cycle(s) with {} ({}) … Ctrl-C stops the robot.",
        cycles.to_string().bold(),
        cfg.provider.to_string().yellow(),
        cfg.model.yellow()
    );
    match runtime.block_on(session::explore(&cfg, cycles, shutdown)) {
        Ok(done) => println!("{} {} cycle(s) completed", "✓".green().bold(), done),
        Err(e) => println!("{}: {}", "Exploration failed".red(), e),
    }
}

fn cmd_journal(limit: usize) {
    let Some(cfg) = load_config() else { return };
    let path = session::journal_path(&cfg);

    match journal::read_tail(&path, limit) {
        Ok(entries) if entries.is_empty() => {
            println!("  No journal entries yet in {}", path.display().to_string().dimmed());
        }
        Ok(entries) => {
            println!("{}", "Journey".bold().underline());
            for entry in entries {
                let actions: Vec<String> = entry
                    .actions
                    .iter()
                    .map(|a| match a.duration {
                        Some(d) => format!("{} {}s", a.tool, d),
                        None => a.tool.to_string(),
                    })
                    .collect();
                println!(
                    "  {} {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    format!("#{}", entry.cycle).bold(),
                    entry.note
                );
                println!("      {}", actions.join(", ").cyan());
            }
        }
        Err(e) => println!("{}: {}", "Cannot read journal".red(), e),
    }
}

fn cmd_manual(shutdown: &AtomicBool) {
    let Some(cfg) = load_config() else { return };
    match session::manual_drive(&cfg, shutdown) {
        Ok(()) => println!("{}", "✓ Manual drive ended; wheels stopped.".green()),
        Err(e) => println!("{}: {}", "Manual drive failed".red(), e),
    }
}

fn cmd_settings() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep the current value)");

    let provider = prompt_str(
        &format!("  Provider (gemini / openai) [{}]: ", cfg.provider),
        &cfg.provider.to_string(),
    );
    match Provider::parse(&provider) {
        Some(p) if p != cfg.provider => {
            cfg.provider = p;
            cfg.model = p.default_model().to_string();
        }
        Some(_) => {}
        None => println!("  {} unknown provider '{}', keeping {}", "Warning:".yellow(), provider, cfg.provider),
    }

    cfg.model = prompt_str(&format!("  Model          [{}]: ", cfg.model), &cfg.model);

    let key_hint = if cfg.api_key.is_empty() { "not set" } else { "set" };
    let key = prompt_str(&format!("  API key        [{}]: ", key_hint), "");
    if !key.is_empty() {
        cfg.api_key = key;
    }

    let current_url = cfg.base_url.clone().unwrap_or_default();
    let url = prompt_str(&format!("  Base URL       [{}]: ", current_url), &current_url);
    cfg.base_url = Some(url).filter(|u| !u.is_empty());

    let current_goal = cfg.goal.clone().unwrap_or_default();
    let goal = prompt_str(&format!("  Goal           [{}]: ", current_goal), &current_goal);
    cfg.goal = Some(goal).filter(|g| !g.is_empty());

    let simulate = prompt_str(
        &format!("  Simulate hw    [{}]: ", if cfg.hardware.simulate { "yes" } else { "no" }),
        if cfg.hardware.simulate { "yes" } else { "no" },
    );
    cfg.hardware.simulate = matches!(simulate.to_ascii_lowercase().as_str(), "y" | "yes" | "true" | "1");

    cfg.turn_dwell_ms = prompt_u64(
        &format!("  Turn dwell ms  [{}]: ", cfg.turn_dwell_ms),
        cfg.turn_dwell_ms,
    );

    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Clear a stop request raised while a command was running, so the shell
/// keeps going.  Returns whether one was pending.
fn rearm(shutdown: &AtomicBool) -> bool {
    shutdown.swap(false, Ordering::SeqCst)
}

fn load_config() -> Option<Config> {
    match config::load_or_default() {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            None
        }
    }
}

/// Prompt for a u64 value.  Returns `default` when the user presses Enter.
fn prompt_u64(msg: &str, default: u64) -> u64 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}
