//! `recall` – interactive long-term memory shell.
//!
//! 1. Checks for `~/.recall/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Probes the local Ollama instance (when that is the provider) and
//!    reports installed models.
//! 3. Opens the memory store and drops the user into an **interactive REPL**
//!    (`/add`, `/search`, `/cleanup`, `/dump`, `/stats`, `/settings`, `/help`).
//! 4. Intercepts **Ctrl-C**: the first press asks the REPL to stop, a second
//!    press exits immediately.  Every change is already on disk.

mod config;
mod ollama;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use config::{AiProvider, Config};

fn main() {
    // RUST_LOG filters; RECALL_LOG_FORMAT=json for machine-readable logs.
    let _telemetry = recall_runtime::init_tracing("recall");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        if shutdown_clone.swap(true, Ordering::SeqCst) {
            println!();
            std::process::exit(130);
        }
        println!();
        println!("{}", "⚠  Ctrl-C received – press Enter to leave (Ctrl-C again to force).".yellow().bold());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(
        provider = %cfg.ai_provider,
        chat_model = %cfg.chat_model,
        embedding_model = %cfg.embedding_model,
        memory = %cfg.memory_path.display(),
        backend = %cfg.backend,
        "configuration ready"
    );

    // ── Ollama discovery ──────────────────────────────────────────────────
    if cfg.ai_provider == AiProvider::Ollama {
        probe_ollama(&cfg);
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(cfg, shutdown);
}

fn probe_ollama(cfg: &Config) {
    print!("\n  Probing Ollama at {} … ", cfg.llm_url.dimmed());
    match ollama::fetch_models(&cfg.llm_url) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            for m in &models {
                let active = m.matches(&cfg.chat_model) || m.matches(&cfg.embedding_model);
                let marker = if active { "▶" } else { "•" };
                println!(
                    "    {} {} {}",
                    marker.green(),
                    m.name.bold(),
                    format!("({:.1} GB)", m.size as f64 / 1e9).dimmed()
                );
            }
            for (wanted, what) in [(&cfg.chat_model, "chat"), (&cfg.embedding_model, "embedding")] {
                if !models.iter().any(|m| m.matches(wanted)) {
                    println!(
                        "  {} {} model '{}' is not installed. Run `{}`.",
                        "Warning:".yellow(),
                        what,
                        wanted,
                        format!("ollama pull {wanted}").bold()
                    );
                }
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}` to start a local AI.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Recall First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Recall.\n");

    println!("  Which model server would you like to use?");
    println!("    1) Local AI via Ollama  (default, offline-first)");
    println!("    2) Cloud AI via OpenAI");
    let provider = match repl::prompt_str("  Enter choice [1]: ", "1").as_str() {
        "2" => AiProvider::OpenAI,
        _ => AiProvider::Ollama,
    };
    let mut cfg = Config::for_provider(provider);

    cfg.llm_url = repl::prompt_str(&format!("  Server URL [{}]: ", cfg.llm_url), &cfg.llm_url);

    let mut chat_default = cfg.chat_model.clone();
    let mut embed_default = cfg.embedding_model.clone();
    if provider == AiProvider::Ollama
        && let Ok(models) = ollama::fetch_models(&cfg.llm_url)
    {
        if let Some(m) = ollama::pick_model(&models, &chat_default, false) {
            chat_default = m;
        }
        if let Some(m) = ollama::pick_model(&models, &embed_default, true) {
            embed_default = m;
        }
    }
    cfg.chat_model = repl::prompt_str(&format!("  Chat model [{}]: ", chat_default), &chat_default);
    cfg.embedding_model =
        repl::prompt_str(&format!("  Embedding model [{}]: ", embed_default), &embed_default);

    if provider == AiProvider::OpenAI {
        cfg.api_key = repl::prompt_str("  API key: ", "");
    }

    let path = cfg.memory_path.to_string_lossy().into_owned();
    cfg.memory_path = repl::prompt_str(&format!("  Memory location [{}]: ", path), &path).into();

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ____                  ____"#.bold().cyan());
    println!("{}", r#"   / __ \___  _________ _/ / /"#.bold().cyan());
    println!("{}", r#"  / /_/ / _ \/ ___/ __ `/ / / "#.bold().cyan());
    println!("{}", r#" / _, _/  __/ /__/ /_/ / / /  "#.bold().cyan());
    println!("{}", r#"/_/ |_|\___/\___/\__,_/_/_/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Recall".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Long-term semantic memory");
    println!();
}
