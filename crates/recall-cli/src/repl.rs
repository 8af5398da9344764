//! REPL – Read-Eval-Print Loop for the Recall interactive shell.
//!
//! Supported slash-commands:
//!   /add <fact>                   – remember a fact
//!   /search <query>               – recall the most similar facts
//!   /cleanup [days] [min_access]  – forget old, rarely used facts
//!   /dump                         – print every stored fact as JSON
//!   /stats                        – store size and usage
//!   /settings                     – edit `~/.recall/config.toml`
//!   /help                         – show this list
//!   /quit | /exit                 – exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use recall_memory::{AddOutcome, MemoryStore, SharedMemory};
use recall_runtime::{EmbeddingClient, LlmDriver};
use recall_types::MemoryMeta;
use tokio::runtime::Runtime;

use crate::config::{self, AiProvider, Config};

/// Provenance tag for facts typed at the prompt.
const CLI_SOURCE: &str = "cli";

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(String),
    Search(String),
    Cleanup {
        days: Option<i64>,
        min_access: Option<u64>,
    },
    Dump,
    Stats,
    Settings,
    Help,
    Quit,
    /// A known command used wrongly; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

/// Parse one input line.  Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head {
        "/add" if rest.is_empty() => Command::Usage("/add <fact>"),
        "/add" => Command::Add(rest.to_string()),
        "/search" if rest.is_empty() => Command::Usage("/search <query>"),
        "/search" => Command::Search(rest.to_string()),
        "/cleanup" => parse_cleanup(rest),
        "/dump" => Command::Dump,
        "/stats" => Command::Stats,
        "/settings" => Command::Settings,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

fn parse_cleanup(args: &str) -> Command {
    const USAGE: &str = "/cleanup [days] [min_access]";
    let mut parts = args.split_whitespace();
    let days = match parts.next().map(str::parse::<i64>) {
        None => None,
        Some(Ok(d)) if d >= 0 => Some(d),
        Some(_) => return Command::Usage(USAGE),
    };
    let min_access = match parts.next().map(str::parse::<u64>) {
        None => None,
        Some(Ok(n)) => Some(n),
        Some(Err(_)) => return Command::Usage(USAGE),
    };
    if parts.next().is_some() {
        return Command::Usage(USAGE);
    }
    Command::Cleanup { days, min_access }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a REPL session needs to drive the memory store.
struct Session {
    runtime: Runtime,
    memory: SharedMemory,
    cfg: Config,
}

impl Session {
    fn open(cfg: Config) -> Result<Self, String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to start async runtime: {}", e))?;

        let embedder = EmbeddingClient::new(&cfg.llm_url, &cfg.embedding_model)
            .with_api_key(cfg.api_key.clone());
        let generator =
            LlmDriver::new(&cfg.llm_url, &cfg.chat_model).with_api_key(cfg.api_key.clone());
        let store = MemoryStore::open(cfg.memory_config(), Arc::new(embedder), Arc::new(generator))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            runtime,
            memory: SharedMemory::new(store),
            cfg,
        })
    }

    fn add(&self, fact: &str) {
        let meta = MemoryMeta::new(CLI_SOURCE, "fact");
        match self.runtime.block_on(self.memory.add_memory(fact, meta)) {
            Ok(AddOutcome::Inserted { id }) => {
                println!("{} {}", "✓ Remembered".green(), id.to_string().dimmed());
            }
            Ok(AddOutcome::Merged { text, .. }) => {
                println!("{} {}", "✓ Merged into:".green(), text.bold());
            }
            Ok(AddOutcome::Discarded { .. }) => {
                println!("{}", "Already known – nothing new to remember.".dimmed());
            }
            Err(e) => println!("{}: {}", "Could not remember".red(), e),
        }
    }

    fn search(&self, query: &str) {
        let params = self.cfg.memory_config().search_params();
        match self.runtime.block_on(self.memory.search_records(query, &params)) {
            Ok(hits) if hits.is_empty() => println!("{}", "No matching memories.".dimmed()),
            Ok(hits) => {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "  {}. {} {}",
                        i + 1,
                        hit.record.text.bold(),
                        format!("({:.2})", hit.similarity).dimmed()
                    );
                }
            }
            Err(e) => println!("{}: {}", "Search failed".red(), e),
        }
    }

    fn cleanup(&self, days: Option<i64>, min_access: Option<u64>) {
        let days = days.unwrap_or(self.cfg.cleanup_max_age_days);
        let min_access = min_access.unwrap_or(self.cfg.cleanup_min_access);
        let Some(max_age) = chrono::Duration::try_days(days) else {
            println!("{}: {} day(s) is out of range", "Cleanup failed".red(), days);
            return;
        };
        match self.runtime.block_on(self.memory.cleanup(max_age, min_access)) {
            Ok(0) => println!("{}", "Nothing to forget.".dimmed()),
            Ok(n) => println!(
                "{} {} fact(s) older than {} day(s) with fewer than {} access(es).",
                "✓ Forgot".green(),
                n,
                days,
                min_access
            ),
            Err(e) => println!("{}: {}", "Cleanup failed".red(), e),
        }
    }

    fn dump(&self) {
        println!("{}", self.runtime.block_on(self.memory.get_all_memories_json()));
    }

    fn stats(&self) {
        let (count, dimension, accesses) = self.runtime.block_on(self.memory.with_store(|s| {
            let accesses: u64 = s.records().iter().map(|r| r.stats.total_access).sum();
            (s.len(), s.dimension(), accesses)
        }));
        println!("{}", "Memory".bold().underline());
        println!("  Facts        : {}", count.to_string().yellow());
        println!(
            "  Dimension    : {}",
            dimension.map_or("-".to_string(), |d| d.to_string()).yellow()
        );
        println!("  Retrievals   : {}", accesses.to_string().yellow());
        println!("  Backend      : {}", self.cfg.backend.to_string().yellow());
        println!("  Location     : {}", self.cfg.memory_path.display().to_string().dimmed());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(cfg: Config, shutdown: Arc<AtomicBool>) {
    let session = match Session::open(cfg) {
        Ok(s) => s,
        Err(e) => {
            println!("{}: {}", "Could not open memory".red(), e);
            return;
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "recall>".bold().cyan());
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
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let Some(command) = parse_command(&line) else {
            continue;
        };
        match command {
            Command::Add(fact) => session.add(&fact),
            Command::Search(query) => session.search(&query),
            Command::Cleanup { days, min_access } => session.cleanup(days, min_access),
            Command::Dump => session.dump(),
            Command::Stats => session.stats(),
            Command::Settings => cmd_settings(),
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Usage(usage) => println!("{} {}", "Usage:".yellow(), usage.bold()),
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
    println!("{}", "Recall Commands".bold().underline());
    println!("  {}                   – remember a fact", "/add <fact>".bold().cyan());
    println!("  {}               – recall similar facts", "/search <query>".bold().cyan());
    println!("  {}  – forget old, unused facts", "/cleanup [days] [min_access]".bold().cyan());
    println!("  {}                         – print all facts as JSON", "/dump".bold().cyan());
    println!("  {}                        – store size and usage", "/stats".bold().cyan());
    println!("  {}                     – edit ~/.recall/config.toml", "/settings".bold().cyan());
    println!("  {}                  – exit", "/quit  /exit".bold().cyan());
    println!();
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
        &format!("  AI provider (ollama / openai) [{}]: ", cfg.ai_provider),
        &cfg.ai_provider.to_string(),
    );
    match AiProvider::parse(&provider) {
        Some(p) => cfg.ai_provider = p,
        None => println!("  {} unknown provider '{}', keeping {}", "Warning:".yellow(), provider, cfg.ai_provider),
    }

    cfg.llm_url = prompt_str(&format!("  Server URL       [{}]: ", cfg.llm_url), &cfg.llm_url);
    cfg.chat_model = prompt_str(&format!("  Chat model       [{}]: ", cfg.chat_model), &cfg.chat_model);
    cfg.embedding_model = prompt_str(
        &format!("  Embedding model  [{}]: ", cfg.embedding_model),
        &cfg.embedding_model,
    );
    let path = prompt_str(
        &format!("  Memory path      [{}]: ", cfg.memory_path.display()),
        &cfg.memory_path.to_string_lossy(),
    );
    cfg.memory_path = path.into();
    cfg.search_threshold = prompt_parse(
        &format!("  Search threshold [{}]: ", cfg.search_threshold),
        cfg.search_threshold,
    );
    cfg.search_limit = prompt_parse(
        &format!("  Search limit     [{}]: ", cfg.search_limit),
        cfg.search_limit,
    );

    if let Err(e) = cfg.memory_config().validate() {
        println!("{}: {}", "Settings not saved".red(), e);
        return;
    }
    match config::save(&cfg) {
        Ok(()) => {
            println!(
                "{} {}",
                "✓ Settings saved to".green(),
                config::config_path().display().to_string().bold()
            );
            println!("  Restart recall to apply them.");
        }
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a parseable value.  Returns `default` on Enter or bad input.
fn prompt_parse<T>(msg: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!("  {} '{}' is not valid, keeping {}", "Warning:".yellow(), raw, default);
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
