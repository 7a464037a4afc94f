//! LTM command line
//!
//! Inspect and edit stored memories, or chat with the memory agent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ltm_memory::{
    AnthropicClient, ChatModel, Config, MemoryAgent, MemoryReconciler, MemoryStore, MemoryUpdater,
};

#[derive(Parser)]
#[command(name = "ltm", version, about = "Long-term memory for conversational agents")]
struct Cli {
    /// SQLite database path
    #[arg(long, env = "LTM_DB_PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List users with stored memory
    Users,
    /// Print a user's memory
    Show { user: String },
    /// Replace a user's memory verbatim
    Set { user: String, content: String },
    /// Clear a user's memory, keeping the record
    Forget { user: String },
    /// Remove a user's record entirely
    Delete { user: String },
    /// Merge new information into a user's memory
    Remember { user: String, information: String },
    /// Write a user's memory to a text file
    Export {
        user: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Interactive chat with the memory agent
    Chat {
        /// Skip the user picker
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    let store = Arc::new(MemoryStore::new(&config)?);

    match cli.command {
        Command::Users => {
            let users = store.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            }
            for user in users {
                println!("{}", user);
            }
        }
        Command::Show { user } => print_memory(&store, &user)?,
        Command::Set { user, content } => {
            store.write(&user, &content)?;
            println!("Memory set for {}", user);
        }
        Command::Forget { user } => {
            store.write(&user, "")?;
            println!("Memory cleared for {}", user);
        }
        Command::Delete { user } => {
            store.delete(&user)?;
            println!("Memory deleted for {}", user);
        }
        Command::Remember { user, information } => {
            let (updater, _) = connect(&config, store)?;
            let memory = updater.update(&user, &information).await?;
            println!("{}", memory);
        }
        Command::Export { user, out } => {
            let path = export(&store, &user, out)?;
            println!("Memory exported to {}", path.display());
        }
        Command::Chat { user } => {
            let (updater, model) = connect(&config, store)?;
            chat_loop(user, updater, model).await?;
        }
    }

    Ok(())
}

fn connect(
    config: &Config,
    store: Arc<MemoryStore>,
) -> anyhow::Result<(Arc<MemoryUpdater>, Arc<dyn ChatModel>)> {
    let client = Arc::new(AnthropicClient::from_config(config)?);
    let reconciler = MemoryReconciler::from_config(client.clone(), config);
    Ok((
        Arc::new(MemoryUpdater::new(store, reconciler)),
        client as Arc<dyn ChatModel>,
    ))
}

fn print_memory(store: &MemoryStore, user: &str) -> anyhow::Result<()> {
    match store.record(user)? {
        Some(record) if !record.content.is_empty() => {
            println!("Memory for {} (updated {})", user, record.updated_at.to_rfc3339());
            println!("{}", record.content);
        }
        _ => println!("No memory stored for {}", user),
    }
    Ok(())
}

fn export(store: &MemoryStore, user: &str, out: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let now = Utc::now();
    let memory = store.read(user)?;
    let path = out.unwrap_or_else(|| PathBuf::from(export_filename(user, now)));
    std::fs::write(&path, export_text(user, &memory, now))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn export_filename(user: &str, now: DateTime<Utc>) -> String {
    format!("memory_{}_{}.txt", user, now.format("%Y%m%d_%H%M%S"))
}

fn export_text(user: &str, memory: &str, now: DateTime<Utc>) -> String {
    format!(
        "Memory export for {}\nExported on: {}\n{}\n\n{}\n",
        user,
        now.format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(50),
        memory
    )
}

const DEFAULT_USER: &str = "default_user";

const HELP: &str = "\
Commands:
  /memory          show the current user's memory
  /forget          clear the current user's memory (asks first)
  /users           list users with stored memory
  /switch [user]   start a new conversation as another user
  /export          write the current user's memory to a file
  /help            show this message
  /exit, /quit     leave";

type Input = Lines<BufReader<Stdin>>;

/// Print `label` and read one line; `None` at end of input
async fn ask(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    Ok(input.next_line().await?)
}

/// Resolve a picker answer: a 1-based index into `users`, a new name, or the default
fn choose_user(choice: &str, users: &[String]) -> String {
    let choice = choice.trim();
    if choice.is_empty() {
        return DEFAULT_USER.to_string();
    }
    match choice.parse::<usize>() {
        Ok(n) if (1..=users.len()).contains(&n) => users[n - 1].clone(),
        _ => choice.to_string(),
    }
}

fn is_confirmed(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn pick_user(store: &MemoryStore, input: &mut Input) -> anyhow::Result<Option<String>> {
    let users = store.list_users()?;
    let label = if users.is_empty() {
        println!("No existing users found.");
        format!("Enter your username [{}]: ", DEFAULT_USER)
    } else {
        println!("Existing users:");
        for (i, user) in users.iter().enumerate() {
            println!("  {:>2}. {}  {}", i + 1, user, preview_line(&store.read(user)?));
        }
        "Enter a number to select a user, or type a new username: ".to_string()
    };

    Ok(ask(input, &label).await?.map(|answer| choose_user(&answer, &users)))
}

fn preview_line(memory: &str) -> String {
    let flat = memory.replace('\n', " ");
    let mut chars = flat.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

async fn chat_loop(
    user: Option<String>,
    updater: Arc<MemoryUpdater>,
    model: Arc<dyn ChatModel>,
) -> anyhow::Result<()> {
    let store = updater.store().clone();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let user = match user {
        Some(user) => user,
        None => match pick_user(&store, &mut input).await? {
            Some(user) => user,
            None => return Ok(()),
        },
    };
    let mut agent = MemoryAgent::new(user, updater.clone(), model.clone());

    println!("Chatting as {}. Type /help for commands.", agent.user_id());

    loop {
        let Some(line) = ask(&mut input, "> ").await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default();
            let arg = parts.next().map(str::trim).unwrap_or_default();

            match name {
                "exit" | "quit" => break,
                "help" => println!("{}", HELP),
                "memory" => print_memory(&store, agent.user_id())?,
                "forget" => {
                    let answer = ask(&mut input, "Are you sure? (y/n) ").await?;
                    if answer.as_deref().is_some_and(is_confirmed) {
                        store.write(agent.user_id(), "")?;
                        println!("Memory cleared for {}", agent.user_id());
                    } else {
                        println!("Memory kept.");
                    }
                }
                "users" => {
                    for user in store.list_users()? {
                        let marker = if user == agent.user_id() { "*" } else { " " };
                        println!("{} {}", marker, user);
                    }
                }
                "switch" => {
                    let next = if arg.is_empty() {
                        match pick_user(&store, &mut input).await? {
                            Some(user) => user,
                            None => break,
                        }
                    } else {
                        arg.to_string()
                    };
                    agent = MemoryAgent::new(next, updater.clone(), model.clone());
                    println!("Switched to {}", agent.user_id());
                }
                "export" => {
                    let path = export(&store, agent.user_id(), None)?;
                    println!("Memory exported to {}", path.display());
                }
                other => println!("Unknown command /{}. Type /help for commands.", other),
            }
            continue;
        }

        match agent.chat(line).await {
            Ok(reply) => {
                println!("{}", reply);
                if agent.memory_updated() {
                    println!("(memory updated)");
                }
            }
            Err(e) if e.is_storage() => bail!(e),
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_export_filename_uses_timestamp() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(export_filename("alice", now), "memory_alice_20250307_140509.txt");
    }

    #[test]
    fn test_export_text_has_header() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 14, 5, 9).unwrap();
        let text = export_text("alice", "Likes tea", now);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Memory export for alice");
        assert_eq!(lines[1], "Exported on: 2025-03-07 14:05:09");
        assert_eq!(lines[2], "=".repeat(50));
        assert!(text.contains("Likes tea"));
    }

    #[test]
    fn test_export_writes_file() {
        let store = MemoryStore::in_memory().unwrap();
        store.write("alice", "Likes tea").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("alice.txt");

        let path = export(&store, "alice", Some(out.clone())).unwrap();

        assert_eq!(path, out);
        let written = std::fs::read_to_string(out).unwrap();
        assert!(written.starts_with("Memory export for alice"));
        assert!(written.contains("Likes tea"));
    }

    #[test]
    fn test_choose_user_by_index_or_name() {
        let users = vec!["alice".to_string(), "bob".to_string()];

        assert_eq!(choose_user("2", &users), "bob");
        assert_eq!(choose_user(" carol ", &users), "carol");
        assert_eq!(choose_user("7", &users), "7");
        assert_eq!(choose_user("", &users), DEFAULT_USER);
        assert_eq!(choose_user("1", &[]), "1");
    }

    #[test]
    fn test_forget_needs_explicit_yes() {
        assert!(is_confirmed("y"));
        assert!(is_confirmed(" YES\n"));
        assert!(!is_confirmed("n"));
        assert!(!is_confirmed(""));
        assert!(!is_confirmed("sure"));
    }

    #[test]
    fn test_preview_line_flattens_and_truncates() {
        assert_eq!(preview_line("a\nb"), "a b");
        assert_eq!(preview_line(&"x".repeat(60)), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn test_chat_user_is_optional() {
        let cli = Cli::try_parse_from(["ltm", "chat"]).unwrap();
        assert!(matches!(cli.command, Command::Chat { user: None }));
    }

    #[test]
    fn test_cli_parses_db_flag() {
        let cli = Cli::try_parse_from(["ltm", "--db", "/tmp/m.db", "show", "alice"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/m.db")));
        assert!(matches!(cli.command, Command::Show { ref user } if user == "alice"));
    }
}
