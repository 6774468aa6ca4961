//! Hearth CLI
//!
//! Command-line interface for chatting, inspecting profiles and moving
//! family data between databases.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hearth::completion::create_completion_service;
use hearth::credits::UnlimitedCredits;
use hearth::error::{HearthError, Result};
use hearth::intelligence::{
    DiagnosticStrategy, FamilyExtractor, LlmStrategy, RuleBasedStrategy, SymptomExtractor,
};
use hearth::storage::export::parse_export;
use hearth::storage::{export_user, import_user, FamilyStore, Storage};
use hearth::types::*;
use hearth::{ChatOrchestrator, CompletionConfig, ReplyStatus};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Family memory for parenting-coach chat")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "HEARTH_DB_PATH",
        default_value = "~/.local/share/hearth/hearth.db"
    )]
    db_path: String,

    /// Storage mode (local or cloud-safe)
    #[arg(long, env = "HEARTH_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// User whose family data is read and written
    #[arg(short, long, env = "HEARTH_USER_ID", default_value = "local")]
    user: String,

    /// Diagnostic strategy (llm or rules)
    #[arg(long, env = "HEARTH_DIAGNOSTIC_STRATEGY", default_value = "llm")]
    strategy: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "HEARTH_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extractors over one message without touching the database
    Extract {
        /// Message text
        message: String,
        /// Already-known family names (comma-separated)
        #[arg(short, long)]
        known: Option<String>,
    },
    /// Send one message, or start an interactive session when omitted
    Chat {
        /// Message text
        message: Option<String>,
    },
    /// Manage family profiles
    Profiles {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },
    /// Score one family member's symptoms
    Diagnose {
        /// Person name
        person: String,
    },
    /// Export all of the user's data as JSON
    Export {
        /// Output file (- for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,
    },
    /// Replace the user's data with an export file
    Import {
        /// Export file
        input: String,
    },
    /// List conversation summaries
    Summaries,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List profiles
    List,
    /// Show one profile as JSON
    Show { name: String },
    /// Create a profile
    Create {
        name: String,
        /// Relationship (self, child, spouse, other)
        #[arg(short, long, default_value = "child")]
        relationship: String,
        /// Initial fields as a JSON profile patch
        #[arg(short, long)]
        patch: Option<String>,
    },
    /// Merge a JSON profile patch into a profile
    Patch { name: String, patch: String },
    /// Delete a profile
    Delete { name: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hearth=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init();
    }
}

fn open_storage(cli: &Cli) -> Result<Arc<Storage>> {
    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let storage_mode = match cli.storage_mode.as_str() {
        "cloud-safe" => StorageMode::CloudSafe,
        _ => StorageMode::Local,
    };

    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })?;
    if let Some(warning) = storage.storage_mode_warning() {
        tracing::warn!("{}", warning);
    }
    Ok(Arc::new(storage))
}

fn build_orchestrator(cli: &Cli, storage: Arc<Storage>) -> Result<ChatOrchestrator> {
    let completion_config = CompletionConfig::from_env();
    let completion = create_completion_service(&completion_config);
    let strategy: Arc<dyn DiagnosticStrategy> = match cli.strategy.as_str() {
        "rules" => Arc::new(RuleBasedStrategy::default()),
        _ => Arc::new(LlmStrategy::new(completion.clone())),
    };

    Ok(ChatOrchestrator::new(
        storage,
        completion,
        strategy,
        Arc::new(UnlimitedCredits),
        PipelineConfig::default(),
    )?
    .with_chat_options(completion_config.chat_options()))
}

fn find_profile(store: &dyn FamilyStore, user: &str, name: &str) -> Result<PersonProfile> {
    store
        .get_profile(user, name)?
        .ok_or_else(|| HearthError::NotFound(format!("profile '{}'", name)))
}

fn parse_patch(json: Option<&str>) -> Result<ProfilePatch> {
    match json {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(ProfilePatch::default()),
    }
}

async fn send(orchestrator: &ChatOrchestrator, user: &str, message: &str) -> Result<()> {
    let mut reply = orchestrator.handle_message(user, message).await?;
    println!("{}", reply.response);
    if reply.status != ReplyStatus::Ok {
        eprintln!("[{:?}]", reply.status);
    }
    if !reply.profiles_updated.is_empty() {
        eprintln!("Updated: {}", reply.profiles_updated.join(", "));
    }
    // The process may exit right after this turn
    if let Some(job) = reply.summary_job.take() {
        if let Err(e) = job.await {
            tracing::error!(error = %e, "Summary task panicked");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match &cli.command {
        Commands::Extract { message, known } => {
            let known: BTreeSet<String> = known
                .as_deref()
                .map(|k| {
                    k.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let extraction = FamilyExtractor::default().extract(message, &known);
            let symptom_extractor = SymptomExtractor::new();
            let mut people = extraction.people();
            people.extend(known.iter().cloned());
            let symptoms: serde_json::Map<String, serde_json::Value> = people
                .iter()
                .filter_map(|name| {
                    let updates = symptom_extractor.extract(message, name);
                    if updates.is_empty() {
                        return None;
                    }
                    serde_json::to_value(updates).ok().map(|v| (name.clone(), v))
                })
                .collect();

            let output = serde_json::json!({
                "family": extraction,
                "symptoms": symptoms,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Chat { message } => {
            let storage = open_storage(&cli)?;
            let orchestrator = build_orchestrator(&cli, storage)?;

            if let Some(message) = message {
                send(&orchestrator, &cli.user, message).await?;
                return Ok(());
            }

            println!("Hearth Interactive Mode");
            println!("Type 'help' for commands, 'quit' to exit\n");

            let stdin = io::stdin();
            let mut stdout = io::stdout();

            loop {
                print!("you> ");
                stdout.flush()?;

                let mut line = String::new();
                if stdin.read_line(&mut line)? == 0 {
                    break;
                }
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                match line {
                    "quit" | "exit" => break,
                    "help" => {
                        println!("Commands:");
                        println!("  /profiles          - List family profiles");
                        println!("  /diagnose <name>   - Score one family member");
                        println!("  /history           - Show recent messages");
                        println!("  quit               - Exit");
                        println!("Anything else is sent as a chat message.");
                    }
                    "/profiles" => {
                        for profile in orchestrator.store().get_profiles(&cli.user)? {
                            println!("{} ({})", profile.name, profile.relationship.as_str());
                        }
                    }
                    "/history" => {
                        for turn in orchestrator.history(&cli.user, 10)? {
                            println!("{}: {}", turn.role.as_str(), truncate(&turn.content, 70));
                        }
                    }
                    _ if line.starts_with("/diagnose ") => {
                        let person = line["/diagnose ".len()..].trim();
                        match orchestrator.diagnose(&cli.user, person).await {
                            Ok(report) => {
                                for result in report.results {
                                    println!(
                                        "{} [{}] - {}",
                                        result.condition,
                                        result.probability.as_str(),
                                        result.description
                                    );
                                }
                            }
                            Err(e) => println!("Error: {}", e),
                        }
                    }
                    _ => {
                        if let Err(e) = send(&orchestrator, &cli.user, line).await {
                            println!("Error: {}", e);
                        }
                    }
                }
            }

            println!("Goodbye!");
        }

        Commands::Profiles { action } => {
            let storage = open_storage(&cli)?;
            let store: &dyn FamilyStore = &*storage;

            match action.as_ref().unwrap_or(&ProfileAction::List) {
                ProfileAction::List => {
                    for profile in store.get_profiles(&cli.user)? {
                        println!(
                            "{} [{}] {}{}",
                            profile.name,
                            profile.relationship.as_str(),
                            profile.age.as_deref().map(|a| format!("age {} ", a)).unwrap_or_default(),
                            profile.diagnoses.join(", ")
                        );
                    }
                }
                ProfileAction::Show { name } => {
                    let profile = find_profile(store, &cli.user, name)?;
                    println!("{}", serde_json::to_string_pretty(&profile)?);
                }
                ProfileAction::Create {
                    name,
                    relationship,
                    patch,
                } => {
                    let relationship: Relationship =
                        relationship.parse().map_err(HearthError::InvalidInput)?;
                    let profile = store.create_profile(&NewProfile {
                        user_id: cli.user.clone(),
                        name: name.clone(),
                        relationship,
                        patch: parse_patch(patch.as_deref())?,
                    })?;
                    println!("Created profile {} ({})", profile.name, profile.id);
                }
                ProfileAction::Patch { name, patch } => {
                    let profile = find_profile(store, &cli.user, name)?;
                    let updated = store.update_profile(&profile.id, &parse_patch(Some(patch))?)?;
                    println!("{}", serde_json::to_string_pretty(&updated)?);
                }
                ProfileAction::Delete { name } => {
                    let profile = find_profile(store, &cli.user, name)?;
                    store.delete_profile(&profile.id)?;
                    println!("Deleted profile {}", profile.name);
                }
            }
        }

        Commands::Diagnose { person } => {
            let storage = open_storage(&cli)?;
            let orchestrator = build_orchestrator(&cli, storage)?;
            let report = orchestrator.diagnose(&cli.user, person).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Export { output } => {
            let storage = open_storage(&cli)?;
            let export = export_user(&*storage, &cli.user)?;
            let content = serde_json::to_string_pretty(&export)?;

            if output == "-" {
                println!("{}", content);
            } else {
                std::fs::write(output, content)?;
                println!("Exported {} to {}", cli.user, output);
            }
        }

        Commands::Import { input } => {
            let storage = open_storage(&cli)?;
            let export = parse_export(&std::fs::read_to_string(input)?)?;
            if export.user_id != cli.user {
                return Err(HearthError::InvalidInput(format!(
                    "export belongs to user '{}', not '{}'",
                    export.user_id, cli.user
                )));
            }
            import_user(&*storage, &export)?;
            println!(
                "Imported {} profiles, {} messages, {} summaries",
                export.profiles.len(),
                export.messages.len(),
                export.summaries.len()
            );
        }

        Commands::Summaries => {
            let storage = open_storage(&cli)?;
            for summary in storage.get_summaries(&cli.user)? {
                println!(
                    "[{} {}] {}",
                    summary.summary_type.as_str(),
                    summary.range_label(),
                    truncate(&summary.content, 70)
                );
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
