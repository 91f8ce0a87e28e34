mod logging;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mekiki_core::clock::now_utc;
use mekiki_core::ingest::{FeedEntry, IngestOutcome, ingest_manual};
use mekiki_core::learning::LearnOutcome;
use mekiki_core::scheduler::{Scheduler, SyncReport};
use mekiki_core::schema::LabelKind;
use mekiki_core::scoring::{TasteScorer, round_score};
use mekiki_core::oracle::{model_catalog, ollama_models};
use mekiki_core::settings::{self, SettingKey};
use mekiki_core::{Config, CurationError, HttpOracle, actions, db, proposal};
use rusqlite::Connection;
use schemars::schema_for;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(name = "mekiki")]
#[command(about = "Mekiki curation CLI", long_about = None)]
struct Cli {
    /// Configuration directory
    #[arg(long, global = true, default_value = "config")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export JSON Schemas for stored records and policy files
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
    /// Ingest feed entries (optional) and run one serving cycle
    Sync {
        /// JSON array of feed entries to ingest first
        #[arg(long)]
        feed: Option<PathBuf>,
    },
    /// Run the batch learner
    Learn {
        /// Ignore the minimum new-event threshold
        #[arg(long)]
        force: bool,
    },
    /// Expire stale pending proposals
    Expire,
    /// Expire, sync, then learn, once
    Once {
        #[arg(long)]
        feed: Option<PathBuf>,
    },
    /// Stop syncing (manual and scheduled) until resumed
    Pause,
    /// Resume syncing
    Resume,
    /// Show or override runtime settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Show, list or choose the default model
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
    /// Run scheduled jobs until killed
    Daemon {
        /// Feed file re-read on every sync tick
        #[arg(long)]
        feed: Option<PathBuf>,
    },
    /// Add a URL or a piece of text as a curator-supplied candidate
    Ingest {
        input: String,
        #[arg(long, default_value = "cli")]
        channel: String,
    },
    /// Label a candidate keep, unsure or discard
    Label {
        candidate_id: String,
        label: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Attach a note to a candidate
    Note {
        candidate_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Print a candidate's link and record that it was opened
    Open {
        candidate_id: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Review taste profile proposals
    Proposal {
        #[command(subcommand)]
        command: ProposalCommands,
    },
    /// Inspect the active taste profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Markdown library export
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },
    /// Print the current per-signal taste scores
    Scores,
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProposalCommands {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Show {
        id: String,
    },
    Approve {
        id: String,
    },
    Reject {
        id: String,
    },
    /// Approve with a hand-edited profile read from a file
    Edit {
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Remember where the proposal was presented (message id, permalink)
    Link {
        id: String,
        message_ref: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show,
    /// Store an override (language, min_new_events_to_run, lookback_days,
    /// manual_boost, half_life_days, proposal_expire_hours)
    Set {
        key: String,
        value: String,
    },
    /// Drop all stored overrides except the pause flag
    Reset,
}

#[derive(Subcommand)]
enum ModelCommands {
    Show,
    List,
    Set {
        provider: String,
        model: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    Show,
}

#[derive(Subcommand)]
enum LibraryCommands {
    Build {
        /// Overrides `library_dir` from runtime.toml
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.verbose, cli.log_dir.as_deref())?;

    if let Commands::Schema { command } = &cli.command {
        return match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        };
    }

    let mut config = Config::load_from_dir(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let conn = db::open(&config.runtime.database_path)
        .with_context(|| format!("opening {}", config.runtime.database_path.display()))?;
    settings::apply(&conn, &mut config)?;
    let oracle = HttpOracle::new(&config.llm);
    let scheduler = Scheduler::new(&conn, &config, &oracle);

    match cli.command {
        Commands::Schema { .. } => Ok(()),
        Commands::Sync { feed } => {
            if scheduler.is_paused()? {
                println!("Sync is paused. Run `mekiki resume` first.");
                return Ok(());
            }
            let entries = read_feed(feed.as_deref())?;
            match scheduler.sync(&entries, now_utc())? {
                Some(report) => print_sync(&report),
                None => println!("Sync already running."),
            }
            Ok(())
        }
        Commands::Learn { force } => {
            print_learn(&scheduler.learn(force, now_utc())?);
            Ok(())
        }
        Commands::Expire => {
            let expired = scheduler.expire(now_utc())?;
            println!("Expired {} proposal(s).", expired.len());
            for id in expired {
                println!("  {id}");
            }
            Ok(())
        }
        Commands::Once { feed } => {
            let entries = read_feed(feed.as_deref())?;
            let report = scheduler.run_once(&entries, now_utc())?;
            println!("Expired {} proposal(s).", report.expired.len());
            match &report.sync {
                Some(sync) => print_sync(sync),
                None => println!("Sync skipped (paused or already running)."),
            }
            print_learn(&report.learn);
            Ok(())
        }
        Commands::Pause => {
            if settings::set_paused(&conn, true, now_utc())? {
                println!("Paused. Labels and proposals still work. Use `mekiki resume` to resume.");
            } else {
                println!("Already paused.");
            }
            Ok(())
        }
        Commands::Resume => {
            if settings::set_paused(&conn, false, now_utc())? {
                println!("Resumed.");
            } else {
                println!("Not paused.");
            }
            Ok(())
        }
        Commands::Config { command } => run_config(&conn, &config, command),
        Commands::Model { command } => run_model(&conn, &config, command),
        Commands::Daemon { feed } => {
            let shutdown = AtomicBool::new(false);
            let fetch = || read_feed(feed.as_deref()).map_err(|err| CurationError::Config(format!("{err:#}")));
            scheduler.daemon(&fetch, &shutdown);
            Ok(())
        }
        Commands::Ingest { input, channel } => {
            match ingest_manual(&conn, &config, &oracle, &input, &channel, now_utc())? {
                IngestOutcome::Created(candidate) => {
                    println!("Ingested {} ({})", candidate.id, candidate.title);
                    if !candidate.payload.signals.is_empty() {
                        println!("  signals: {}", candidate.payload.signals.join(", "));
                    }
                }
                IngestOutcome::Duplicate { id } => println!("Already ingested as {id}"),
            }
            Ok(())
        }
        Commands::Label {
            candidate_id,
            label,
            actor,
        } => {
            let label: LabelKind = label.parse()?;
            actions::label(&conn, &candidate_id, label, &actor, None, now_utc())?;
            println!("Labelled {candidate_id} {}", label.key());
            Ok(())
        }
        Commands::Note {
            candidate_id,
            title,
            body,
            actor,
        } => {
            actions::add_note(&conn, &candidate_id, &actor, &title, &body, now_utc())?;
            println!("Note added to {candidate_id}");
            Ok(())
        }
        Commands::Open { candidate_id, actor } => {
            let Some(candidate) = db::get_candidate(&conn, &candidate_id)? else {
                bail!("candidate not found: {candidate_id}");
            };
            actions::record_open(&conn, &candidate_id, &actor, now_utc())?;
            println!("{}", candidate.url.unwrap_or(candidate.title));
            Ok(())
        }
        Commands::Proposal { command } => run_proposal(&conn, command),
        Commands::Profile { command } => match command {
            ProfileCommands::Show => {
                match db::get_active_profile(&conn)? {
                    Some(version) => {
                        println!(
                            "# version {} ({}, {})\n",
                            version.id,
                            version.source.as_str(),
                            version.created_at
                        );
                        println!("{}", version.profile_md);
                    }
                    None => {
                        println!("# seed (no stored version yet)\n");
                        println!("{}", config.taste_profile_seed);
                    }
                }
                Ok(())
            }
        },
        Commands::Library { command } => match command {
            LibraryCommands::Build { dir } => {
                let dir = dir.unwrap_or_else(|| config.runtime.library_dir.clone());
                let summary = library::build_library(&conn, &dir)?;
                println!(
                    "Library at {}: {} note(s) written, {} removed",
                    dir.display(),
                    summary.written,
                    summary.removed
                );
                Ok(())
            }
        },
        Commands::Scores => {
            let events = db::list_label_events(&conn, None, None)?;
            let scores = TasteScorer::new(&config.learning, now_utc()).all_scores(&events, &config.signals)?;
            let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            println!("{} label event(s)", events.len());
            for (signal, score) in ranked {
                println!("{:>8.2}  {signal}", round_score(score, 2));
            }
            Ok(())
        }
    }
}

fn run_proposal(conn: &Connection, command: ProposalCommands) -> Result<()> {
    match command {
        ProposalCommands::List { limit } => {
            let proposals = db::list_proposals(conn, limit)?;
            if proposals.is_empty() {
                println!("No proposals.");
            }
            for p in proposals {
                println!(
                    "{}  {:<8}  conf={:.2}  {}  {}",
                    p.id,
                    p.status.as_str(),
                    p.confidence,
                    p.created_at,
                    p.diff_summary.first().map(String::as_str).unwrap_or("")
                );
            }
        }
        ProposalCommands::Show { id } => {
            let Some(p) = db::get_proposal(conn, &id)? else {
                bail!("proposal not found: {id}");
            };
            println!("Proposal {} [{}] confidence {:.2}", p.id, p.status, p.confidence);
            println!("\n## Changes");
            for line in &p.diff_summary {
                println!("- {line}");
            }
            if !p.risks.is_empty() {
                println!("\n## Risks");
                for line in &p.risks {
                    println!("- {line}");
                }
            }
            if let Some(notes) = &p.notes {
                println!("\n## Notes\n{notes}");
            }
            if let Some(message_ref) = &p.message_ref {
                println!("\nPresented as {message_ref}");
            }
            println!("\n## Proposed profile\n{}", p.new_profile_md);
        }
        ProposalCommands::Approve { id } => {
            let version = proposal::approve(conn, &id, None, now_utc())?;
            println!("Approved {id}; profile version {version} is active.");
        }
        ProposalCommands::Reject { id } => {
            proposal::reject(conn, &id, now_utc())?;
            println!("Rejected {id}.");
        }
        ProposalCommands::Edit { id, file } => {
            let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let version = proposal::approve(conn, &id, Some(&text), now_utc())?;
            println!("Approved {id} with edits; profile version {version} is active.");
        }
        ProposalCommands::Link { id, message_ref } => {
            proposal::set_message_ref(conn, &id, &message_ref)?;
            println!("Linked {id} to {message_ref}.");
        }
    }
    Ok(())
}

fn run_config(conn: &Connection, config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let route = &config.llm.default_route;
            println!("LLM");
            println!("  language: {}", config.llm.language);
            println!("  provider: {}", route.provider);
            println!("  model: {}", route.model);
            println!("\nLearning");
            for key in SettingKey::ALL.into_iter().filter(|key| *key != SettingKey::Language) {
                println!("  {key}: {}", key.current(config));
            }
            let state = if settings::is_paused(conn)? { "paused" } else { "active" };
            println!("\nSync: {state}");
            let overrides = db::list_settings(conn)?;
            if !overrides.is_empty() {
                println!("\nStored overrides");
                for (key, value) in overrides {
                    println!("  {key} = {value}");
                }
            }
            println!("\nUse `mekiki config set <key> <value>` to change.");
        }
        ConfigCommands::Set { key, value } => {
            let key: SettingKey = key.parse()?;
            let stored = settings::set_value(conn, config, key, &value, now_utc())?;
            println!("{key} -> {stored}");
        }
        ConfigCommands::Reset => {
            let removed = settings::reset(conn)?;
            println!("Removed {removed} override(s).");
        }
    }
    Ok(())
}

fn run_model(conn: &Connection, config: &Config, command: ModelCommands) -> Result<()> {
    let route = &config.llm.default_route;
    match command {
        ModelCommands::Show => {
            let label = config
                .llm
                .providers
                .get(&route.provider)
                .map(|p| p.display_name(&route.provider))
                .unwrap_or(route.provider.as_str());
            println!("Provider: {label} ({})", route.provider);
            println!("Model: {}", route.model);
        }
        ModelCommands::List => {
            for provider in model_catalog(&config.llm, &ollama_models) {
                let status = if provider.available { "ok" } else { "--" };
                println!("[{status}] {} ({})", provider.label, provider.key);
                for model in &provider.models {
                    let current = provider.key == route.provider && *model == route.model;
                    println!("     {model}{}", if current { "  <- current" } else { "" });
                }
            }
            println!("\nok = API key set or server reachable, -- = not usable");
        }
        ModelCommands::Set { provider, model } => {
            let catalog = model_catalog(&config.llm, &ollama_models);
            settings::set_model(conn, &catalog, &provider, &model, now_utc())?;
            println!("Model updated: {provider} / {model}");
        }
    }
    Ok(())
}

fn read_feed(path: Option<&Path>) -> Result<Vec<FeedEntry>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = fs::read_to_string(path).with_context(|| format!("reading feed file {}", path.display()))?;
    let entries: Vec<FeedEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing feed file {}", path.display()))?;
    Ok(entries)
}

fn print_sync(report: &SyncReport) {
    let serving = &report.serving;
    println!(
        "Ingested {}; {} candidate(s), {} judged, {} cached, {} skipped, {} posted.",
        report.ingested,
        serving.total_candidates,
        serving.llm_judged,
        serving.cached,
        serving.skipped,
        report.posted()
    );
    for (i, pick) in serving.selected.iter().enumerate() {
        println!(
            "{:>2}. [{}] {:.2} {}",
            i + 1,
            pick.judgement.bucket,
            pick.final_score,
            pick.candidate.title
        );
        println!("    {}  {}", pick.candidate.id, pick.reason);
        if let Some(url) = &pick.candidate.url {
            println!("    {url}");
        }
    }
}

fn print_learn(outcome: &LearnOutcome) {
    println!("{}", outcome.describe());
    if let Some(id) = outcome.proposal_id() {
        println!("Review with: mekiki proposal show {id}");
    }
}

fn schema_export(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;

    let schemas = [
        ("Candidate", schema_for!(mekiki_core::schema::Candidate)),
        ("Action", schema_for!(mekiki_core::schema::Action)),
        ("Judgement", schema_for!(mekiki_core::schema::Judgement)),
        ("Proposal", schema_for!(mekiki_core::schema::Proposal)),
        ("TasteProfileVersion", schema_for!(mekiki_core::schema::TasteProfileVersion)),
        ("LearningRun", schema_for!(mekiki_core::schema::LearningRun)),
        ("Post", schema_for!(mekiki_core::schema::Post)),
        ("ServingPolicy", schema_for!(mekiki_core::config::ServingPolicy)),
        ("LearningConfig", schema_for!(mekiki_core::config::LearningConfig)),
        ("ProfileUpdateConfig", schema_for!(mekiki_core::config::ProfileUpdateConfig)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
