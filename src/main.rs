use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use proofline::{
    config::{EngineSettings, ProjectConfig, ServerSettings, Workspace, DEFAULT_PORT},
    engine::{CreateTaskRequest, UpdateTaskRequest},
    error::EngineError,
    model::{EntityKind, IterationStatus, TaskStatus, TaskType},
    AppContext,
};

#[derive(Parser)]
#[command(
    name = "proofline",
    about = "Proofline — project-workflow control plane with attestation-gated completion",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Workspace directory (holds .proofline/)
    #[arg(long, env = "PROOFLINE_WORKSPACE", global = true)]
    workspace: Option<PathBuf>,

    /// Acting identity for mutating commands
    #[arg(long, env = "PROOFLINE_ACTOR", global = true, default_value = "tester")]
    actor: String,

    /// Project id (defaults to the workspace config's project)
    #[arg(long, env = "PROOFLINE_PROJECT", global = true)]
    project: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PROOFLINE_LOG", global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the workspace: create .proofline/, apply migrations, and
    /// seed the project from proofline.yml (written with defaults if absent).
    Init,
    /// Run the HTTP API server.
    Serve {
        /// Listen port
        #[arg(long, env = "PROOFLINE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// API base path
        #[arg(long, default_value = "/v0")]
        base_path: String,
    },
    /// Task operations.
    Task {
        #[command(subcommand)]
        action: TaskCommand,
    },
    /// Iteration operations.
    Iteration {
        #[command(subcommand)]
        action: IterationCommand,
    },
    /// Attestation operations.
    Attest {
        #[command(subcommand)]
        action: AttestCommand,
    },
    /// Event journal operations.
    Log {
        #[command(subcommand)]
        action: LogCommand,
    },
    /// Config operations.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task.
    Create {
        #[arg(long)]
        title: String,
        /// technical | feature | bug | docs | chore
        #[arg(long = "type")]
        task_type: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        /// May be given multiple times
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Policy preset name overriding the type default
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Partially update a task.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long = "add-depends-on")]
        add_depends_on: Vec<String>,
        #[arg(long = "remove-depends-on")]
        remove_depends_on: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Claim (or renew) the exclusive work lease on a task.
    Claim { id: String },
    /// Complete a task.
    Done {
        id: String,
        /// Bypass validation (requires task.force_done)
        #[arg(long)]
        force: bool,
        /// Opaque work proof JSON object
        #[arg(long)]
        work_proof: Option<String>,
    },
    /// List tasks.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the parent/child task tree.
    Tree {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IterationCommand {
    Create {
        #[arg(long, default_value = "")]
        goal: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// Transition an iteration's status.
    SetStatus { id: String, status: String },
}

#[derive(Subcommand)]
enum AttestCommand {
    /// Record an attestation about an entity.
    Add {
        /// project | iteration | task | decision
        #[arg(long)]
        entity_kind: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long)]
        kind: String,
        /// Opaque payload JSON object
        #[arg(long)]
        payload: Option<String>,
    },
    List {
        #[arg(long)]
        entity_kind: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum LogCommand {
    /// Print the newest journal events.
    Tail {
        #[arg(long = "type")]
        event_type: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Keep polling for new events
        #[arg(long)]
        follow: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the project's config document.
    Show,
    /// Check proofline.yml for dangling references; exit non-zero if invalid.
    Validate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log.as_deref());
    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.unwrap_or("warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> Result<()> {
    let workspace = Workspace::at(
        args.workspace
            .clone()
            .unwrap_or(std::env::current_dir().context("cannot resolve working directory")?),
    );

    match args.command {
        Command::Init => init(&workspace, &args.actor).await,
        Command::Serve { port, base_path } => serve(&workspace, port, base_path).await,
        Command::Task { action } => {
            let ctx = open(&workspace).await?;
            let project = resolve_project(&workspace, args.project.as_deref())?;
            task_command(&ctx, &args.actor, &project, action).await
        }
        Command::Iteration { action } => {
            let ctx = open(&workspace).await?;
            let project = resolve_project(&workspace, args.project.as_deref())?;
            iteration_command(&ctx, &args.actor, &project, action).await
        }
        Command::Attest { action } => {
            let ctx = open(&workspace).await?;
            let project = resolve_project(&workspace, args.project.as_deref())?;
            attest_command(&ctx, &args.actor, &project, action).await
        }
        Command::Log { action } => {
            let ctx = open(&workspace).await?;
            let project = resolve_project(&workspace, args.project.as_deref())?;
            log_command(&ctx, &project, action).await
        }
        Command::Config { action } => {
            let project = resolve_project(&workspace, args.project.as_deref())?;
            config_command(&workspace, &project, action).await
        }
    }
}

async fn open(workspace: &Workspace) -> Result<Arc<AppContext>> {
    AppContext::open(workspace, ServerSettings::default(), EngineSettings::default()).await
}

/// Project id: explicit flag, else the workspace config document, else the
/// conventional default.
fn resolve_project(workspace: &Workspace, flag: Option<&str>) -> Result<String> {
    if let Some(project) = flag {
        return Ok(project.to_string());
    }
    if let Some(config) = workspace.load_config()? {
        return Ok(config.project.id);
    }
    Ok("proofline".to_string())
}

async fn init(workspace: &Workspace, actor: &str) -> Result<()> {
    std::fs::create_dir_all(workspace.dir())?;

    let config = match workspace.load_config()? {
        Some(config) => config,
        None => {
            let config = ProjectConfig::default_document("proofline", "software");
            let yaml = serde_yaml::to_string(&config)?;
            std::fs::write(workspace.config_path(), yaml)?;
            info!(path = %workspace.config_path().display(), "wrote default proofline.yml");
            config
        }
    };

    let ctx = open(workspace).await?;
    match ctx.engine.init_project(actor, config.clone(), "").await {
        Ok(project) => {
            println!("initialized project {} in {}", project.id, workspace.dir().display());
            Ok(())
        }
        Err(EngineError::Conflict { .. }) => {
            println!("project {} already initialized", config.project.id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn serve(workspace: &Workspace, port: u16, base_path: String) -> Result<()> {
    let server = ServerSettings { port, base_path };
    let settings = EngineSettings::default();
    let sweep_interval = settings.lease_sweep_interval;
    let ctx = AppContext::open(workspace, server, settings).await?;

    if let Some(interval) = sweep_interval {
        let engine = ctx.engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match engine.sweep_expired_leases().await {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "expired leases swept"),
                    Err(e) => warn!(err = %e, "lease sweep failed"),
                }
            }
        });
    }

    proofline::rest::start_server(ctx).await
}

fn parse_json_object(raw: Option<String>, flag: &str) -> Result<Option<serde_json::Value>> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("--{flag} must be JSON"))?;
            anyhow::ensure!(value.is_object(), "--{flag} must be a JSON object");
            Ok(Some(value))
        }
    }
}

async fn task_command(
    ctx: &AppContext,
    actor: &str,
    project: &str,
    action: TaskCommand,
) -> Result<()> {
    match action {
        TaskCommand::Create {
            title,
            task_type,
            description,
            id,
            iteration,
            parent,
            depends_on,
            preset,
            json: as_json,
        } => {
            let task_type = TaskType::parse(&task_type)
                .ok_or_else(|| anyhow::anyhow!("unknown task type: {task_type}"))?;
            let task = ctx
                .engine
                .create_task(
                    actor,
                    project,
                    CreateTaskRequest {
                        id,
                        title,
                        task_type,
                        description,
                        iteration_id: iteration,
                        parent_id: parent,
                        assignee_id: None,
                        depends_on,
                        preset,
                        validation: None,
                        work_proof: None,
                    },
                )
                .await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("created task {} ({})", task.id, task.title);
            }
            Ok(())
        }
        TaskCommand::Update {
            id,
            title,
            description,
            status,
            assignee,
            add_depends_on,
            remove_depends_on,
            json: as_json,
        } => {
            let status = match status {
                Some(s) => Some(
                    TaskStatus::parse(&s).ok_or_else(|| anyhow::anyhow!("unknown status: {s}"))?,
                ),
                None => None,
            };
            let task = ctx
                .engine
                .update_task(
                    actor,
                    project,
                    &id,
                    UpdateTaskRequest {
                        title,
                        description,
                        status,
                        assignee_id: assignee,
                        add_depends_on,
                        remove_depends_on,
                        ..Default::default()
                    },
                )
                .await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("updated task {} (status {})", task.id, task.status);
            }
            Ok(())
        }
        TaskCommand::Claim { id } => {
            let lease = ctx.engine.claim_task(actor, project, &id).await?;
            println!("leased {} to {} until {}", lease.task_id, lease.owner_id, lease.expires_at);
            Ok(())
        }
        TaskCommand::Done { id, force, work_proof } => {
            let work_proof = parse_json_object(work_proof, "work-proof")?;
            let task = ctx
                .engine
                .complete_task(actor, project, &id, force, work_proof)
                .await?;
            println!("task {} done at {}", task.id, task.completed_at.as_deref().unwrap_or("-"));
            Ok(())
        }
        TaskCommand::List { status, iteration, json: as_json } => {
            let page = ctx
                .engine
                .list_tasks(project, status.as_deref(), iteration.as_deref(), None, None)
                .await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                for task in &page.items {
                    println!("{}  {:<12} {}", task.id, task.status.as_str(), task.title);
                }
            }
            Ok(())
        }
        TaskCommand::Tree { json: as_json } => {
            let tree = ctx.engine.task_tree(project).await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                fn print_node(node: &proofline::engine::TaskTreeNode, depth: usize) {
                    println!(
                        "{}{}  {:<12} {}",
                        "  ".repeat(depth),
                        node.task.id,
                        node.task.status.as_str(),
                        node.task.title
                    );
                    for child in &node.children {
                        print_node(child, depth + 1);
                    }
                }
                for node in &tree {
                    print_node(node, 0);
                }
            }
            Ok(())
        }
    }
}

async fn iteration_command(
    ctx: &AppContext,
    actor: &str,
    project: &str,
    action: IterationCommand,
) -> Result<()> {
    match action {
        IterationCommand::Create { goal, id } => {
            let iteration = ctx.engine.create_iteration(actor, project, id, &goal).await?;
            println!("created iteration {}", iteration.id);
            Ok(())
        }
        IterationCommand::SetStatus { id, status } => {
            let status = IterationStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("unknown iteration status: {status}"))?;
            let iteration = ctx
                .engine
                .set_iteration_status(actor, project, &id, status)
                .await?;
            println!("iteration {} is now {}", iteration.id, iteration.status.as_str());
            Ok(())
        }
    }
}

async fn attest_command(
    ctx: &AppContext,
    actor: &str,
    project: &str,
    action: AttestCommand,
) -> Result<()> {
    match action {
        AttestCommand::Add { entity_kind, entity_id, kind, payload } => {
            let entity_kind = EntityKind::parse(&entity_kind)
                .ok_or_else(|| anyhow::anyhow!("unknown entity kind: {entity_kind}"))?;
            let payload = parse_json_object(payload, "payload")?.unwrap_or_else(|| json!({}));
            let attestation = ctx
                .engine
                .create_attestation(actor, project, entity_kind, &entity_id, &kind, payload)
                .await?;
            println!(
                "attested {} on {} {} by {}",
                attestation.kind, attestation.entity_kind.as_str(), attestation.entity_id,
                attestation.actor_id
            );
            Ok(())
        }
        AttestCommand::List { entity_kind, entity_id, kind, json: as_json } => {
            let page = ctx
                .engine
                .list_attestations(
                    project,
                    entity_kind.as_deref(),
                    entity_id.as_deref(),
                    kind.as_deref(),
                    None,
                    None,
                )
                .await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                for a in &page.items {
                    println!(
                        "{}  {} {} {} by {}",
                        a.ts, a.kind, a.entity_kind.as_str(), a.entity_id, a.actor_id
                    );
                }
            }
            Ok(())
        }
    }
}

async fn log_command(ctx: &AppContext, project: &str, action: LogCommand) -> Result<()> {
    let LogCommand::Tail { event_type, limit, follow, json: as_json } = action;

    let print_event = |event: &proofline::model::Event| {
        if as_json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(err = %e, "unprintable event"),
            }
        } else {
            println!(
                "{:>6}  {}  {:<26} {}/{} by {}",
                event.id, event.ts, event.event_type, event.entity_kind, event.entity_id,
                event.actor_id
            );
        }
    };

    let page = ctx
        .engine
        .list_events(project, event_type.as_deref(), None, None, Some(limit))
        .await?;
    // Newest-first from the API; a tail reads oldest-first.
    let mut last_seen = page.items.first().map(|e| e.id).unwrap_or(0);
    for event in page.items.iter().rev() {
        print_event(event);
    }

    while follow {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let page = ctx
            .engine
            .list_events(project, event_type.as_deref(), None, None, Some(200))
            .await?;
        let fresh: Vec<_> = page.items.into_iter().filter(|e| e.id > last_seen).collect();
        for event in fresh.iter().rev() {
            print_event(event);
        }
        if let Some(max) = fresh.iter().map(|e| e.id).max() {
            last_seen = max;
        }
    }
    Ok(())
}

async fn config_command(
    workspace: &Workspace,
    project: &str,
    action: ConfigCommand,
) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            let ctx = open(workspace).await?;
            let config = ctx.engine.get_config(project).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommand::Validate => {
            let config = workspace
                .load_config()?
                .unwrap_or_else(|| ProjectConfig::default_document(project, "software"));
            let problems = config.validate();
            if problems.is_empty() {
                println!("ok");
                Ok(())
            } else {
                for problem in &problems {
                    eprintln!("{problem}");
                }
                anyhow::bail!("{} problem(s) found", problems.len())
            }
        }
    }
}
