//! Korral CLI entrypoint.
//!
//! This is the main entrypoint for the korral command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use korral::cli::{Cli, Commands, OutputFormatter, StateCommands};
use korral::config::{find_config_file, ConfigHasher, ConfigParser, ConfigValidator, StateBackend};
use korral::deployer::Deployer;
use korral::error::Result;
use korral::planner::{DeploymentPlan, DiffEngine};
use korral::provider::{HttpApiExecutor, ResourceProvisioner};
use korral::state::{LocalStateStore, S3StateStore, StateStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings),
        Commands::Graph => cmd_graph(cli.config.as_ref(), &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(cli.config.as_ref(), yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::Status => cmd_status(cli.config.as_ref(), &formatter).await,
        Commands::Outputs => cmd_outputs(cli.config.as_ref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new Korral project in: {}", path.display());

    let config_path = path.join("korral.stack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    // Write stack template
    let config_template = include_str!("../templates/korral.stack.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    // Write .env.example
    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let gitignore_content = ".env\n.korral/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".korral") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Korral")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".korral") {
                writeln!(file, ".korral/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your API credentials");
    eprintln!("  2. Edit korral.stack.yaml with your resource declarations");
    eprintln!("  3. Run 'korral validate' to check your stack");
    eprintln!("  4. Run 'korral plan' to see what will be provisioned");
    eprintln!("  5. Run 'korral apply' to provision your resources");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating stack: {}", config_file.display());

    // Load .env
    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    // Parse config
    let config = parser.load_file(&config_file)?;

    // Validate the declared set, then the graph invariants
    let validator = ConfigValidator::new();
    let result = validator.validate(&config)?;

    let graph = config.build_graph()?;
    graph.validate()?;

    if result.is_valid() {
        eprintln!("Stack is valid!");
        if show_warnings && !result.warnings.is_empty() {
            eprintln!("\nWarnings:");
            for warning in &result.warnings {
                eprintln!("  - {warning}");
            }
        }
    }

    // Show summary
    eprintln!("\nStack summary:");
    eprintln!("  Project: {}", config.project.name);
    eprintln!("  Environment: {}", config.project.environment);
    eprintln!("  Resources: {}", config.resources.len());
    eprintln!("  References: {}", graph.references().len());
    eprintln!("  Exports: {}", config.exports.len());

    Ok(())
}

/// Show the resolved creation order.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    let parser = ConfigParser::new();
    let config = parser.load_file(&config_file)?;

    ConfigValidator::new().validate(&config)?;

    let graph = config.build_graph()?;
    graph.validate()?;
    let order = graph.topological_order()?;

    eprintln!("{}", formatter.format_graph(&order));
    Ok(())
}

/// Show the deployment plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    // Load the previous snapshot
    let snapshot = state_store.load().await?;

    // Build and validate the graph
    let graph = config.build_graph()?;
    graph.validate()?;

    // Compute diff and plan
    let hasher = ConfigHasher::new();
    let config_hash = hasher.hash_config(&config);
    let diff_engine = DiffEngine::new();
    let diff = diff_engine.compute_diff(&config, &graph, snapshot.as_ref());
    let plan = DeploymentPlan::from_diff(&diff, &graph, snapshot.as_ref(), &config_hash)?;

    // Output
    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    if detailed {
        eprintln!("\nDetailed changes:");
        for entry in diff.actionable_diffs() {
            eprintln!("  {entry}");
        }
    }

    Ok(())
}

/// Apply the deployment plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let provisioner = create_provisioner()?;

    let deployer = Deployer::new(&config, &state_store, &provisioner);

    // Show the plan first
    let (plan, _diff) = deployer.plan().await?;
    if !plan.has_changes() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    // Confirm
    if !auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    // Apply (re-plans under the state lock)
    let outcome = deployer.apply().await?;

    eprintln!("\n{}", formatter.format_report(&outcome.report));
    Ok(())
}

/// Destroy all provisioned resources.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    // Show what will be destroyed
    let snapshot = state_store.load().await?;
    let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
        eprintln!("No resources to destroy.");
        return Ok(());
    };

    eprintln!("The following resources will be destroyed:");
    for (id, record) in &snapshot.resources {
        eprintln!("  - {id} ({}, {})", record.kind, record.physical_resource_id);
    }

    // Confirm
    if !auto_approve {
        eprint!("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "destroy" {
            eprintln!("Destruction cancelled.");
            return Ok(());
        }
    }

    let provisioner = create_provisioner()?;
    let deployer = Deployer::new(&config, &state_store, &provisioner);
    let outcome = deployer.destroy().await?;

    eprintln!("\n{}", formatter.format_report(&outcome.report));
    Ok(())
}

/// Show the recorded deployment status.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    if let Some(snapshot) = state_store.load().await? {
        eprintln!("{}", formatter.format_status(&snapshot));
    } else {
        eprintln!("No snapshot found. Run 'korral apply' first.");
    }

    Ok(())
}

/// Show the exported values.
async fn cmd_outputs(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    if let Some(snapshot) = state_store.load().await? {
        eprintln!("{}", formatter.format_outputs(&snapshot));
    } else {
        eprintln!("No snapshot found. Run 'korral apply' first.");
    }

    Ok(())
}

/// Snapshot management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show => {
            if let Some(snapshot) = state_store.load().await? {
                eprintln!("{}", formatter.format_state(&snapshot));
            } else {
                eprintln!("No snapshot found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = state_store.acquire_lock(holder_str).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                // Force unlock by releasing whatever lock is present
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads configuration and creates the appropriate snapshot store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(korral::config::DeployConfig, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading stack from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;

    // Validate
    let validator = ConfigValidator::new();
    validator.validate(&config)?;

    // Create snapshot store based on config
    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || {
                    config_file
                        .parent()
                        .unwrap_or_else(|| std::path::Path::new("."))
                        .join(".korral")
                },
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| korral::error::KorralError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((config, state_store))
}

/// Creates the control-plane provisioner from environment credentials.
fn create_provisioner() -> Result<ResourceProvisioner> {
    let endpoint = ConfigParser::get_api_url()?;
    let token = ConfigParser::get_api_token()?;
    let executor = HttpApiExecutor::new(&endpoint, &token)?;
    Ok(ResourceProvisioner::new(Arc::new(executor)))
}
