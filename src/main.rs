use sqlrag::cli::{Cli, Commands, ConfigAction};
use sqlrag::config::{expand_path, Config};
use sqlrag::database::SqliteDatabase;
use sqlrag::error::{Result, SqlRagError};
use sqlrag::orchestrator::AskRequest;
use sqlrag::safety::SafetyGate;
use sqlrag::services::Services;
use sqlrag::validation::SchemaValidator;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            hints,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(config, question, hints, json).await?;
        }
        Commands::Search { query, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_search(config, &query, json).await?;
        }
        Commands::Validate { sql } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_validate(config, &sql)?;
        }
        Commands::Index => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_index(config).await?;
        }
        Commands::Catalog => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_catalog(config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "sqlrag=debug" } else { "sqlrag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_ask(config: Config, question: String, hints: Vec<String>, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let orchestrator = services.orchestrator().await?;

    let mut request = AskRequest::new(question);
    if !hints.is_empty() {
        request = request.with_hints(hints);
    }

    let outcome = orchestrator.ask(&request).await;

    if json {
        println!("{}", to_json(&outcome.response)?);
    } else {
        println!("{}", outcome.response.text);
        if !outcome.response.citations.is_empty() {
            let tables: Vec<&str> = outcome
                .response
                .citations
                .iter()
                .map(|c| c.title.as_str())
                .collect();
            println!("\nTables: {}", tables.join(", "));
        }
        println!(
            "\n({} attempt(s), {:.0} ms, {} tokens in / {} out)",
            outcome.attempts,
            outcome.response.metrics.latency_ms,
            outcome.response.metrics.tokens.input,
            outcome.response.metrics.tokens.output
        );
    }

    Ok(())
}

async fn cmd_search(config: Config, query: &str, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let orchestrator = services.orchestrator().await?;
    let ranked = orchestrator.search(query).await?;

    if json {
        println!("{}", to_json(&ranked)?);
        return Ok(());
    }

    if ranked.is_empty() {
        println!("No matching tables");
        return Ok(());
    }

    for (i, candidate) in ranked.iter().enumerate() {
        println!(
            "{:>2}. {:<30} final {:.3}  hybrid {:.3}  rerank {:.3}",
            i + 1,
            candidate.table_name().unwrap_or("-"),
            candidate.final_score,
            candidate.hybrid_score,
            candidate.rerank_score
        );
    }

    Ok(())
}

fn cmd_validate(config: Config, sql: &str) -> Result<()> {
    let database = open_database(&config)?;
    let validator = SchemaValidator::load(database, config.validation.column_aliases)?;

    let result = validator.validate(sql);
    if result.valid {
        println!("✓ Schema validation passed");
    } else {
        println!("✗ Schema validation failed");
        for error in &result.errors {
            println!("  - {}", error);
        }
        for suggestion in &result.suggestions {
            println!("  ? {}", suggestion);
        }
    }

    let verdict = SafetyGate::new().check(sql);
    if verdict.allowed {
        println!("✓ Safety check passed");
    } else {
        println!("✗ Safety check failed: {}", verdict.reason);
    }

    Ok(())
}

async fn cmd_index(config: Config) -> Result<()> {
    let backend = config.index_store.backend.clone();
    let services = Services::open(config).await?;
    let report = services.sync_index().await?;

    println!("✓ Schema index synced ({})", backend);
    println!("  Added:     {}", report.added);
    println!("  Updated:   {}", report.updated);
    println!("  Unchanged: {}", report.unchanged);
    println!("  Removed:   {}", report.removed);

    Ok(())
}

fn cmd_catalog(config: Config) -> Result<()> {
    let validator = SchemaValidator::load(open_database(&config)?, Vec::new())?;
    let catalog = validator.catalog();

    if catalog.is_empty() {
        println!("No tables found");
        return Ok(());
    }

    for table in catalog.table_names() {
        let columns: Vec<&str> = catalog
            .columns(table)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default();
        println!("{} ({})", table, columns.join(", "));
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::default_path()?.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'sqlrag config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn open_database(config: &Config) -> Result<Arc<SqliteDatabase>> {
    let mut database = config.database.clone();
    database.path = expand_path(&database.path)?;
    Ok(Arc::new(SqliteDatabase::open(&database)?))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| SqlRagError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}
