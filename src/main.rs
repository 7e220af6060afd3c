use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use media_catalog_core::config::{default_config_path, CliConfig, Config};
use media_catalog_core::facade::Facade;
use media_catalog_core::models::ContentKind;
use media_catalog_core::observability::init_tracing;
use media_catalog_core::orchestrator::ProgressStage;

#[derive(Debug, Parser)]
#[command(version, about = "Mirror a remote media server's library into a local catalog")]
struct Args {
    /// Path to config.toml. Defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the SQLite database URL.
    #[arg(long)]
    database_url: Option<String>,
    /// Override the ffprobe binary used for media validation.
    #[arg(long)]
    ffprobe_path: Option<String>,
    /// Override the tracing log level (e.g. "info", "debug").
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register or update a remote server.
    AddServer { name: String, base_url: String, token: String },
    /// List registered servers.
    ListServers,
    /// Remove a server and everything synced under it.
    DeleteServer { server_id: i64 },
    /// List libraries known for a server (or every server).
    ListLibraries { server_id: Option<i64> },
    /// Ask the server for its libraries and store them locally.
    DiscoverLibraries { server_id: i64 },
    /// Enable or disable sync for a library.
    ToggleLibrary { server_id: i64, library_id: i64, enabled: bool },
    /// List path mappings for a library.
    ListMappings { server_id: i64, library_id: i64 },
    /// Add a remote-to-local path mapping.
    AddMapping {
        server_id: i64,
        library_id: i64,
        plex_path: String,
        local_path: String,
    },
    /// Remove a path mapping by id.
    DeleteMapping { server_id: i64, library_id: i64, mapping_id: i64 },
    /// Sync one or more libraries from a server.
    Sync {
        #[arg(long)]
        server_id: i64,
        #[arg(long = "library", required = true)]
        libraries: Vec<String>,
        #[arg(long = "kind", required = true, value_parser = parse_content_kind)]
        kinds: Vec<ContentKind>,
        #[arg(long)]
        limit: Option<u64>,
        /// Report what would happen without writing anything.
        #[arg(long, conflicts_with = "commit")]
        dry_run: bool,
        /// Actually write to the catalog. Mutually exclusive with --dry-run.
        #[arg(long, conflicts_with = "dry_run")]
        commit: bool,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    if let Ok(path) = dotenv() {
        eprintln!("loaded env variables from {}", path.display());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cli_config = CliConfig {
        database_url: args.database_url.clone(),
        ffprobe_path: args.ffprobe_path.clone(),
        log_level: args.log_level.clone(),
    };
    let config = match Config::resolve(&config_path, cli_config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to resolve configuration: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let _log_channel = init_tracing(&config.log_level);

    let facade = match Facade::new(&config).await {
        Ok(facade) => facade,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize catalog");
            return std::process::ExitCode::FAILURE;
        }
    };

    run_command(&facade, args.command).await
}

async fn run_command(facade: &Facade, command: Command) -> std::process::ExitCode {
    use std::process::ExitCode;

    match command {
        Command::AddServer { name, base_url, token } => match facade.add_server(&name, &base_url, &token).await {
            Ok(id) => {
                println!("server {id}");
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },
        Command::ListServers => match facade.list_servers().await {
            Ok(servers) => {
                for server in servers {
                    println!("{}\t{}\t{}", server.id, server.name, server.base_url);
                }
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },
        Command::DeleteServer { server_id } => match facade.delete_server(server_id).await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => fail_msg(format!("no such server: {server_id}")),
            Err(e) => fail(e),
        },
        Command::ListLibraries { server_id } => match facade.list_libraries(server_id).await {
            Ok(libraries) => {
                for library in libraries {
                    println!(
                        "{}\t{}\t{}\t{:?}\tsync_enabled={}",
                        library.id, library.external_key, library.title, library.kind, library.sync_enabled
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },
        Command::DiscoverLibraries { server_id } => match facade.discover_libraries(server_id).await {
            Ok(libraries) => {
                println!("discovered {} libraries", libraries.len());
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },
        Command::ToggleLibrary { server_id, library_id, enabled } => {
            match facade.toggle_library(server_id, library_id, enabled).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => fail(e),
            }
        }
        Command::ListMappings { server_id, library_id } => match facade.list_path_mappings(server_id, library_id).await {
            Ok(mappings) => {
                for mapping in mappings {
                    println!("{}\t{} -> {}", mapping.id, mapping.plex_path, mapping.local_path);
                }
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },
        Command::AddMapping { server_id, library_id, plex_path, local_path } => {
            match facade.add_path_mapping(server_id, library_id, &plex_path, &local_path).await {
                Ok(id) => {
                    println!("mapping {id}");
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }
        Command::DeleteMapping { server_id, library_id, mapping_id } => {
            match facade.delete_path_mapping(server_id, library_id, mapping_id).await {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => fail_msg(format!("no such mapping: {mapping_id}")),
                Err(e) => fail(e),
            }
        }
        Command::Sync { server_id, libraries, kinds, limit, dry_run, commit } => {
            let dry_run = dry_run || !commit;
            match facade.sync_content(server_id, &libraries, &kinds, limit, dry_run).await {
                Ok(mut rx) => {
                    let mut fatal = false;
                    while let Some(event) = rx.recv().await {
                        println!("[{:?}] {}", event.stage, event.msg);
                        if event.stage == ProgressStage::FatalError {
                            fatal = true;
                        }
                    }
                    if fatal {
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => fail(e),
            }
        }
    }
}

fn fail(e: impl std::fmt::Display) -> std::process::ExitCode {
    eprintln!("error: {e}");
    std::process::ExitCode::FAILURE
}

fn fail_msg(msg: String) -> std::process::ExitCode {
    eprintln!("error: {msg}");
    std::process::ExitCode::FAILURE
}

fn parse_content_kind(s: &str) -> Result<ContentKind, String> {
    s.parse::<ContentKind>().map_err(|e| e.to_string())
}
