use std::{collections::HashMap, env, sync::Arc, time::Duration};

use clap::Parser;
use cli::{Args, Commands};
use droidrepo_config::{
    config::{self, generate_default_config, get_config, Config, CONFIG_PATH},
    error::ConfigError,
};
use droidrepo_core::{
    error::{CoreError, ErrorContext},
    CoreResult, RepoManager,
};
use droidrepo_dl::http_client::configure_http_client;
use droidrepo_events::{ChannelSink, EventSinkHandle, NullSink};
use droidrepo_utils::path::resolve_path;
use logging::setup_logging;
use progress::spawn_event_handler;
use tracing::{debug, info};
use ureq::Proxy;
use utils::{progress_enabled, set_color, set_progress};

mod cli;
mod logging;
mod progress;
mod repos;
mod utils;

fn set_config_path(path: &str) -> CoreResult<()> {
    let path = resolve_path(path).map_err(ConfigError::from)?;
    let path = if path.is_absolute() {
        path
    } else {
        env::current_dir()
            .with_context(|| "retrieving current directory".into())?
            .join(path)
    };
    *CONFIG_PATH.write().unwrap_or_else(|e| e.into_inner()) = path;
    Ok(())
}

fn setup_http_client(args: &Args, config: &Config) -> CoreResult<()> {
    let proxy = match args.proxy.as_deref().or(config.proxy.as_deref()) {
        Some(proxy) => {
            Some(Proxy::new(proxy).map_err(|err| {
                CoreError::Custom(format!("Invalid proxy {proxy}: {err}"))
            })?)
        }
        None => None,
    };
    let user_agent = args.user_agent.clone().unwrap_or_else(|| config.user_agent());
    let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(30));

    configure_http_client(|cfg| {
        cfg.user_agent = Some(user_agent);
        cfg.proxy = proxy;
        cfg.timeout = Some(timeout);
    });
    Ok(())
}

fn print_config() -> CoreResult<()> {
    let config_path = CONFIG_PATH
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .to_path_buf();

    let content = if config_path.exists() {
        std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?
    } else {
        debug!("{} does not exist, showing defaults", config_path.display());
        toml::to_string_pretty(&Config::default_config())
            .map_err(|err| CoreError::Custom(format!("Failed to serialize config: {err}")))?
    };
    info!("{content}");
    Ok(())
}

async fn run_command(
    command: Commands,
    manager: Arc<RepoManager>,
    config: &Config,
) -> CoreResult<()> {
    let locales = config.locales();
    match command {
        Commands::Add {
            url,
            yes,
            archive,
        } => repos::add_repository(&manager, &url, yes, archive, &locales)?,
        Commands::Update {
            repos,
            force,
        } => repos::update_repositories(manager, repos, force, &locales).await?,
        Commands::List {
            apps,
        } => {
            match apps {
                Some(repo_id) => repos::list_apps(&manager, repo_id)?,
                None => repos::list_repositories(&manager, &locales)?,
            }
        }
        Commands::Reorder {
            repo,
            target,
        } => repos::reorder(&manager, repo, target, &locales)?,
        Commands::Enable {
            repo,
        } => repos::set_enabled(&manager, repo, true, &locales)?,
        Commands::Disable {
            repo,
        } => repos::set_enabled(&manager, repo, false, &locales)?,
        Commands::Remove {
            repo,
            yes,
        } => repos::remove(&manager, repo, yes, &locales)?,
        Commands::Mirrors {
            repo,
            action,
        } => repos::mirrors(&manager, repo, action)?,
        Commands::Clear {
            yes,
        } => repos::clear(&manager, yes)?,
        Commands::Env => {
            info!(
                "DROIDREPO_CONFIG={}",
                CONFIG_PATH
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .display()
            );
            info!("DROIDREPO_DB={}", config.get_db_path()?.display());
            info!("DROIDREPO_CACHE={}", config.get_cache_path()?.display());
        }
        // Handled before the database is opened.
        Commands::Config | Commands::DefConfig => {}
    }
    Ok(())
}

async fn handle_cli() -> CoreResult<()> {
    let args = Args::parse();

    setup_logging(&args);

    if args.no_color {
        set_color(false);
    }
    if args.no_progress || args.json || args.quiet {
        set_progress(false);
    }

    if let Some(ref c) = args.config {
        set_config_path(c)?;
    }

    match args.command {
        Commands::DefConfig => {
            generate_default_config()?;
            return Ok(());
        }
        Commands::Config => return print_config(),
        _ => {}
    }

    config::init()?;
    let config = get_config();
    setup_http_client(&args, &config)?;

    let (events, receiver): (EventSinkHandle, _) = if progress_enabled() {
        let (sink, receiver) = ChannelSink::new();
        (Arc::new(sink), Some(receiver))
    } else {
        (Arc::new(NullSink), None)
    };

    let manager = RepoManager::from_config(&config, events)?;
    let seeded = manager.init_from_config(&config.repositories)?;
    if seeded > 0 {
        debug!("Initialized {seeded} repositories from the configuration");
    }

    let locales = config.locales();
    let labels: HashMap<_, _> = manager
        .repositories()?
        .into_iter()
        .map(|repo| {
            let label = repo
                .name(&locales)
                .map(str::to_string)
                .unwrap_or_else(|| repo.address.clone());
            (repo.repo_id, label)
        })
        .collect();
    let guard = receiver.map(|receiver| spawn_event_handler(receiver, labels));

    let manager = Arc::new(manager);
    let result = run_command(args.command, manager.clone(), &config).await;

    // The event thread only exits once every sender is gone.
    drop(manager);
    if let Some(guard) = guard {
        guard.finish();
    }
    progress::stop();

    result
}

#[tokio::main]
async fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    if let Err(err) = handle_cli().await {
        eprintln!("{:?}", miette::Report::new(err));
    }
}
