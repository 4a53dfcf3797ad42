use std::sync::Arc;

use droidrepo_core::{error::CoreError, CoreResult, IndexUpdateResult, RepoManager};
use droidrepo_db::{AppStore, Repository};
use droidrepo_events::FetchResult;
use droidrepo_index::jar::certificate_fingerprint;
use nu_ansi_term::Color::{Blue, Cyan, Green, LightRed, Magenta, Red, Yellow};
use tabled::{
    builder::Builder,
    settings::{themes::BorderCorrection, Panel, Style},
};
use tracing::{error, info, warn};

use crate::{
    cli::MirrorAction,
    utils::{confirm_action, format_millis, Colored},
};

fn display_name(repo: &Repository, locales: &[String]) -> String {
    repo.name(locales)
        .map(str::to_string)
        .unwrap_or_else(|| repo.address.clone())
}

fn report_result(name: &str, result: IndexUpdateResult) -> bool {
    match result {
        IndexUpdateResult::Processed => {
            info!("[{}] Repository synced", Colored(Magenta, name));
            true
        }
        IndexUpdateResult::Unchanged => {
            info!("[{}] Repository is up to date", Colored(Magenta, name));
            true
        }
        IndexUpdateResult::NotFound => {
            error!("[{}] No index found", Colored(Magenta, name));
            false
        }
        IndexUpdateResult::Error(err) => {
            error!("[{}] Update failed: {err}", Colored(Magenta, name));
            false
        }
    }
}

pub fn add_repository(
    manager: &RepoManager,
    url: &str,
    yes: bool,
    archive: bool,
    locales: &[String],
) -> CoreResult<()> {
    let fetched = manager.fetch_repository(url)?;
    let preview = &fetched.preview;

    let mut builder = Builder::new();
    builder.push_record(["Name".to_string(), Colored(Cyan, &preview.name).to_string()]);
    builder.push_record(["Address".to_string(), preview.address.clone()]);
    builder.push_record([
        "Fingerprint".to_string(),
        certificate_fingerprint(&preview.certificate).unwrap_or_else(|_| "-".to_string()),
    ]);
    builder.push_record(["Apps".to_string(), preview.num_apps.to_string()]);
    builder.push_record(["Updated".to_string(), format_millis(preview.timestamp)]);
    let table = builder
        .build()
        .with(Panel::header("Repository"))
        .with(Style::rounded())
        .with(BorderCorrection {})
        .to_string();
    info!("\n{table}");

    match preview.fetch_result {
        FetchResult::IsExistingRepository {
            existing_repo_id,
        } => {
            info!("Already added as repository {existing_repo_id}");
            return Ok(());
        }
        FetchResult::IsExistingMirror {
            existing_repo_id,
        } => {
            info!("Already a mirror of repository {existing_repo_id}");
            return Ok(());
        }
        FetchResult::IsNewMirror {
            existing_repo_id,
        } => {
            info!(
                "{} will be added as a mirror of repository {existing_repo_id}",
                fetched.fetch_url
            );
        }
        FetchResult::IsNewRepository | FetchResult::IsNewRepoAndNewMirror => {}
    }

    if !yes && !confirm_action("Add this repository?")? {
        info!("Cancelled");
        return Ok(());
    }

    let is_new_repository = !matches!(preview.fetch_result, FetchResult::IsNewMirror { .. });
    let repo_id = manager.add_fetched_repository(fetched)?;
    if !is_new_repository {
        return Ok(());
    }

    let repo = manager.get_repository(repo_id)?;
    let name = display_name(&repo, locales);
    if !report_result(&name, manager.update(repo_id)?) {
        return Ok(());
    }

    if archive {
        let archive_id = manager.add_archive_repo(repo_id)?;
        let archive = manager.get_repository(archive_id)?;
        report_result(&display_name(&archive, locales), manager.update(archive_id)?);
    }
    Ok(())
}

pub async fn update_repositories(
    manager: Arc<RepoManager>,
    repos: Option<Vec<i64>>,
    force: bool,
    locales: &[String],
) -> CoreResult<()> {
    let targets = match repos {
        Some(ids) => {
            ids.into_iter()
                .map(|id| manager.get_repository(id))
                .collect::<CoreResult<Vec<_>>>()?
        }
        None => manager.repositories_due(force)?,
    };

    if targets.is_empty() {
        info!("All repositories are up to date");
        return Ok(());
    }

    let cancel = manager.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running updates");
            cancel.cancel();
        }
    });

    let mut tasks = Vec::with_capacity(targets.len());
    for repo in targets {
        let name = display_name(&repo, locales);
        let manager = manager.clone();
        let task = tokio::task::spawn_blocking(move || manager.update_repository(&repo));
        tasks.push((name, task));
    }

    let mut failed = 0;
    for (name, task) in tasks {
        let result = task
            .await
            .map_err(|err| CoreError::Custom(format!("Join handle error: {err}")))?;
        if !report_result(&name, result) {
            failed += 1;
        }
    }
    interrupt.abort();

    if failed > 0 {
        warn!("{} repositories failed to update", Colored(Red, failed));
    }
    Ok(())
}

pub fn list_repositories(manager: &RepoManager, locales: &[String]) -> CoreResult<()> {
    let repositories = manager.repositories()?;
    if repositories.is_empty() {
        info!("No repositories");
        return Ok(());
    }

    let mut builder = Builder::new();
    builder.push_record(["ID", "Name", "Address", "Weight", "Enabled", "Updated", "Apps"]);
    for repo in &repositories {
        let apps = manager
            .db()
            .with_conn(|conn| AppStore::count_apps(conn, repo.repo_id))?;
        let enabled = if repo.enabled() {
            Colored(Green, "yes").to_string()
        } else {
            Colored(LightRed, "no").to_string()
        };
        builder.push_record([
            repo.repo_id.to_string(),
            Colored(Cyan, display_name(repo, locales)).to_string(),
            repo.address.clone(),
            repo.weight().to_string(),
            enabled,
            format_millis(repo.timestamp),
            apps.to_string(),
        ]);
    }

    let table = builder
        .build()
        .with(Panel::header("Repositories"))
        .with(Style::rounded())
        .with(BorderCorrection {})
        .to_string();
    info!("\n{table}");
    Ok(())
}

pub fn list_apps(manager: &RepoManager, repo_id: i64) -> CoreResult<()> {
    let repo = manager.get_repository(repo_id)?;
    let apps = manager
        .db()
        .with_conn(|conn| AppStore::list_apps(conn, repo.repo_id))?;

    for app in &apps {
        let name = app.name.as_deref().unwrap_or(&app.package_name);
        let marker = if app.is_compatible {
            Colored(Green, "+")
        } else {
            Colored(Yellow, "!")
        };
        info!(
            "{marker} {} ({}){}",
            Colored(Blue, name),
            Colored(Cyan, &app.package_name),
            app.summary
                .as_deref()
                .map(|summary| format!(" - {summary}"))
                .unwrap_or_default()
        );
    }
    info!("{} apps in {}", Colored(Cyan, apps.len()), repo.address);
    Ok(())
}

pub fn reorder(
    manager: &RepoManager,
    repo_id: i64,
    target_id: i64,
    locales: &[String],
) -> CoreResult<()> {
    manager.reorder(repo_id, target_id)?;
    let repo = manager.get_repository(repo_id)?;
    info!(
        "[{}] Moved to weight {}",
        Colored(Magenta, display_name(&repo, locales)),
        repo.weight()
    );
    Ok(())
}

pub fn set_enabled(
    manager: &RepoManager,
    repo_id: i64,
    enabled: bool,
    locales: &[String],
) -> CoreResult<()> {
    manager.set_enabled(repo_id, enabled)?;
    let repo = manager.get_repository(repo_id)?;
    let state = if enabled {
        Colored(Green, "enabled")
    } else {
        Colored(LightRed, "disabled")
    };
    info!("[{}] Repository {state}", Colored(Magenta, display_name(&repo, locales)));
    Ok(())
}

pub fn remove(manager: &RepoManager, repo_id: i64, yes: bool, locales: &[String]) -> CoreResult<()> {
    let repo = manager.get_repository(repo_id)?;
    let name = display_name(&repo, locales);
    if !yes && !confirm_action(&format!("Remove {name} and all of its apps?"))? {
        info!("Cancelled");
        return Ok(());
    }

    manager.delete(repo_id)?;
    info!("[{}] Repository removed", Colored(Magenta, name));
    Ok(())
}

pub fn mirrors(manager: &RepoManager, repo_id: i64, action: Option<MirrorAction>) -> CoreResult<()> {
    match action {
        None => {
            let repo = manager.get_repository(repo_id)?;
            print_mirrors(&repo);
        }
        Some(MirrorAction::Add {
            url,
        }) => {
            manager.add_user_mirror(repo_id, &url)?;
            info!("Added mirror {}", Colored(Cyan, url));
        }
        Some(MirrorAction::Remove {
            url,
        }) => {
            manager.remove_user_mirror(repo_id, &url)?;
            info!("Removed mirror {}", Colored(Cyan, url));
        }
        Some(MirrorAction::Disable {
            url,
        }) => {
            manager.set_mirror_enabled(repo_id, &url, false)?;
            info!("Disabled mirror {}", Colored(Cyan, url));
        }
        Some(MirrorAction::Enable {
            url,
        }) => {
            manager.set_mirror_enabled(repo_id, &url, true)?;
            info!("Enabled mirror {}", Colored(Cyan, url));
        }
    }
    Ok(())
}

fn print_mirrors(repo: &Repository) {
    let disabled = &repo.preferences.disabled_mirrors;

    let mut builder = Builder::new();
    builder.push_record(["URL", "Source", "Location", "Status"]);
    let declared = repo.declared_mirrors();
    let user = repo
        .preferences
        .user_mirrors
        .iter()
        .map(|url| droidrepo_db::Mirror::new(url.clone()));
    for (index, mirror) in declared.into_iter().chain(user).enumerate() {
        let source = if index == 0 {
            "address"
        } else if repo.preferences.user_mirrors.contains(&mirror.url) {
            "user"
        } else if mirror.is_ipfs_gateway {
            "ipfs gateway"
        } else {
            "repository"
        };
        let status = if disabled.contains(&mirror.url) {
            Colored(LightRed, "disabled").to_string()
        } else {
            Colored(Green, "enabled").to_string()
        };
        builder.push_record([
            mirror.url.clone(),
            source.to_string(),
            mirror.country_code.clone().unwrap_or_else(|| "-".to_string()),
            status,
        ]);
    }

    let table = builder
        .build()
        .with(Panel::header(format!("Mirrors of {}", repo.address)))
        .with(Style::rounded())
        .with(BorderCorrection {})
        .to_string();
    info!("\n{table}");
}

pub fn clear(manager: &RepoManager, yes: bool) -> CoreResult<()> {
    if !yes && !confirm_action("Delete all app data? Every repository will be downloaded again")? {
        info!("Cancelled");
        return Ok(());
    }

    manager.db().with_conn(AppStore::clear_all_app_data)?;
    info!("Cleared all app data");
    Ok(())
}
