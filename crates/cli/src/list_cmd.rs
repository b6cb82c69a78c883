use anyhow::{Context, Result};
use sessionhub_backend::BackendService;
use sessionhub_core::{BackendApi, ContextInfo, ProjectSummary, SessionSummary};
use sessionhub_runtime_config::RuntimeConfig;

fn backend(config: &RuntimeConfig) -> BackendService {
    // Watcher events are not consumed by one-shot commands.
    let (service, _changes) = BackendService::from_config(config, None);
    service
}

pub async fn run_contexts(config: &RuntimeConfig, json: bool) -> Result<()> {
    let service = backend(config);
    let contexts = service.list_contexts().await?;
    let active = service.get_active_context().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&contexts)?);
        return Ok(());
    }
    for info in &contexts {
        println!("{}", format_context(info, info.id == active));
    }
    let remotes = config.remote_roots().count();
    if remotes > 0 {
        println!();
        println!("{} remote root(s) configured, connect from a client to browse them", remotes);
    }
    Ok(())
}

pub async fn run_projects(config: &RuntimeConfig, json: bool) -> Result<()> {
    let service = backend(config);
    let projects = service.list_projects().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("No projects found under {}", config.local_root().path.display());
        return Ok(());
    }
    for project in &projects {
        println!("{}", format_project(project));
    }
    println!();
    println!("Total: {} project(s)", projects.len());
    Ok(())
}

pub async fn run_sessions(
    config: &RuntimeConfig,
    cursor: Option<&str>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let service = backend(config);
    service.warm_caches().await;
    let limit = match limit {
        Some(limit) => limit,
        None => i64::try_from(config.pagination.page_size).context("page_size out of range")?,
    };
    let page = service.get_combined_sessions_paginated(cursor, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }
    for session in &page.sessions {
        println!("{}", format_session(session));
    }
    println!();
    println!(
        "Showing {} of {} session(s)",
        page.sessions.len(),
        page.total_count
    );
    if let Some(next) = page.next_cursor.as_deref().filter(|_| page.has_more) {
        println!("Next page: sessionhub sessions --cursor {}", next);
    }
    Ok(())
}

fn format_context(info: &ContextInfo, active: bool) -> String {
    format!(
        "{} {} [{}] {}{}",
        if active { "*" } else { " " },
        info.id,
        info.kind,
        info.root_name,
        if info.connected { "" } else { " (disconnected)" }
    )
}

fn format_project(project: &ProjectSummary) -> String {
    let modified = project
        .last_modified
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "  {} ({} session(s), {})",
        project.name, project.session_count, modified
    )
}

fn format_session(session: &SessionSummary) -> String {
    let mut line = format!(
        "  {} [{}] {}/{}",
        session.modified_at.format("%Y-%m-%d %H:%M:%S UTC"),
        session.root_name,
        session.project_id,
        session.id
    );
    if let Some(title) = &session.title {
        line.push_str(" - ");
        line.push_str(title);
    }
    line
}
