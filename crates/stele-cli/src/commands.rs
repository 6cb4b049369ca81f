use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use colored::{ColoredString, Colorize};
use serde_json::json;
use stele_server::{Config, SteleServer};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Check(args) => cmd_check(args, &cli.format),
        Command::Health(args) => cmd_health(args, &cli.format).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("failed to load {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    println!(
        "{} starting stele on {} ({} backend)",
        "▸".cyan(),
        config.server.bind_addr.to_string().bold(),
        config.backend.name.yellow(),
    );
    SteleServer::new(config).serve().await?;
    Ok(())
}

fn cmd_check(args: CheckArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;

    let active = config.forwarding.targets.iter().filter(|t| t.active).count();
    if matches!(format, OutputFormat::Json) {
        // Summary only; the full document holds credentials.
        let summary = json!({
            "valid": true,
            "bind_addr": config.server.bind_addr,
            "backend": config.backend.name,
            "default_page_size": config.limits.default_page_size,
            "max_page_size": config.limits.max_page_size,
            "forwarding_targets": config.forwarding.targets.len(),
            "active_targets": active,
            "auth_users": config.auth.users.len(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} configuration is valid", "✓".green().bold());
    println!("  Bind: {}", config.server.bind_addr.to_string().bold());
    println!("  Backend: {}", config.backend.name.yellow());
    if let Some(path) = &config.backend.path {
        println!("  Log path: {}", path.display().to_string().cyan());
    }
    println!(
        "  Page sizes: {} default, {} max",
        config.limits.default_page_size.to_string().bold(),
        config.limits.max_page_size.to_string().bold(),
    );
    println!(
        "  Forwarding: {} targets ({active} active)",
        config.forwarding.targets.len().to_string().bold(),
    );
    if config.auth.users.is_empty() {
        println!("  Auth: {}", "open access".yellow());
    } else {
        println!("  Auth: {} static users", config.auth.users.len().to_string().bold());
    }
    Ok(())
}

async fn cmd_health(args: HealthArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let addr = args.addr.unwrap_or(config.server.bind_addr);
    let url = format!("http://{addr}/health");

    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .with_context(|| format!("no answer from {url}"))?;
    let healthy = response.status().is_success();
    let body: serde_json::Value = response
        .json()
        .await
        .context("health endpoint returned a non-JSON body")?;

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        let status = body["status"].as_str().unwrap_or("unknown");
        let backend = body["backend"].as_str().unwrap_or("unknown");
        let mark = if healthy { "✓".green().bold() } else { "✗".red().bold() };
        println!("{mark} {} ({backend}) reports {}", url.bold(), colored_status(status));
    }

    if !healthy {
        anyhow::bail!("server at {addr} is not healthy");
    }
    Ok(())
}

fn colored_status(status: &str) -> ColoredString {
    if status == "healthy" {
        status.green()
    } else if status.starts_with("degraded") {
        status.yellow()
    } else {
        status.red()
    }
}
