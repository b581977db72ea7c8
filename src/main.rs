pub mod models {
    pub mod active_mode;
    pub mod multimatic;
    pub mod wire;
}

pub mod client;
pub mod config;
pub mod entities;
pub mod hub;
pub mod state;
pub mod throttle;
pub mod utils;
pub mod services {
    pub mod climate;
    pub mod commands;
    pub mod poll;
}

#[cfg(test)]
pub mod fixtures;

use crate::client::{Credentials, MultimaticClient};
use crate::config::{Config, load_env_file};
use crate::entities::LoggingUpdater;
use crate::hub::ApiHub;
use crate::services::commands::{self, Command};
use crate::services::poll;
use log::{error, info};
use std::path::PathBuf;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Default)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Vec<String>,
}

pub fn run(command: Option<Command>) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (user={}, facility={}, scan_interval={}s, quick_veto_duration={}min, http_timeout={}s)",
        cfg.username,
        cfg.serial_number.as_deref().unwrap_or("-"),
        cfg.scan_interval.as_secs(),
        cfg.quick_veto_duration,
        cfg.http_timeout.as_secs()
    );

    // 2) Log in
    let credentials = Credentials {
        username: cfg.username.clone(),
        password: cfg.password.clone(),
        smartphone_id: cfg.smartphone_id.clone(),
    };
    let client = MultimaticClient::new(credentials, cfg.serial_number.clone(), cfg.http_timeout)
        .map_err(|e| format!("multiMATIC login failed (credentials wrong?): {}", e))?;
    info!("Authenticated to multiMATIC API");

    // 3) Initial snapshot; registers entities
    let mut hub = ApiHub::new(client, cfg.hub_config(), Box::new(LoggingUpdater));
    if !hub.update_system() {
        hub.logout();
        return Err("Initial system fetch failed".to_string());
    }
    info!("Tracking {} entities", hub.entities().count());

    // 4) One-shot command or poll loop
    match command {
        Some(cmd) => {
            let result = commands::execute(&mut hub, &cmd);
            hub.logout();
            let message = result.map_err(|e| format!("{:?} failed: {}", cmd, e))?;
            println!("{}", message);
            Ok(())
        }
        None => {
            info!("Starting poll loop: interval={}s", cfg.scan_interval.as_secs());
            poll::run_loop(&mut hub, cfg.scan_interval);
            Ok(())
        }
    }
}

fn set_env_file(cli: &mut CliArgs, path: PathBuf) -> Result<(), String> {
    if cli.env_file.is_some() {
        return Err("`--env-file` provided more than once".to_string());
    }
    cli.env_file = Some(path);
    Ok(())
}

fn parse_cli() -> Result<CliArgs, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut cli = CliArgs::default();

    while let Some(arg) = args.next() {
        let arg = arg
            .into_string()
            .map_err(|_| "argument contains invalid UTF-8".to_string())?;
        match arg.as_str() {
            "--env-file" => {
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                set_env_file(&mut cli, PathBuf::from(value))?;
            }
            s if s.starts_with("--env-file=") => {
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                set_env_file(&mut cli, PathBuf::from(path_str))?;
            }
            "-h" | "--help" => {
                return Err(format!(
                    "usage: multimatic-hub [--env-file PATH] [COMMAND ARGS...]\n{}",
                    commands::USAGE
                ));
            }
            "--" => {
                for rest in args.by_ref() {
                    cli.command.push(
                        rest.into_string()
                            .map_err(|_| "argument contains invalid UTF-8".to_string())?,
                    );
                }
            }
            s if s.starts_with("--") => return Err(format!("unrecognised option: {}", s)),
            _ => cli.command.push(arg),
        }
    }
    Ok(cli)
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        load_env_file(&default_path)?;
        Ok(Some(LoadedEnvFile {
            path: default_path,
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn main() {
    let (loaded_env, command) = match parse_cli().and_then(|cli| {
        let command = Command::parse(&cli.command)?;
        Ok((configure_env(cli.env_file)?, command))
    }) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "multimatic-hub {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
