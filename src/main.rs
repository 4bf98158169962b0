use chunklockd::config::{CliArgs, Command, Config};
use chunklockd::error::DaemonError;
use chunklockd::registry::normalize_name;
use chunklockd::store::{JsonStore, Store};
use chunklockd::{LockDaemon, Network};
use clap::Parser;
use std::process::ExitCode;

fn serve(config: &Config) -> Result<(), DaemonError> {
    let store = JsonStore::open(&config.data_dir)?;
    let host = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "localhost".to_owned());
    let banner = format!("chunklockd at {host}");
    let mut daemon = LockDaemon::open(Box::new(store), config.history_capacity, banner);
    let mut network = Network::bind(config)?;
    network.run(&mut daemon)?;
    Ok(())
}

fn wipe(config: &Config, host: &str, space: Option<&str>) -> Result<(), DaemonError> {
    let mut store = JsonStore::open(&config.data_dir)?;
    let name = normalize_name(host);
    let mut registry = store
        .load_registries()?
        .into_iter()
        .filter_map(Result::ok)
        .find(|r| normalize_name(r.name()) == name)
        .ok_or(DaemonError::UnknownHost(name))?;
    let removed = match space {
        Some(space) => registry.clear_space(&mut store, space)?,
        None => registry.clear(&mut store)?,
    };
    log::info!("removed {removed} locks from {}", registry.name());
    Ok(())
}

fn history(config: &Config) -> Result<(), DaemonError> {
    let store = JsonStore::open(&config.data_dir)?;
    for entry in store.load_history()? {
        println!(
            "{:.0}\t{}\t{}\t{}\t{}",
            entry.time, entry.origin, entry.actor, entry.action, entry.description
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let mut config = match args.config.as_deref().map(Config::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    config.apply_cli_overrides(&args);
    let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    env_logger::Builder::from_env(env).init();

    let result = match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&config),
        Command::Wipe { host, space } => wipe(&config, &host, space.as_deref()),
        Command::History => history(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
