use std::{error::Error, sync::Arc};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use procwatch::{
    cli::{Cli, parse_args},
    config::Config,
    server::Server,
    shutdown::{ShutdownTrigger, shutdown_channel},
    supervisor::ProcessSupervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let config = Config::from_cli(args);
    info!(
        name = %config.server.name,
        "Watching `{}`",
        config.command
    );

    let supervisor = Arc::new(ProcessSupervisor::new(config.command, config.supervisor));
    let (trigger, signal) = shutdown_channel();
    register_signal_handler(trigger)?;

    let server = match Server::bind(config.server, supervisor) {
        Ok(server) => server,
        Err(err) => {
            error!("{err}");
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = server.serve(signal) {
        error!("{err}");
        std::process::exit(err.exit_code());
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Routes SIGINT into the server's shutdown token.
fn register_signal_handler(trigger: ShutdownTrigger) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        info!("Interrupt received; shutting down");
        trigger.fire();
    })?;

    Ok(())
}
