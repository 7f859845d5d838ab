use std::error::Error;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use reapd::{
    cli::{Cli, parse_args},
    config::DaemonConfig,
    daemon::Server,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let config = DaemonConfig::from_cli(&args)?;
    register_signal_handler(config.socket_path.clone())?;

    let mut server = Server::new(config)?;
    server.run()?;
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

fn register_signal_handler(socket_path: PathBuf) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        info!("reapd is shutting down");
        let _ = std::fs::remove_file(&socket_path);
        std::process::exit(0);
    })?;

    Ok(())
}
