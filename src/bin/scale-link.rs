use clap::Parser;
use log::{error, info};
use scale_link::{init_logging, run, Cli};
use scale_link::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    info!(concat!("scale-link ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("scale-link is already running");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(())
    }
}
