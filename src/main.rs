use clap::Parser;
use wsty_lib::{server, shutdown, AppError, Cli, ServerConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = ServerConfig::from_cli(cli).map_err(AppError::Config)?;
    let state = server::AppState::new(std::sync::Arc::new(config));

    shutdown::register_signal_handlers(state.shutdown.clone()).map_err(AppError::Signal)?;

    let rt = tokio::runtime::Runtime::new().map_err(AppError::Runtime)?;
    rt.block_on(server::run_server(state))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
