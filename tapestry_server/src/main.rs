use clap::Parser;
use std::net::SocketAddr;
use tapestry_server::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tapestry_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    let cmd = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port: 8000,
        data_dir: std::env::var_os("TAPESTRY_DATA_DIR")
            .map(Into::into)
            .unwrap_or_else(|| ".tapestry".into()),
    });

    match cmd {
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let state = tapestry_server::bootstrap::build_state(data_dir).await?;
            tapestry_server::server::serve(addr, state).await?;
        }
        Commands::SyncOnce { data_dir } => {
            let state = tapestry_server::bootstrap::build_state(data_dir).await?;
            let report = state.engine.sync_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failures.is_empty() {
                anyhow::bail!("{} dataset(s) failed to sync", report.failures.len());
            }
        }
        Commands::Config => {
            let cfg = tapestry_core::EngineConfig::from_env()?;
            let out = tapestry_server::bootstrap::redacted_config(&cfg);
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}
