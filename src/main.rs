use anyhow::Result;
use clap::Parser;
use memconn::cli::{App, Cli, Commands, ConfigCommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memconn=info")),
        )
        .init();

    let cli = Cli::parse();
    let app = App::new(cli.config)?;

    match cli.command {
        Commands::Version { servers } => {
            app.version(servers.as_deref()).await?;
        }
        Commands::Watch {
            servers,
            interval_ms,
            count,
        } => {
            app.watch(servers.as_deref(), Duration::from_millis(interval_ms), count)
                .await?;
        }
        Commands::Config { command } => match command {
            ConfigCommand::Path => {
                let path = app.config_path()?;
                println!("{}", path.display());
                if path.exists() {
                    println!("✓ Configuration file exists");
                } else {
                    println!("✗ Configuration file does not exist");
                    println!("Run 'memconn config init' to create one");
                }
            }
            ConfigCommand::Show => {
                print!("{}", app.show_config()?);
            }
            ConfigCommand::Init { force } => {
                let path = app.init_config(force)?;
                info!("Configuration written to {}", path.display());
            }
        },
    }

    Ok(())
}
