use clap::Parser;
use formsync_core::{SqliteSyncStore, SyncConfig, UserId, WorkspaceId};
use formsync_server::backends::{build_state, sqlite_path};
use formsync_server::cli::{Cli, Commands};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON logs on stdout, filtered by RUST_LOG.
    formsync_core::o11y::init_global()?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    let cmd = cli.into_command()?;

    match cmd {
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let state = build_state(&config, &data_dir).await?;
            formsync_server::server::serve(addr, state).await?;
        }
        Commands::Grant {
            data_dir,
            workspace_id,
            user_id,
            role,
        } => {
            let store = SqliteSyncStore::new(sqlite_path(&config, &data_dir)).await?;
            store
                .grant(WorkspaceId(workspace_id), UserId(user_id), role)
                .await?;
            println!("granted {} in {workspace_id} to {user_id}", role.as_str());
        }
        Commands::Config => {
            let cfg = serde_json::json!({
                "refresh_interval_secs": config.refresh_interval.as_secs(),
                "provider_timeout_secs": config.provider_timeout.as_secs(),
                "response_quota": config.response_quota,
                "providers": config.provider_urls,
                "sqlite_path": config.sqlite_path.as_ref().map(|p| p.display().to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
