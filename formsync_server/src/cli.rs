use clap::{Parser, Subcommand};
use formsync_core::WorkspaceRole;
use std::path::PathBuf;
use uuid::Uuid;

/// Default local data directory.
pub const DEFAULT_DATA_DIR: &str = ".formsync_dev";

#[derive(Debug, Parser)]
#[command(name = "formsync", version, about = "Form import and provider sync service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Local data directory; holds `formsync.db` unless FORMSYNC_SQLITE_PATH is set.
        #[arg(long, env = "FORMSYNC_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
    },

    /// Give a user a role in a workspace (stored in the local SQLite database).
    Grant {
        #[arg(long, env = "FORMSYNC_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        #[arg(long)]
        workspace_id: Uuid,

        #[arg(long)]
        user_id: Uuid,

        /// owner, admin or member.
        #[arg(long, default_value = "admin", value_parser = parse_role)]
        role: WorkspaceRole,
    },

    /// Print the effective sync configuration.
    Config,
}

impl Cli {
    /// The chosen subcommand. Without one, `serve` is resolved through the same defaults
    /// and env fallbacks as an explicit `formsync serve`.
    pub fn into_command(self) -> Result<Commands, clap::Error> {
        match self.command {
            Some(cmd) => Ok(cmd),
            None => Self::try_parse_from(["formsync", "serve"])?
                .command
                .ok_or_else(|| clap::Error::new(clap::error::ErrorKind::MissingSubcommand)),
        }
    }
}

fn parse_role(s: &str) -> Result<WorkspaceRole, String> {
    WorkspaceRole::parse(&s.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown role '{s}' (expected owner, admin or member)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::ffi::OsStr;

    #[test]
    fn grant_parses_role() {
        let cli = Cli::try_parse_from([
            "formsync",
            "grant",
            "--workspace-id",
            "6f1c2d3e-4a5b-4c6d-8e9f-0a1b2c3d4e5f",
            "--user-id",
            "0b1c2d3e-4a5b-4c6d-8e9f-0a1b2c3d4e5f",
            "--role",
            "Owner",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Grant { role, .. }) => assert_eq!(role, WorkspaceRole::Owner),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["formsync", "grant", "--role", "boss"]).is_err());
    }

    #[test]
    fn bare_invocation_serves_with_env_backed_data_dir() {
        let cmd = Cli::try_parse_from(["formsync"])
            .unwrap()
            .into_command()
            .unwrap();
        match cmd {
            Commands::Serve { host, port, .. } => {
                assert_eq!(host, "0.0.0.0");
                assert_eq!(port, 8000);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let app = Cli::command();
        let serve = app.find_subcommand("serve").unwrap();
        let data_dir = serve
            .get_arguments()
            .find(|a| a.get_id() == "data_dir")
            .unwrap();
        assert_eq!(data_dir.get_env(), Some(OsStr::new("FORMSYNC_DATA_DIR")));
    }
}
