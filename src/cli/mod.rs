use clap::{Args, Parser, Subcommand};

pub mod identify;
pub mod serve;

pub use identify::{run_delete, run_identify, run_show};
pub use serve::{run_serve, ServeArgs};

use crate::config::DEFAULT_DB_TIMEOUT_SECS;
use crate::models::ContactId;

#[derive(Parser)]
#[command(name = "identityrecon")]
#[command(about = "Reconcile customer identities by email and phone number")]
#[command(version)]
pub struct Cli {
    /// Database location: a sqlite:// URL or a file path
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database: Option<String>,

    /// Seconds to wait on a locked database
    #[arg(long, global = true, env = "DB_TIMEOUT", default_value_t = DEFAULT_DB_TIMEOUT_SECS)]
    pub db_timeout: u64,

    /// Enable debug logging
    #[arg(long, global = true, env = "DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP identify service
    Serve(ServeArgs),
    /// Reconcile one email/phone pair and print the consolidated contact
    Identify(IdentifyArgs),
    /// Show the group a contact belongs to
    Show(ShowArgs),
    /// Soft-delete a single contact
    Delete(DeleteArgs),
}

#[derive(Args)]
pub struct IdentifyArgs {
    #[arg(short, long)]
    pub email: Option<String>,
    #[arg(short, long)]
    pub phone: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Contact ID (primary or secondary)
    pub id: ContactId,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Contact ID
    pub id: ContactId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify() {
        let cli = Cli::try_parse_from([
            "identityrecon",
            "identify",
            "--email",
            "a@x.com",
            "--phone",
            "123",
        ])
        .unwrap();
        match cli.command {
            Commands::Identify(args) => {
                assert_eq!(args.email.as_deref(), Some("a@x.com"));
                assert_eq!(args.phone.as_deref(), Some("123"));
            }
            _ => panic!("expected identify"),
        }
    }

    #[test]
    fn test_parse_serve_with_globals() {
        let cli = Cli::try_parse_from([
            "identityrecon",
            "serve",
            "--port",
            "8080",
            "--workers",
            "2",
            "--database",
            "sqlite:///test.db",
            "--debug",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.database.as_deref(), Some("sqlite:///test.db"));
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, 8080);
                assert_eq!(args.workers, 2);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_show_requires_numeric_id() {
        assert!(Cli::try_parse_from(["identityrecon", "show", "abc"]).is_err());
    }
}
