use clap::Parser;
use identityrecon::cli::{run_delete, run_identify, run_serve, run_show, Cli, Commands};
use identityrecon::config::StoreConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug);

    let store = StoreConfig::resolve(cli.database.as_deref(), cli.db_timeout)?;

    match cli.command {
        Commands::Serve(args) => {
            run_serve(store, args)?;
        }
        Commands::Identify(args) => {
            let mut db = store.open()?;
            run_identify(&mut db, args.email.as_deref(), args.phone.as_deref())?;
        }
        Commands::Show(args) => {
            let db = store.open()?;
            run_show(&db, args.id)?;
        }
        Commands::Delete(args) => {
            let db = store.open()?;
            run_delete(&db, args.id)?;
        }
    }

    Ok(())
}

fn setup_tracing(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("identityrecon=debug,info")
        } else {
            EnvFilter::new("identityrecon=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
