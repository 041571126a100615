// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::io::BufRead;

use clap::Parser;
use cli::{Cli, Commands};
use rollauth_core::auth::jwt::generate_secret;
use rollauth_core::auth::password::{MIN_PASSWORD_LEN, hash_password, verify_password};
use rollauth_core::store::PgAuthStore;

mod cli;
mod logging;

/// Shortest secret the CLI will generate.
const MIN_SECRET_LEN: usize = 32;

fn main() -> Result<()> {
    let args = Cli::parse();
    let _logger = logging::init(args.verbose)?;

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: &Cli) -> Result<()> {
    log::debug!("running {:?}", args.command);

    match &args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::Secret { length } => {
            if *length < MIN_SECRET_LEN {
                return Err(Error::Custom(format!(
                    "secret length must be at least {MIN_SECRET_LEN}"
                )));
            }
            println!("{}", generate_secret(*length));
        }
        Commands::HashPassword => {
            let password = read_password()?;
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(Error::Custom(format!(
                    "password must be at least {MIN_PASSWORD_LEN} characters"
                )));
            }
            println!("{}", hash_password(&password)?);
        }
        Commands::VerifyPassword { hash } => {
            let password = read_password()?;
            if verify_password(&password, hash)? {
                println!("match");
            } else {
                println!("mismatch");
                std::process::exit(1);
            }
        }
        Commands::Migrate { database_url } => migrate(database_url)?,
    }

    Ok(())
}

/// First line of stdin without its line ending.
fn read_password() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(Error::Custom("expected a password on stdin".into()));
    }
    Ok(password)
}

fn migrate(database_url: &str) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store = PgAuthStore::new(sqlx::PgPool::connect(database_url).await?);
        store.migrate().await?;
        store.pool().close().await;
        log::info!("migrations applied");
        Ok::<(), Error>(())
    })
}
