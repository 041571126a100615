use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rollauth", version, about = "rollauth operator tools")]
pub struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the version.
    Version,

    /// Generate a random signing secret for JWT_SECRET.
    Secret {
        /// Number of characters.
        #[arg(long, default_value_t = 64)]
        length: usize,
    },

    /// Hash a password read from stdin.
    HashPassword,

    /// Check a password read from stdin against a hash. Exits 1 on mismatch.
    VerifyPassword {
        /// bcrypt hash to check against.
        #[arg(long)]
        hash: String,
    },

    /// Apply the auth table migrations.
    Migrate {
        /// PostgreSQL connection URL.
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}
