use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Keeps F-Droid style repository indexes in sync",
    arg_required_else_help = true
)]
pub struct Args {
    /// Unimportant output is suppressed
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More output, repeat for even more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log as JSON
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Use a different configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// HTTP proxy, overrides the configuration
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// User agent sent with every request
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a repository by address or share link
    #[command(arg_required_else_help = true)]
    Add {
        /// Repository address, may carry ?fingerprint=...
        #[arg(required = true)]
        url: String,

        /// Add without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Also add the archive repository
        #[arg(long)]
        archive: bool,
    },

    /// Update repository indexes
    #[command(visible_alias = "sync", alias = "S")]
    Update {
        /// Only update these repositories
        repos: Option<Vec<i64>>,

        /// Ignore the update interval
        #[arg(short, long)]
        force: bool,
    },

    /// List repositories
    #[command(visible_alias = "ls")]
    List {
        /// Also list apps of this repository
        #[arg(long)]
        apps: Option<i64>,
    },

    /// Move a repository to the position of another
    #[command(arg_required_else_help = true)]
    Reorder {
        repo: i64,
        target: i64,
    },

    /// Enable a repository
    #[command(arg_required_else_help = true)]
    Enable { repo: i64 },

    /// Disable a repository
    #[command(arg_required_else_help = true)]
    Disable { repo: i64 },

    /// Remove a repository and its apps
    #[command(arg_required_else_help = true, visible_alias = "rm")]
    Remove {
        repo: i64,

        /// Remove without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage mirrors of a repository
    #[command(arg_required_else_help = true)]
    Mirrors {
        repo: i64,

        #[command(subcommand)]
        action: Option<MirrorAction>,
    },

    /// Delete all app data and reset repository timestamps
    Clear {
        /// Clear without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the paths in use
    Env,

    /// Print the configuration
    Config,

    /// Write the default configuration file
    #[clap(name = "defconfig")]
    DefConfig,
}

#[derive(Subcommand)]
pub enum MirrorAction {
    /// Add a user mirror
    Add { url: String },

    /// Remove a user mirror
    Remove { url: String },

    /// Stop using a mirror
    Disable { url: String },

    /// Use a disabled mirror again
    Enable { url: String },
}
