use clap::{ArgAction, Parser, Subcommand, ValueHint};

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}",
    arg_required_else_help = true
)]
pub struct Args {
    /// Set output verbosity
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress outputs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as json
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Provide custom config file
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<String>,

    /// Act as root without touching the system (commits become dry runs)
    #[arg(long, global = true)]
    pub fake_root: bool,

    /// Refuse to commit anything
    #[arg(long, global = true)]
    pub read_only: bool,

    /// Use cached repository metadata without refreshing it
    #[arg(long, global = true)]
    pub no_repo_refresh: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration to stdout
    Config,

    /// Generate a default config file
    #[clap(name = "defconfig")]
    DefConfig,

    /// Attach all enabled repositories and show their status
    #[clap(name = "repos", visible_alias = "lr")]
    Repos,

    /// Install, update or remove resolvables in one transaction
    ///
    /// Resolvables are given as NAME or NAME=VERSION.
    #[command(arg_required_else_help = true)]
    #[clap(name = "commit", visible_alias = "c")]
    Commit {
        /// Resolvables to install
        #[arg(required = false, short, long, num_args = 1..)]
        install: Vec<String>,

        /// Resolvables to update
        #[arg(required = false, short, long, num_args = 1..)]
        update: Vec<String>,

        /// Resolvables to remove
        #[arg(required = false, short, long, num_args = 1..)]
        remove: Vec<String>,

        /// Report what would happen without changing anything
        #[arg(required = false, long)]
        dry_run: bool,

        /// Only download, do not install
        #[arg(required = false, long)]
        download_only: bool,

        /// Skip the confirmation prompt
        #[arg(required = false, short, long)]
        yes: bool,
    },
}
