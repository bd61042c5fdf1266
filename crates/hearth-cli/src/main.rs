use std::env;

use clap::Parser;
use cli::{Args, Commands};
use commit::commit_changes;
use hearth_config::{
    config::{self, generate_default_config, get_config, CONFIG, CONFIG_PATH},
    error::ConfigError,
};
use hearth_core::{error::ErrorContext, HearthResult};
use hearth_utils::path::resolve_path;
use logging::setup_logging;
use repos::list_repos;
use tracing::{debug, info};
use utils::COLOR;

mod cli;
mod commit;
mod logging;
mod progress;
mod repos;
mod session;
mod utils;

fn apply_config_path(path: &str) -> HearthResult<()> {
    let path = resolve_path(path).map_err(ConfigError::from)?;
    let path = if path.is_absolute() {
        path
    } else {
        env::current_dir()
            .with_context(|| "retrieving current directory".into())?
            .join(path)
    };
    debug!(path = %path.display(), "using config file");
    *CONFIG_PATH.write()? = path;
    Ok(())
}

/// Command-line switches win over the config file.
fn apply_overrides(args: &Args) -> HearthResult<()> {
    let mut guard = CONFIG.write()?;
    let Some(config) = guard.as_mut() else {
        return Ok(());
    };

    if args.fake_root {
        config.fake_root = Some(true);
    }
    if args.read_only {
        config.read_only = Some(true);
    }
    if args.no_repo_refresh {
        config.no_repo_refresh = Some(true);
    }
    Ok(())
}

fn handle_cli() -> HearthResult<()> {
    let args = Args::parse();

    setup_logging(&args);

    if args.no_color {
        *COLOR.write()? = false;
    }

    if let Some(ref c) = args.config {
        apply_config_path(c)?;
    }

    match args.command {
        Commands::DefConfig => {
            let path = generate_default_config()?;
            info!("Default config written to {}", path.display());
        }
        ref command => {
            config::init()?;
            apply_overrides(&args)?;

            match command {
                Commands::Config => {
                    let document = get_config().to_annotated_document()?;
                    info!("{document}");
                }
                Commands::Repos => list_repos()?,
                Commands::Commit {
                    install,
                    update,
                    remove,
                    dry_run,
                    download_only,
                    yes,
                } => {
                    commit_changes(install, update, remove, *dry_run, *download_only, *yes)?;
                }
                Commands::DefConfig => unreachable!(),
            }

            progress::stop();
        }
    }

    Ok(())
}

fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    if let Err(err) = handle_cli() {
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(1);
    }
}
