use std::sync::OnceLock;

use hearth_core::{
    backend::BackendResolvable,
    commit::{CommitOutcome, CommitPlan},
    error::HearthError,
    HearthResult,
};
use hearth_events::AbortHandle;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nu_ansi_term::Color::{Cyan, Green, Red, Yellow};
use tracing::{info, warn};

use crate::{
    progress::CommitProgress,
    session::open_session,
    utils::{confirm_action, Colored},
};

static ABORT: OnceLock<AbortHandle> = OnceLock::new();

extern "C" fn on_interrupt(_: nix::libc::c_int) {
    if let Some(handle) = ABORT.get() {
        handle.request_abort();
    }
}

/// Routes SIGINT to the relay's abort flag while a commit runs.
fn install_interrupt_handler(handle: AbortHandle) -> HearthResult<()> {
    if ABORT.set(handle).is_err() {
        return Ok(());
    }

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs an atomic store.
    unsafe { sigaction(Signal::SIGINT, &action) }
        .map_err(|err| HearthError::Custom(format!("installing SIGINT handler: {err}")))?;
    Ok(())
}

/// Parses `NAME` or `NAME=VERSION`.
pub fn parse_resolvable(arg: &str) -> HearthResult<BackendResolvable> {
    let (name, version) = arg.split_once('=').unwrap_or((arg, ""));
    let name = name.trim();
    if name.is_empty() {
        return Err(HearthError::Custom(format!("Invalid resolvable '{arg}'")));
    }
    Ok(BackendResolvable::new(name, version.trim(), ""))
}

pub fn build_plan(
    install: &[String],
    update: &[String],
    remove: &[String],
) -> HearthResult<CommitPlan> {
    let mut plan = CommitPlan::new();
    for arg in install {
        plan = plan.install(parse_resolvable(arg)?);
    }
    for arg in update {
        plan = plan.update(parse_resolvable(arg)?);
    }
    for arg in remove {
        plan = plan.remove(parse_resolvable(arg)?);
    }
    Ok(plan)
}

/// Turns a finished commit into the command's result. Any per-item error,
/// any file conflict or a report with errors fails the command.
fn check_outcome(outcome: &CommitOutcome, failures: usize, conflicts: usize) -> HearthResult<()> {
    if conflicts > 0 {
        return Err(HearthError::Custom(format!(
            "{} file conflict(s) blocked the commit",
            Colored(Red, conflicts)
        )));
    }
    if failures > 0 {
        return Err(HearthError::Custom(format!(
            "{} item(s) failed",
            Colored(Red, failures)
        )));
    }
    if !outcome.report().no_errors {
        return Err(HearthError::Custom("the backend reported errors".into()));
    }
    Ok(())
}

pub fn commit_changes(
    install: &[String],
    update: &[String],
    remove: &[String],
    dry_run: bool,
    download_only: bool,
    yes: bool,
) -> HearthResult<()> {
    let plan = build_plan(install, update, remove)?;
    if plan.is_empty() {
        info!("Nothing to do");
        return Ok(());
    }

    let mut session = open_session(dry_run, download_only)?;

    info!("The following actions will be performed:");
    for action in &plan.actions {
        info!("  {:<8} {}", action.action.to_string(), Colored(Cyan, action.resolvable.to_ref()));
    }

    if !yes && !confirm_action("Continue?")? {
        info!("Cancelled");
        return Ok(());
    }

    let progress = CommitProgress::new();
    let subscription = session.relay().subscribe(progress.clone());
    install_interrupt_handler(subscription.abort.clone())?;

    let outcome = session.commit(&plan);
    session.relay().unsubscribe(subscription.id);
    crate::progress::stop();

    let outcome = outcome?;
    let failures = progress.failures();
    let conflicts = progress.conflicts();
    match &outcome {
        CommitOutcome::Completed(report) if report.no_errors && failures == 0 => {
            info!(
                "{} {} item(s) processed",
                Colored(Green, "Done:"),
                report.attempted
            );
        }
        CommitOutcome::Completed(report) if conflicts > 0 => {
            warn!(
                "Nothing was changed: {} item(s) attempted",
                report.attempted
            );
        }
        CommitOutcome::Completed(report) => {
            warn!(
                "Finished with errors: {} item(s) attempted, {} failed",
                report.attempted, failures
            );
        }
        CommitOutcome::Aborted(report) => {
            warn!(
                "{} after {} item(s); remaining items were not started",
                Colored(Yellow, "Aborted"),
                report.attempted
            );
        }
    }

    check_outcome(&outcome, failures, conflicts)
}
