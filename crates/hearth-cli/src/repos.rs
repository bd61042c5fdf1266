use hearth_core::{catalog::RepositoryCatalog, HearthResult};
use nu_ansi_term::Color::{Blue, Cyan, Green, Red};
use tabled::{
    builder::Builder,
    settings::{peaker::PriorityMax, themes::BorderCorrection, Panel, Style, Width},
};
use tracing::info;

use crate::{
    session::open_session,
    utils::{icon_or, term_width, Colored, Icons},
};

fn status_cell(catalog: &RepositoryCatalog, alias: &str) -> String {
    if catalog.is_failed(alias) {
        format!("{} failed", Colored(Red, icon_or(Icons::CROSS, "!")))
    } else {
        format!("{} ok", Colored(Green, icon_or(Icons::CHECK, "OK")))
    }
}

fn render_table(catalog: &RepositoryCatalog) -> String {
    let mut builder = Builder::new();
    builder.push_record(["Alias", "Name", "Priority", "Status"].map(String::from));

    for repo in catalog.active() {
        builder.push_record([
            Colored(Cyan, &repo.alias).to_string(),
            repo.name.clone(),
            repo.priority.to_string(),
            status_cell(catalog, &repo.alias),
        ]);
    }

    builder
        .build()
        .with(Panel::header(format!(
            "Repositories ({} privilege)",
            catalog.privilege()
        )))
        .with(Style::rounded())
        .with(BorderCorrection {})
        .with(Width::wrap(term_width()).priority(PriorityMax::default()))
        .to_string()
}

pub fn list_repos() -> HearthResult<()> {
    let session = open_session(false, false)?;
    let Some(catalog) = session.catalog() else {
        return Ok(());
    };

    if catalog.active().is_empty() {
        info!("No enabled repositories");
        return Ok(());
    }

    info!("\n{}", render_table(catalog));

    if catalog.have_failed_repos() {
        info!("\nFailed repositories:");
        for repo in catalog.failed() {
            info!(
                "  {} {}",
                Icons::ARROW,
                Colored(Blue, repo.event_ref())
            );
        }
    }

    Ok(())
}
