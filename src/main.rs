use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod app;
mod cli;
mod config;
mod eid;
mod records;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;

use app::AppFactory;
use cli::Command;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    init_logging(args.verbose);

    let paths = AppFactory::get_paths()?;
    let service = AppFactory::create_app_service(&paths).await?;

    let result = match args.command {
        Command::Init {} => {
            log::info!("Initialized at {}", paths.base_path);
            cli::handle_status(&service).await
        }
        Command::Status {} => cli::handle_status(&service).await,
        Command::Feedback { id, feedback } => cli::handle_feedback(&service, id, feedback).await,
        Command::Edit {
            id,
            schema,
            hidden,
            kind,
            question,
            messages_file,
        } => {
            cli::handle_edit(&service, id, schema, hidden, kind, question, messages_file).await
        }
        Command::Search {
            query,
            schema,
            kind,
            limit,
            min_score,
        } => cli::handle_search(&service, query, schema, kind, limit, min_score).await,
        Command::Seed {
            batch_size,
            positive_only,
            resume_from,
        } => cli::handle_seed(&service, batch_size, positive_only, resume_from).await,
        Command::Import { file } => cli::handle_import(&service, file).await,
    };

    let shutdown = service.shutdown().await;
    result?;
    Ok(shutdown?)
}
