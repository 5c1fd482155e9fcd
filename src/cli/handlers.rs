use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::{
    app::{errors::AppError, AppService},
    cli::{
        errors::{CliError, CliResult},
        validation::*,
    },
    eid::RecordId,
    records::{ConversationRecord, RecordUpdate},
    semantic::{SearchFilters, SeedMode, SeedOptions},
};

fn print_json(value: &impl serde::Serialize) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn handle_status(service: &AppService) -> Result<()> {
    let status = service.status().await?;
    print_json(&status)?;
    Ok(())
}

pub async fn handle_feedback(service: &AppService, id: String, feedback: String) -> Result<()> {
    validate_id(&id)?;
    let feedback = parse_feedback(&feedback)?;
    let id = RecordId::from(id);

    let transition = service.set_feedback(&id, feedback).map_err(CliError::from)?;
    service.flush().await.map_err(CliError::from)?;

    print_json(&json!({
        "id": transition.id,
        "old_feedback": transition.old_feedback,
        "new_feedback": transition.new_feedback,
    }))?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_edit(
    service: &AppService,
    id: String,
    schema: Option<String>,
    hidden: Option<bool>,
    kind: Option<String>,
    question: Option<String>,
    messages_file: Option<String>,
) -> Result<()> {
    validate_id(&id)?;

    let conversation = match messages_file {
        Some(path) => {
            let data = std::fs::read_to_string(&path).map_err(CliError::from)?;
            Some(parse_messages(&data)?)
        }
        None => None,
    };

    let update = RecordUpdate {
        schema,
        question,
        conversation,
        hidden,
        kind,
    };
    validate_update(&update)?;

    let (_, edit) = service
        .edit_record(&RecordId::from(id), update)
        .map_err(CliError::from)?;
    service.flush().await.map_err(CliError::from)?;

    print_json(&json!({
        "id": edit.id,
        "changed_fields": edit.changed_fields,
    }))?;
    Ok(())
}

pub async fn handle_search(
    service: &AppService,
    query: String,
    schema: Option<String>,
    kind: Option<String>,
    limit: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    validate_limit(limit)?;
    validate_min_score(min_score)?;

    let filters = SearchFilters { schema, kind };
    let results = service
        .search(&query, &filters, limit, min_score)
        .await
        .map_err(CliError::from)?;

    print_json(&results)?;
    Ok(())
}

pub async fn handle_import(service: &AppService, file: String) -> Result<()> {
    let data = std::fs::read_to_string(&file).map_err(CliError::from)?;
    let records: Vec<ConversationRecord> =
        serde_json::from_str(&data).map_err(CliError::from)?;

    for record in &records {
        validate_id(record.id.as_str())?;
    }

    let count = service.import(records)?;
    service.flush().await.map_err(CliError::from)?;

    println!("{} records imported", count);
    Ok(())
}

pub async fn handle_seed(
    service: &AppService,
    batch_size: Option<usize>,
    positive_only: bool,
    resume_from: Option<String>,
) -> Result<()> {
    validate_batch_size(batch_size)?;

    let options = SeedOptions {
        batch_size: batch_size.unwrap_or(service.config().seeder.batch_size),
        mode: if positive_only {
            SeedMode::PositiveOnly
        } else {
            SeedMode::FullRepair
        },
        resume_from,
    };

    let seeder = service.seeder();
    let cancel = seeder.cancel_flag();
    ctrlc::set_handler(move || {
        log::info!("Received interrupt, stopping after the current batch");
        cancel.store(true, Ordering::SeqCst);
    })?;

    let progress = create_progress_bar(service.record_count(positive_only) as u64);
    let report = seeder
        .run(&options, |report| {
            progress.set_position(report.processed as u64);
            progress.set_message(format!(
                "imported {} failed {}",
                report.imported,
                report.failed_ids.len()
            ));
        })
        .await;
    progress.finish_and_clear();

    let report = report.map_err(|e| CliError::from(AppError::from(e)))?;

    if report.cancelled {
        match &report.checkpoint {
            Some(token) => println!("Seeding cancelled, resume with --resume-from {token}"),
            None => println!("Seeding cancelled"),
        }
    }

    print_json(&report)?;
    Ok(())
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
