//! Run command handler
//!
//! Builds a pipeline from command-line flags using the bundled drivers,
//! runs it, and, when schedules are given, keeps the process alive and
//! reports every scheduled run until interrupted.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use sluice_core::{EmailSpec, RunRecord, TextSpec};
use sluice_engine::driver::DriverRegistry;
use sluice_engine::{Pipeline, Transform, TransformSpec, parse_start_flag};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;

/// Arguments of `sluice run`
#[derive(Args)]
pub struct RunArgs {
    /// Source file path or connection string
    #[arg(short, long)]
    source: String,

    /// Table or collection for database sources
    #[arg(long)]
    sub_resource: Option<String>,

    /// Transform spec, repeatable (e.g. rename:first_name=given_name)
    #[arg(short, long = "transform")]
    transforms: Vec<String>,

    /// Sink directory or connection string (default: configured output dir)
    #[arg(long)]
    sink: Option<String>,

    /// Output file name or table/collection (default: configured output name)
    #[arg(short, long)]
    name: Option<String>,

    /// Pipeline name used in logs
    #[arg(long, default_value = "sluice")]
    pipeline: String,

    /// Cron expression, repeatable
    #[arg(long = "schedule")]
    schedules: Vec<String>,

    /// Run once before waiting for schedules (true/false)
    #[arg(long)]
    start_immediately: Option<String>,

    /// Completion email recipient
    #[arg(long, requires = "email_from")]
    email_to: Option<String>,

    /// Completion email sender
    #[arg(long, requires = "email_to")]
    email_from: Option<String>,

    #[arg(long, default_value = "ETL job completed")]
    email_subject: String,

    #[arg(long, default_value = "Your ETL job has finished.")]
    email_text: String,

    /// Completion text message recipient
    #[arg(long)]
    text_to: Option<String>,

    #[arg(long, default_value = "Your ETL job has finished.")]
    text_body: String,
}

/// Handle `sluice run`
pub async fn handle_run(args: RunArgs, config: &Config) -> Result<()> {
    let start_immediately = match &args.start_immediately {
        Some(raw) => parse_start_flag(raw)?,
        None => config.engine.start_immediately,
    };

    let transforms = args
        .transforms
        .iter()
        .map(|spec| TransformSpec::parse(spec).map(Transform::from))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid transform")?;

    let sink = args.sink.clone().unwrap_or_else(|| config.output_dir());
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| config.engine.output_name.clone());

    let registry = DriverRegistry::with_defaults();
    let pipeline = Pipeline::from_config(&args.pipeline, &config.engine);

    pipeline
        .simple(
            &registry,
            &args.source,
            args.sub_resource.as_deref(),
            transforms,
            &sink,
            &name,
        )
        .context("Failed to compose pipeline")?;

    if !args.schedules.is_empty() {
        pipeline
            .add_schedule(&args.schedules)
            .context("Invalid schedule")?;
    }

    pipeline.set_notifications(email_spec(&args), text_spec(&args));

    print_plan(&pipeline);

    let mut events = pipeline.subscribe();
    let outcome = pipeline.run(start_immediately).await?;

    if let Some(record) = &outcome.record {
        print_record(record);
    }

    // Follow the successor chain so deliveries finish before exit
    let mut completion = outcome.completion;
    while let Some(handle) = completion.take() {
        match handle.await.context("Completion task panicked")? {
            Some(Ok(successor)) => {
                if let Some(record) = &successor.record {
                    print_record(record);
                }
                completion = successor.completion;
            }
            Some(Err(e)) => println!("{}", format!("Successor failed: {}", e).red()),
            None => {}
        }
    }

    if outcome.schedules == 0 {
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Waiting for {} schedule(s); press Ctrl-C to stop",
            outcome.schedules
        )
        .dimmed()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(record) => print_record(&record),
                Err(RecvError::Lagged(skipped)) => {
                    println!("{}", format!("  ({} run records skipped)", skipped).yellow());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let cancelled = pipeline.cancel_schedules();
    println!("{}", format!("Cancelled {} schedule(s)", cancelled).yellow());
    Ok(())
}

fn email_spec(args: &RunArgs) -> Option<EmailSpec> {
    match (&args.email_to, &args.email_from) {
        (Some(to), Some(from)) => Some(EmailSpec {
            to: to.clone(),
            from: from.clone(),
            subject: args.email_subject.clone(),
            text: args.email_text.clone(),
            html: None,
        }),
        _ => None,
    }
}

fn text_spec(args: &RunArgs) -> Option<TextSpec> {
    args.text_to.as_ref().map(|to| TextSpec {
        to: to.clone(),
        body: args.text_body.clone(),
    })
}

fn print_plan(pipeline: &Pipeline) {
    println!("{}", format!("Pipeline '{}'", pipeline.name()).bold());
    if let Some(source) = pipeline.source() {
        println!(
            "  Source:     {} {}",
            source.capability.to_string().cyan(),
            source.location
        );
    }
    println!("  Transforms: {}", pipeline.transform_count());
    if let Some(sink) = pipeline.sink() {
        let target = sink
            .file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "database".to_string());
        println!(
            "  Sink:       {} {}",
            sink.capability.to_string().cyan(),
            target
        );
    }
    for schedule in pipeline.schedules() {
        println!("  Schedule:   {}", schedule.dimmed());
    }
    println!();
}

fn print_record(record: &RunRecord) {
    let status = if record.is_success() {
        record.status.to_string().green()
    } else {
        record.status.to_string().red()
    };

    println!(
        "{} run {} ({:?})",
        status.bold(),
        record.run_id.to_string().cyan(),
        record.trigger
    );
    println!(
        "  Batches: {}  Records: {}",
        record.batches_written, record.records_written
    );
    if let Some(error) = &record.error_message {
        println!("  Error:   {}", error.red());
    }
}
