mod common;

use common::*;
use serde_json::json;
use sluice_core::{PipelineState, RunStatus, RunTrigger};
use sluice_engine::driver::{CsvReader, CsvWriter, DriverRegistry};
use sluice_engine::scheduler::CronScheduler;
use sluice_engine::service::CompletionDispatcher;
use sluice_engine::{EtlError, Pipeline, Stage, Transform, TransformSpec};
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn recording_pipeline(name: &str, reader: VecReader, writer: &RecordingWriter) -> Pipeline {
    let pipeline = Pipeline::new(name);
    pipeline
        .set_source(Arc::new(reader), "users.csv", None)
        .unwrap();
    pipeline.set_sink(Arc::new(writer.clone()), "etl_output", "").unwrap();
    pipeline
}

#[tokio::test]
async fn test_batches_in_order_with_file_counter() {
    let writer = RecordingWriter::csv();
    let pipeline = recording_pipeline("users", VecReader::csv(users(2500)), &writer);
    pipeline
        .add_transform_specs(["rename:first_name=given_name"])
        .unwrap();
    pipeline.compose().unwrap();

    let outcome = pipeline.run(true).await.unwrap();
    let record = outcome.record.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.trigger, RunTrigger::Manual);
    assert_eq!(record.batches_written, 3);
    assert_eq!(record.records_written, 2500);
    assert_eq!(outcome.schedules, 0);
    assert!(outcome.completion.is_none());

    let calls = writer.log.calls();
    assert_eq!(
        calls.iter().map(|c| (c.batch, c.len)).collect::<Vec<_>>(),
        vec![(0, 1000), (1, 1000), (2, 500)]
    );
    assert_eq!(writer.log.counters(), vec![Some(0), Some(1), Some(2)]);
    assert_eq!(writer.log.opened.load(Ordering::SeqCst), 1);
    assert_eq!(writer.log.closed.load(Ordering::SeqCst), 1);

    let written = writer.log.records();
    assert_eq!(written.len(), 2500);
    for (seq, record) in written.iter().enumerate() {
        assert_eq!(record["seq"], json!(seq));
        assert_eq!(record["given_name"], json!(format!("user{}", seq)));
        assert!(!record.contains_key("first_name"));
    }

    assert_eq!(pipeline.state(), PipelineState::Terminated);
}

#[tokio::test]
async fn test_write_counter_restarts_every_run() {
    let writer = RecordingWriter::csv();
    let pipeline = recording_pipeline("users", VecReader::csv(users(1500)), &writer);
    pipeline.compose().unwrap();

    pipeline.run(true).await.unwrap();
    pipeline.run(true).await.unwrap();

    assert_eq!(
        writer.log.counters(),
        vec![Some(0), Some(1), Some(0), Some(1)]
    );
}

#[tokio::test]
async fn test_empty_source_writes_nothing() {
    let writer = RecordingWriter::csv();
    let pipeline = recording_pipeline("users", VecReader::csv(Vec::new()), &writer);
    pipeline.compose().unwrap();

    let record = pipeline.run(true).await.unwrap().record.unwrap();

    assert!(record.is_success());
    assert_eq!(record.batches_written, 0);
    assert!(writer.log.calls().is_empty());
    assert_eq!(writer.log.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_closure_transforms_run_in_order() {
    let writer = RecordingWriter::csv();
    let pipeline = recording_pipeline("users", VecReader::csv(users(3)), &writer);
    pipeline
        .add_transforms([
            Transform::new("tag", |mut r| {
                r.insert("tag".to_string(), json!("a"));
                r
            }),
            Transform::new("retag", |mut r| {
                let tag = format!("{}b", r["tag"].as_str().unwrap_or_default());
                r.insert("tag".to_string(), json!(tag));
                r
            }),
        ])
        .unwrap();
    pipeline.compose().unwrap();
    pipeline.run(true).await.unwrap();

    assert!(writer.log.records().iter().all(|r| r["tag"] == json!("ab")));
}

#[tokio::test]
async fn test_reader_mismatch_clears_configuration() {
    let pipeline = Pipeline::new("users");
    pipeline
        .set_sink(Arc::new(RecordingWriter::csv()), "etl_output", "")
        .unwrap();

    let err = pipeline
        .set_source(Arc::new(CsvReader), "users.json", None)
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(pipeline.state(), PipelineState::Empty);
    assert!(pipeline.sink().is_none());
    assert!(pipeline.run(true).await.unwrap_err().is_state());
}

#[tokio::test]
async fn test_failure_skips_notifications_and_successor() {
    let transport = RecordingTransport::new();
    let dispatcher = CompletionDispatcher::new(transport.clone(), transport.clone());
    let writer = RecordingWriter::csv().failing_on_batch(1);

    let pipeline =
        Pipeline::with_services("users", Arc::new(CronScheduler::new()), dispatcher.clone());
    pipeline
        .set_source(Arc::new(VecReader::csv(users(2500))), "users.csv", None)
        .unwrap();
    pipeline.set_sink(Arc::new(writer.clone()), "etl_output", "").unwrap();
    pipeline.compose().unwrap();
    pipeline.set_notifications(Some(email("ops@example.com")), Some(text("+15550100")));

    let next_writer = RecordingWriter::csv();
    let next = recording_pipeline("archive", VecReader::csv(users(1)), &next_writer);
    next.compose().unwrap();
    pipeline.chain(&next, true).unwrap();

    let mut events = pipeline.subscribe();
    let err = pipeline.run(true).await.unwrap_err();

    match err {
        EtlError::Execution(e) => {
            assert_eq!(e.stage, Stage::Write);
            assert_eq!(e.batch, Some(1));
        }
        other => panic!("expected an execution error, got {:?}", other),
    }

    let record = events.recv().await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.batches_written, 1);
    assert!(record.error_message.unwrap().contains("batch 1"));

    assert!(transport.sent().is_empty());
    assert_eq!(next_writer.log.opened.load(Ordering::SeqCst), 0);
    assert_eq!(writer.log.closed.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.state(), PipelineState::Terminated);
}

#[tokio::test]
async fn test_read_failure_is_reported_at_read_stage() {
    let writer = RecordingWriter::csv();
    let reader = VecReader::csv(users(1200)).failing_after(1100);
    let pipeline = recording_pipeline("users", reader, &writer);
    pipeline.compose().unwrap();

    let err = pipeline.run(true).await.unwrap_err();

    let EtlError::Execution(e) = err else {
        panic!("expected an execution error");
    };
    assert_eq!(e.stage, Stage::Read);
    assert_eq!(writer.log.calls().len(), 1);
}

#[tokio::test]
async fn test_csv_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("users.csv");
    let mut content = String::from("id,first_name\n");
    for i in 0..1200 {
        content.push_str(&format!("{},user{}\n", i, i));
    }
    std::fs::write(&source, content).unwrap();

    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let pipeline = Pipeline::new("users");
    pipeline
        .set_source(Arc::new(CsvReader), source.to_str().unwrap(), None)
        .unwrap();
    pipeline
        .add_transform_specs(["rename:first_name=given_name", "upper:given_name"])
        .unwrap();
    pipeline
        .set_sink(Arc::new(CsvWriter), "clean.csv", out.to_str().unwrap())
        .unwrap();
    pipeline.compose().unwrap();

    let record = pipeline.run(true).await.unwrap().record.unwrap();
    assert_eq!(record.batches_written, 2);

    let written = std::fs::read_to_string(out.join("clean.csv")).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 1201);
    assert_eq!(lines[0], "id,given_name");
    assert_eq!(lines[1], "0,USER0");
    assert_eq!(lines[1200], "1199,USER1199");

    // A second run truncates instead of appending
    pipeline.run(true).await.unwrap();
    let rewritten = std::fs::read_to_string(out.join("clean.csv")).unwrap();
    assert_eq!(rewritten, written);
}

#[tokio::test]
async fn test_simple_json_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("users.json");
    std::fs::write(
        &source,
        r#"[{"id": 1, "phone": "(555) 010-0001"}, {"id": 2, "phone": "555.010.0002"}]"#,
    )
    .unwrap();

    let transforms = vec![Transform::from(TransformSpec::parse("digits:phone").unwrap())];
    let registry = DriverRegistry::with_defaults();
    let pipeline = Pipeline::new("phones");
    pipeline
        .simple(
            &registry,
            source.to_str().unwrap(),
            None,
            transforms,
            dir.path().to_str().unwrap(),
            "phones.csv",
        )
        .unwrap();

    assert!(pipeline.is_composed());
    pipeline.run(true).await.unwrap();

    let written = std::fs::read_to_string(dir.path().join("phones.csv")).unwrap();
    assert_eq!(written, "id,phone\n1,5550100001\n2,5550100002\n");
}

#[tokio::test]
async fn test_simple_default_name_writes_in_source_format() {
    let dir = tempfile::tempdir().unwrap();
    let csv_source = dir.path().join("users.csv");
    std::fs::write(&csv_source, "id,first_name\n1,ada\n").unwrap();
    let json_source = dir.path().join("users.json");
    std::fs::write(&json_source, r#"{"id": 1, "first_name": "ada"}"#).unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let registry = DriverRegistry::with_defaults();

    let from_csv = Pipeline::new("from_csv");
    from_csv
        .simple(
            &registry,
            csv_source.to_str().unwrap(),
            None,
            Vec::new(),
            out.to_str().unwrap(),
            "etl_output",
        )
        .unwrap();
    from_csv.run(true).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(out.join("etl_output.csv")).unwrap(),
        "id,first_name\n1,ada\n"
    );

    let from_json = Pipeline::new("from_json");
    from_json
        .simple(
            &registry,
            json_source.to_str().unwrap(),
            None,
            Vec::new(),
            out.to_str().unwrap(),
            "",
        )
        .unwrap();
    from_json.run(true).await.unwrap();
    assert!(out.join("etl_output.json").exists());
}

#[tokio::test]
async fn test_simple_rejects_unknown_sink() {
    let registry = DriverRegistry::with_defaults();
    let pipeline = Pipeline::new("users");

    let err = pipeline
        .simple(&registry, "users.csv", None, Vec::new(), "out", "users")
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(pipeline.state(), PipelineState::Empty);
}
