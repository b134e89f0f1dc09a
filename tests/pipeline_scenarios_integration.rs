//! End-to-end runs over in-memory sources and sinks

mod common;

use common::builders::{
    failing_on_markers, jittered_identity, marked_image, slow_identity, PipelineFixture,
};
use common::mock_helpers::FailingSpawner;
use common::{assert_errors, assert_threads_released, expected_seqs, test_timeout};
use imgpipe_rs::imaging::filters::{transform_fn, vertical_flip};
use imgpipe_rs::imaging::{MemorySink, MemorySource};
use imgpipe_rs::pipeline::{
    ErrorKind, OrderingMode, Pipeline, PipelineEvent, ProgressReceiver, RunStatus, TransformStage,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_all_items_succeed_in_order() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::two_flips(2)
        .build()
        .run(MemorySource::synthetic(5, 4, 3), sink);

    assert_eq!(report.status, RunStatus::Success);
    assert!(report.errors.is_empty());
    assert_eq!(log.seqs(), expected_seqs(5));
    assert_eq!(
        log.keys(),
        vec!["img-0000", "img-0001", "img-0002", "img-0003", "img-0004"]
    );
    // Two flips cancel out
    for saved in log.snapshot() {
        assert_eq!(saved.image.get_pixel(0, 0)[0] as u64, saved.seq.value());
    }
    assert_eq!(report.items_produced, 5);
    assert_eq!(report.items_saved, 5);
    assert_threads_released(&report);
}

#[test]
fn test_unit_capacity_applies_backpressure() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::new()
        .stage("slow", slow_identity(Duration::from_millis(5)), 1)
        .capacity(1)
        .build()
        .run(MemorySource::synthetic(8, 2, 2), sink);

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(log.seqs(), expected_seqs(8));
    let head = &report.queues[0].stats;
    assert!(head.blocked_pushes > 0, "source never waited: {:?}", head);
    assert!(head.push_wait_us > 0);
    for queue in &report.queues {
        assert!(queue.stats.high_water <= 1, "{} overflowed", queue.name);
    }
}

#[test]
fn test_unit_capacity_with_parallel_stages() {
    // Fast workers at capacity 1 make closers routinely find full queues
    for round in 0..25 {
        let sink = MemorySink::new();
        let log = sink.log();
        let report = PipelineFixture::two_flips(3)
            .capacity(1)
            .build()
            .run(MemorySource::synthetic(20, 2, 2), sink);

        assert_eq!(report.status, RunStatus::Success, "round {}", round);
        assert_eq!(log.seqs(), expected_seqs(20), "round {}", round);
        for queue in &report.queues {
            assert!(queue.stats.high_water <= 1, "{} overflowed", queue.name);
        }
        assert_threads_released(&report);
    }
}

#[test]
fn test_failed_item_is_dropped_and_reported() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::new()
        .stage("picky", failing_on_markers(&[2]), 2)
        .stage("flip", transform_fn(vertical_flip), 2)
        .build()
        .run(MemorySource::synthetic(5, 3, 3), sink);

    assert_eq!(log.seqs(), vec![0, 1, 3, 4]);
    assert_errors(&report, &[(Some(2), ErrorKind::TransformFailure)]);
    assert_eq!(report.errors[0].stage, "picky");
    assert_eq!(report.status, RunStatus::PartialSuccess(1));
    assert_eq!(report.status.exit_code(), 0);
    assert_threads_released(&report);
}

#[test]
fn test_worker_spawn_failure_aborts_and_joins() {
    let spawner = Arc::new(FailingSpawner::new("flip-b-1"));
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::two_flips(2)
        .spawner(spawner.clone())
        .build()
        .run(MemorySource::synthetic(5, 2, 2), sink);

    assert!(report.status.is_fatal());
    assert_eq!(report.status.exit_code(), 1);
    assert_errors(&report, &[(None, ErrorKind::ThreadSpawnFailure)]);
    assert_eq!(spawner.started(), vec!["sink", "flip-b-0"]);
    assert_eq!(spawner.attempts(), 3);
    assert_eq!(report.threads_spawned, 2);
    assert_threads_released(&report);
    assert_eq!(report.items_produced, 0);
    assert!(log.is_empty());
}

#[test]
fn test_source_spawn_failure_releases_started_stages() {
    let spawner = Arc::new(FailingSpawner::new("source"));
    let report = PipelineFixture::two_flips(3)
        .spawner(spawner.clone())
        .build()
        .run(MemorySource::synthetic(5, 2, 2), MemorySink::new());

    assert!(report.status.is_fatal());
    assert_eq!(report.threads_spawned, 1 + 3 + 3);
    assert_threads_released(&report);
}

#[test]
fn test_sink_spawn_failure_starts_nothing() {
    let spawner = Arc::new(FailingSpawner::new("sink"));
    let report = PipelineFixture::two_flips(2)
        .spawner(spawner.clone())
        .build()
        .run(MemorySource::synthetic(5, 2, 2), MemorySink::new());

    assert!(report.status.is_fatal());
    assert_eq!(spawner.attempts(), 1);
    assert_eq!(report.threads_spawned, 0);
    assert_eq!(report.threads_joined, 0);
}

#[test]
fn test_sentinel_fan_out_matches_consumers() {
    let report = PipelineFixture::new()
        .stage("a", transform_fn(vertical_flip), 3)
        .stage("b", transform_fn(vertical_flip), 2)
        .build()
        .run(MemorySource::synthetic(10, 2, 2), MemorySink::new());

    let sentinels: Vec<(u64, u64)> = report
        .queues
        .iter()
        .map(|q| (q.stats.sentinels_pushed, q.stats.sentinels_popped))
        .collect();
    assert_eq!(sentinels, vec![(3, 3), (2, 2), (1, 1)]);
    for queue in &report.queues {
        assert_eq!(queue.stats.total_pushed, 10, "{}", queue.name);
        assert_eq!(queue.stats.total_popped, 10, "{}", queue.name);
    }
}

#[test]
fn test_capacity_holds_under_concurrent_load() {
    let report = PipelineFixture::new()
        .stage("jitter-a", jittered_identity(), 4)
        .stage("jitter-b", jittered_identity(), 4)
        .capacity(2)
        .build()
        .run(MemorySource::synthetic(60, 2, 2), MemorySink::new());

    assert_eq!(report.status, RunStatus::Success);
    for queue in &report.queues {
        assert!(queue.stats.high_water <= 2, "{}: {:?}", queue.name, queue.stats);
    }
}

#[test]
fn test_preserve_mode_restores_order_after_jitter() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::new()
        .stage("jitter", jittered_identity(), 4)
        .capacity(8)
        .build()
        .run(MemorySource::synthetic(40, 2, 2), sink);

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(log.seqs(), expected_seqs(40));
    assert!(report.reorder_high_water <= 40);
}

#[test]
fn test_any_mode_saves_every_key() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::new()
        .stage("jitter", jittered_identity(), 4)
        .ordering(OrderingMode::Any)
        .build()
        .run(MemorySource::synthetic(30, 2, 2), sink);

    assert_eq!(report.status, RunStatus::Success);
    let saved: BTreeSet<u64> = log.seqs().into_iter().collect();
    assert_eq!(saved, (0..30).collect::<BTreeSet<u64>>());
    assert_eq!(log.len(), 30);
    assert_eq!(report.reorder_high_water, 0);
}

#[test]
fn test_sink_failure_is_per_item() {
    let sink = MemorySink::new().fail_on("img-0001");
    let log = sink.log();
    let report = PipelineFixture::two_flips(2)
        .build()
        .run(MemorySource::synthetic(4, 2, 2), sink);

    assert_eq!(log.seqs(), vec![0, 2, 3]);
    assert_errors(&report, &[(Some(1), ErrorKind::IoFailure)]);
    assert_eq!(report.status, RunStatus::PartialSuccess(1));
}

#[test]
fn test_source_failure_ends_input() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::two_flips(2)
        .build()
        .run(MemorySource::synthetic(10, 2, 2).fail_after(3), sink);

    assert_eq!(log.seqs(), expected_seqs(3));
    assert_errors(&report, &[(None, ErrorKind::SourceFailure)]);
    assert_eq!(report.status, RunStatus::PartialSuccess(0));
    assert_threads_released(&report);
}

#[test]
fn test_empty_input() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = PipelineFixture::two_flips(2)
        .build()
        .run(MemorySource::synthetic(0, 2, 2), sink);

    assert_eq!(report.status, RunStatus::Success);
    assert!(log.is_empty());
    assert_threads_released(&report);
}

#[test]
fn test_limit_caps_run() {
    let sink = MemorySink::new();
    let log = sink.log();
    let report = Pipeline::builder()
        .stage(TransformStage::new("flip", transform_fn(vertical_flip)).workers(2))
        .limit(Some(3))
        .build()
        .unwrap()
        .run(MemorySource::synthetic(10, 2, 2), sink);

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(log.seqs(), expected_seqs(3));
}

#[test]
fn test_progress_events() {
    let (events, progress) = ProgressReceiver::channel();
    let report = Pipeline::builder()
        .stage(TransformStage::new("flip", transform_fn(vertical_flip)).workers(2))
        .events(events)
        .build()
        .unwrap()
        .run(MemorySource::synthetic(6, 2, 2), MemorySink::new());

    let events = progress.drain();
    // The source may report its first items before the orchestrator does
    assert!(events.contains(&PipelineEvent::Started { threads: 4 }));
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::Finished {
            status: report.status.clone()
        })
    );
    let ingested = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Ingested { .. }))
        .count();
    let saved: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Saved { seq, .. } => Some(seq.value()),
            _ => None,
        })
        .collect();
    assert_eq!(ingested, 6);
    assert_eq!(saved, expected_seqs(6));
}

#[test]
fn test_progress_stream_observed_while_running() {
    let (events, progress) = ProgressReceiver::channel();
    let pipeline = Pipeline::builder()
        .stage(TransformStage::new("flip", transform_fn(vertical_flip)).workers(2))
        .events(events)
        .build()
        .unwrap();
    let runner = std::thread::spawn(move || {
        pipeline.run(MemorySource::synthetic(10, 2, 2), MemorySink::new())
    });

    let mut saved = 0;
    let status = loop {
        match progress.recv_timeout(test_timeout()) {
            Ok(PipelineEvent::Saved { .. }) => saved += 1,
            Ok(PipelineEvent::Finished { status }) => break status,
            Ok(_) => {}
            Err(e) => panic!("no progress within {:?}: {:?}", test_timeout(), e),
        }
    };

    let report = runner.join().unwrap();
    assert_eq!(saved, 10);
    assert_eq!(status, report.status);
    assert_eq!(status, RunStatus::Success);
}

#[test]
fn test_custom_keys_survive() {
    let source = MemorySource::new(vec![
        marked_image("zebra", 0, 3),
        marked_image("apple", 1, 3),
        marked_image("mango", 2, 3),
    ]);
    let sink = MemorySink::new();
    let log = sink.log();
    PipelineFixture::two_flips(2).build().run(source, sink);
    assert_eq!(log.keys(), vec!["zebra", "apple", "mango"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_output_is_input_minus_failures(
        count in 0u8..40,
        workers in 1usize..5,
        capacity in 1usize..6,
        failing in proptest::collection::btree_set(0u8..40, 0..6),
    ) {
        let markers: Vec<u8> = failing.iter().copied().collect();
        let sink = MemorySink::new();
        let log = sink.log();
        let report = PipelineFixture::new()
            .stage("picky", failing_on_markers(&markers), workers)
            .stage("flip", transform_fn(vertical_flip), workers)
            .capacity(capacity)
            .build()
            .run(MemorySource::synthetic(count as usize, 2, 2), sink);

        let expected: Vec<u64> = (0..count)
            .filter(|i| !failing.contains(i))
            .map(u64::from)
            .collect();
        let dropped = (count as usize) - expected.len();

        prop_assert_eq!(log.seqs(), expected);
        prop_assert_eq!(report.errors.len(), dropped);
        prop_assert_eq!(report.threads_spawned, report.threads_joined);
        if dropped == 0 {
            prop_assert_eq!(report.status, RunStatus::Success);
        } else {
            prop_assert_eq!(report.status, RunStatus::PartialSuccess(dropped));
        }
    }
}
