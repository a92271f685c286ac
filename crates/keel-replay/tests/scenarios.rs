// scenarios.rs — End-to-end replay scenarios over a real on-disk log.

use std::fs;
use std::path::Path;
use std::thread;

use chrono::Utc;
use keel_events::{Event, EventDraft, EventIdGenerator, EventValidator};
use keel_log::{EventWriter, LogReader, WriterOptions};
use keel_replay::{Reconstructor, TaskPhase};
use proptest::prelude::*;
use serde_json::json;
use tempfile::tempdir;

/// One producer's i-th event. Producers only touch their own keys.
fn producer_event(producer: usize, i: usize) -> EventDraft {
    let actor = format!("agent-{}", producer);
    let task = format!("P{}-T{}", producer, i / 4);
    match i % 4 {
        0 => EventDraft::new("task", "created", actor)
            .with_task(task)
            .with_payload(json!({"title": format!("task {}", i)})),
        1 => EventDraft::new("task", "state_changed", actor)
            .with_task(task)
            .with_payload(json!({"to": "designed"})),
        2 => EventDraft::new("git", "committed", actor)
            .with_task(task)
            .with_payload(json!({
                "sha": format!("{:x}{:08x}", producer, i),
                "branch": format!("agent-{}/work", producer),
                "message": format!("change {}", i)
            })),
        _ => EventDraft::new("decision", "recorded", actor)
            .with_task(task)
            .with_payload(json!({"summary": format!("decision {}", i)})),
    }
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content).unwrap();
}

#[test]
fn interleaved_producers_replay_to_the_same_state_in_any_producer_order() {
    let dir = tempdir().unwrap();
    let options = WriterOptions::new(dir.path()).with_fsync(false);

    let producers: Vec<_> = (0..2)
        .map(|producer| {
            let writer = EventWriter::open(options.clone());
            thread::spawn(move || {
                for i in 0..5_000 {
                    writer.emit(producer_event(producer, i)).unwrap();
                }
                writer.origin()
            })
        })
        .collect();
    let origins: Vec<u32> = producers.into_iter().map(|h| h.join().unwrap()).collect();

    let reader = LogReader::new(dir.path(), "workflow");
    let reconstructor = Reconstructor::default();
    let as_written = reconstructor.replay_log(&reader, None).unwrap();
    assert!(as_written.warnings.is_empty());
    assert_eq!(as_written.applied, 10_000);

    // The same events as if the other producer had won every lock race:
    // each producer's own order is kept, the interleaving is not.
    let (events, _) = reader.events(&EventValidator::default()).unwrap();
    let mut reordered: Vec<&Event> = events.iter().filter(|e| e.event_id.origin == origins[1]).collect();
    reordered.extend(events.iter().filter(|e| e.event_id.origin == origins[0]));
    let copy = dir.path().join("reordered.jsonl");
    let lines: Vec<String> = reordered.iter().map(|e| e.to_line().unwrap()).collect();
    write_lines(&copy, &lines);

    let swapped = reconstructor
        .replay(LogReader::from_files(vec![copy]).records().unwrap(), None)
        .unwrap();
    assert_eq!(swapped.state, as_written.state);
    assert_eq!(as_written.state.tasks.len(), 2 * 1_250);
    assert!(as_written
        .state
        .tasks
        .values()
        .all(|t| t.phase == TaskPhase::Designed));
    assert_eq!(as_written.state.git.commits.len(), 2 * 1_250);
}

#[test]
fn one_corrupt_line_in_five_hundred_yields_one_warning() {
    let dir = tempdir().unwrap();
    let writer = EventWriter::open(WriterOptions::new(dir.path().join("log")).with_fsync(false));
    for i in 0..500 {
        writer.emit(producer_event(0, i)).unwrap();
    }

    let original: Vec<String> = LogReader::new(dir.path().join("log"), "workflow")
        .records()
        .unwrap()
        .map(|r| r.unwrap().text)
        .collect();
    assert_eq!(original.len(), 500);

    let mut corrupted = original.clone();
    corrupted[250] = "{\"schema_version\": \"1.0.0\", \"event_id\": tru".to_string();
    let mut removed = original.clone();
    removed.remove(250);

    let corrupted_path = dir.path().join("corrupted.jsonl");
    let removed_path = dir.path().join("removed.jsonl");
    write_lines(&corrupted_path, &corrupted);
    write_lines(&removed_path, &removed);

    let reconstructor = Reconstructor::default();
    let with_corruption = reconstructor
        .replay(LogReader::from_files(vec![corrupted_path]).records().unwrap(), None)
        .unwrap();
    let without_line = reconstructor
        .replay(LogReader::from_files(vec![removed_path]).records().unwrap(), None)
        .unwrap();

    assert_eq!(with_corruption.warnings.len(), 1);
    assert_eq!(with_corruption.warnings[0].location.as_ref().unwrap().line, 251);
    assert!(without_line.warnings.is_empty());
    assert_eq!(with_corruption.state, without_line.state);
    assert_eq!(with_corruption.applied, 499);
}

proptest! {
    #[test]
    fn replay_is_deterministic_for_any_interleaving(
        schedule in proptest::collection::vec(0usize..3, 1..120),
    ) {
        // Each schedule entry lets that producer emit its next event.
        let mut generators: Vec<EventIdGenerator> =
            (0..3).map(|p| EventIdGenerator::with_origin(p as u32 + 1)).collect();
        let mut next = [0usize; 3];
        let interleaved: Vec<Event> = schedule
            .iter()
            .map(|&producer| {
                let (id, ts) = generators[producer].next(Utc::now());
                let i = next[producer];
                next[producer] += 1;
                producer_event(producer, i).into_event(id, ts)
            })
            .collect();

        let reconstructor = Reconstructor::default();
        let first = reconstructor.replay_events(&interleaved);
        let second = reconstructor.replay_events(&interleaved);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.warnings.is_empty());
        prop_assert_eq!(first.applied, schedule.len());

        let mut by_producer = interleaved.clone();
        by_producer.sort_by_key(|e| e.event_id.origin);
        prop_assert_eq!(reconstructor.replay_events(&by_producer).state, first.state);
    }
}
