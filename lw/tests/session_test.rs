//! Integration tests for logweave sessions
//!
//! Each test drives a real session through files on disk.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::IndexedRandom;

use logparse::{Level, ParserType, Record, RecordParserOptions, RecordWriter};
use logweave::{
    ComputationError, Config, ExportOptions, FileMergeOptions, GrabError, Mode, Nature, ObserveOptions, SearchFilter,
    Session, StreamStatus, TaskOutcome,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

fn write_lines(dir: &Path, name: &str, lines: impl IntoIterator<Item = String>) -> PathBuf {
    let path = dir.join(name);
    let mut out = BufWriter::new(File::create(&path).expect("Failed to create file"));
    for line in lines {
        writeln!(out, "{}", line).expect("Failed to write line");
    }
    out.flush().expect("Failed to flush");
    path
}

fn write_records(dir: &Path, name: &str, count: u64, app: &str) -> PathBuf {
    let path = dir.join(name);
    let mut writer = RecordWriter::new(BufWriter::new(File::create(&path).expect("Failed to create file")));
    for i in 0..count {
        let level = if i % 7 == 0 { Level::Warn } else { Level::Info };
        writer
            .write(&Record::log(1_700_000_000_000 + i, "ECU1", app, "CTX", level, &format!("record {}", i)))
            .expect("Failed to write record");
    }
    writer.into_inner().expect("Failed to flush records");
    path
}

async fn wait<T: Clone + Send + Sync + 'static>(task: logweave::CancelableTask<T>) -> TaskOutcome<T> {
    tokio::time::timeout(WAIT, task.wait()).await.expect("Task did not settle in time")
}

async fn observe(session: &Session, options: ObserveOptions) {
    let outcome = wait(session.observe(options).expect("Observe rejected")).await;
    assert!(outcome.is_resolved(), "observe failed: {:?}", outcome);
}

async fn observe_text(session: &Session, path: &Path) {
    observe(session, ObserveOptions::file(path, ParserType::Text)).await;
}

fn contents(elements: &[logweave::GrabbedElement]) -> Vec<String> {
    elements.iter().map(|e| e.content.clone()).collect()
}

// =============================================================================
// Stream
// =============================================================================

#[tokio::test]
async fn test_grab_bounds() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "ten.log", (0..10).map(|i| format!("line {}", i)));
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;

    assert_eq!(session.len().await.unwrap(), 10);
    assert_eq!(session.grab(0, 10).await.unwrap().len(), 10);
    for (start, count) in [(0, 0), (5, 6), (10, 1), (u64::MAX, 2), (9, u64::MAX)] {
        let result = session.grab(start, count).await;
        assert!(
            matches!(result, Err(ComputationError::Grabbing(GrabError::InvalidRange { .. }))),
            "grab({}, {}) should fail, got {:?}",
            start,
            count,
            result.map(|v| v.len())
        );
    }
    assert!(session.grab_ranges(vec![0..=3, 8..=10]).await.is_err());
    let grabbed = session.grab_ranges(vec![8..=9, 0..=1, 0..=0]).await.unwrap();
    assert_eq!(contents(&grabbed), vec!["line 8", "line 9", "line 0", "line 1", "line 0"]);
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_unbounded_ranges_fail_without_killing_session() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "ten.log", (0..10).map(|i| format!("line {}", i)));
    let out = temp.path().join("out.log");
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;

    let result = session.grab_ranges(vec![0..=u64::MAX]).await;
    assert!(matches!(result, Err(ComputationError::Grabbing(GrabError::InvalidRange { .. }))));
    assert!(wait(session.export(&out, vec![0..=u64::MAX], ExportOptions::default()).unwrap())
        .await
        .is_rejected());
    assert!(wait(session.export_raw(&out, vec![5..=u64::MAX]).unwrap()).await.is_rejected());

    assert!(!session.is_destroyed());
    assert_eq!(session.len().await.unwrap(), 10);
    assert_eq!(session.grab_ranges(vec![0..=9]).await.unwrap().len(), 10);
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_concat_source_id_boundary() {
    let temp = TempDir::new().unwrap();
    let a = write_lines(temp.path(), "a.log", (0..100).map(|i| format!("file a: {}", i)));
    let b = write_lines(temp.path(), "b.log", (0..100).map(|i| format!("file b: {}", i)));
    let session = Session::with_defaults().await.unwrap();
    observe(&session, ObserveOptions::concat(&[a, b], ParserType::Text)).await;

    assert_eq!(session.len().await.unwrap(), 200);
    let grabbed = session.grab(98, 4).await.unwrap();
    assert_eq!(
        contents(&grabbed),
        vec!["file a: 98", "file a: 99", "file b: 0", "file b: 1"]
    );
    let ids: Vec<u16> = grabbed.iter().map(|e| e.source_id).collect();
    assert_eq!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_eq!(ids[2], ids[3]);
    assert_eq!(session.get_sources().await.unwrap().len(), 2);
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_concat_with_missing_file_appends_nothing() {
    let temp = TempDir::new().unwrap();
    let a = write_lines(temp.path(), "a.log", (0..10).map(|i| format!("a {}", i)));
    let session = Session::with_defaults().await.unwrap();
    let task = session
        .observe(ObserveOptions::concat(&[a, temp.path().join("missing.log")], ParserType::Text))
        .unwrap();
    assert!(wait(task).await.is_rejected());
    assert_eq!(session.len().await.unwrap(), 0);
    assert!(matches!(
        session.observe(ObserveOptions::concat(&[], ParserType::Text)),
        Err(ComputationError::InvalidArgs(_))
    ));
}

#[tokio::test]
async fn test_export_fidelity() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "numbers.log", (0..1000).map(|i| format!("____{}____", i)));
    let out = temp.path().join("export.log");
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;

    let task = session
        .export(&out, vec![50..=100, 200..=300], ExportOptions::default())
        .unwrap();
    assert_eq!(wait(task).await.ok(), Some(true));

    let text = fs::read_to_string(&out).unwrap();
    assert!(!text.ends_with('\n'));
    let sum: u64 = text
        .split('\n')
        .map(|line| line.trim_matches('_').parse::<u64>().unwrap())
        .sum();
    let expected: u64 = (50..=100).chain(200..=300).sum();
    assert_eq!(sum, expected);
    assert_eq!(text.split('\n').count(), 51 + 101);
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_export_columns() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "csv.log", (0..5).map(|i| format!("{};host{};msg {}", i, i % 2, i)));
    let out = temp.path().join("columns.log");
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;

    let options = ExportOptions {
        columns: vec![2, 0],
        spliter: Some(";".to_string()),
        delimiter: Some(" | ".to_string()),
    };
    assert_eq!(wait(session.export(&out, vec![0..=1], options).unwrap()).await.ok(), Some(true));
    assert_eq!(fs::read_to_string(&out).unwrap(), "msg 0 | 0\nmsg 1 | 1");
}

#[tokio::test]
async fn test_raw_export_round_trip_records() {
    let temp = TempDir::new().unwrap();
    let path = write_records(temp.path(), "single.lwr", 120, "APP1");
    let out = temp.path().join("single-out.lwr");
    let parser = ParserType::Record(RecordParserOptions::default());

    let session = Session::with_defaults().await.unwrap();
    observe(&session, ObserveOptions::file(&path, parser.clone())).await;
    assert!(session.is_raw_export_available().await.unwrap());
    let original = session.grab_ranges(vec![10..=19, 60..=79]).await.unwrap();
    assert_eq!(wait(session.export_raw(&out, vec![10..=19, 60..=79]).unwrap()).await.ok(), Some(true));

    let reread = Session::with_defaults().await.unwrap();
    observe(&reread, ObserveOptions::file(&out, parser)).await;
    assert_eq!(reread.len().await.unwrap(), 30);
    assert_eq!(contents(&reread.grab(0, 30).await.unwrap()), contents(&original));
}

#[tokio::test]
async fn test_raw_export_round_trip_concatenated_records() {
    let temp = TempDir::new().unwrap();
    let a = write_records(temp.path(), "a.lwr", 40, "APPA");
    let b = write_records(temp.path(), "b.lwr", 40, "APPB");
    let out = temp.path().join("concat-out.lwr");
    let parser = ParserType::Record(RecordParserOptions::default());

    let session = Session::with_defaults().await.unwrap();
    observe(&session, ObserveOptions::concat(&[a, b], parser.clone())).await;
    assert_eq!(session.len().await.unwrap(), 80);
    let original = session.grab(30, 20).await.unwrap();
    assert_eq!(wait(session.export_raw(&out, vec![30..=49]).unwrap()).await.ok(), Some(true));

    let reread = Session::with_defaults().await.unwrap();
    observe(&reread, ObserveOptions::file(&out, parser)).await;
    assert_eq!(contents(&reread.grab(0, 20).await.unwrap()), contents(&original));
}

#[tokio::test]
async fn test_merge_orders_files_by_timestamp() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.log");
    let b = temp.path().join("b.log");
    fs::write(&a, "2024-01-01 10:00:01 a1\n2024-01-01 10:00:04 a2\n").unwrap();
    fs::write(&b, "2024-01-01 10:00:02 b1\n  b1 continued\n2024-01-01 10:00:03 b2\n").unwrap();
    let out = temp.path().join("merged.log");
    let format = "YYYY-MM-DD hh:mm:ss";

    let session = Session::with_defaults().await.unwrap();
    let task = session
        .merge(
            vec![FileMergeOptions::new(&a, format), FileMergeOptions::new(&b, format)],
            &out,
            false,
        )
        .unwrap();
    assert!(wait(task).await.is_resolved());

    let expected = vec![
        "2024-01-01 10:00:01 a1",
        "2024-01-01 10:00:02 b1",
        "  b1 continued",
        "2024-01-01 10:00:03 b2",
        "2024-01-01 10:00:04 a2",
    ];
    assert_eq!(fs::read_to_string(&out).unwrap(), format!("{}\n", expected.join("\n")));
    let grabbed = session.grab(0, 5).await.unwrap();
    assert_eq!(contents(&grabbed), expected);
    assert_eq!(grabbed[0].source_id, grabbed[4].source_id);
    assert_ne!(grabbed[0].source_id, grabbed[1].source_id);

    assert!(matches!(
        session.merge(vec![FileMergeOptions::new(&a, "YYYY YYYY")], &out, true),
        Err(ComputationError::InvalidArgs(_))
    ));
}

#[tokio::test]
async fn test_stream_status_transitions() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "s.log", (0..3).map(|i| format!("s {}", i)));
    let session = Session::with_defaults().await.unwrap();
    assert_eq!(session.stream_status().await.unwrap(), StreamStatus::Empty);
    observe_text(&session, &path).await;
    assert_eq!(session.stream_status().await.unwrap(), StreamStatus::Ready);
    observe_text(&session, &path).await;
    assert_eq!(session.len().await.unwrap(), 6);
    session.destroy().await.unwrap();
    assert_eq!(session.stream_status().await.unwrap(), StreamStatus::Destroyed);
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_search_replace() {
    let temp = TempDir::new().unwrap();
    let lines = (0..60_000).map(|i| if i % 2 == 0 { format!("alpha {}", i) } else { format!("beta {}", i) });
    let path = write_lines(temp.path(), "big.log", lines);
    let mut config = Config::default();
    config.session.search_chunk_lines = 1_000;
    let session = Session::new(config).await.unwrap();
    observe_text(&session, &path).await;

    let first = session.search(vec![SearchFilter::plain("alpha")]).unwrap();
    let second = session.search(vec![SearchFilter::plain("beta")]).unwrap();
    assert_eq!(wait(second).await.ok(), Some(30_000));
    let _ = wait(first).await;

    assert_eq!(session.get_search_result_len().await.unwrap(), 30_000);
    let matches = session.grab_search(0, 30_000).await.unwrap();
    assert!(matches.iter().all(|e| e.content.starts_with("beta")));
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_random_stream_search_agrees_with_scan() {
    let temp = TempDir::new().unwrap();
    let words = ["kernel", "usb", "net", "disk", "audio"];
    let mut rng = rand::rng();
    let lines: Vec<String> = (0..5_000)
        .map(|i| format!("{} {} {}", i, words.choose(&mut rng).unwrap(), words.choose(&mut rng).unwrap()))
        .collect();
    let path = write_lines(temp.path(), "random.log", lines.clone());
    let mut config = Config::default();
    config.session.search_chunk_lines = 333;
    let session = Session::new(config).await.unwrap();
    observe_text(&session, &path).await;

    let filters = vec![SearchFilter::plain("usb"), SearchFilter::plain("disk")];
    let found = wait(session.search(filters).unwrap()).await.ok().unwrap();
    let expected: Vec<u64> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains("usb") || line.contains("disk"))
        .map(|(i, _)| i as u64)
        .collect();
    assert_eq!(found, expected.len() as u64);
    if found > 0 {
        let positions: Vec<u64> = session
            .grab_search(0, found)
            .await
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, expected);
    }
    let map = session.get_map(50, None).await.unwrap();
    let per_filter: u64 = map.iter().flatten().map(|(_, count)| *count as u64).sum();
    let both = lines.iter().filter(|l| l.contains("usb") && l.contains("disk")).count() as u64;
    assert_eq!(per_filter, found + both);
}

#[tokio::test]
async fn test_invalid_regex_keeps_previous_index() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "r.log", (0..20).map(|i| format!("row {}", i)));
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;
    assert_eq!(wait(session.search(vec![SearchFilter::plain("row 1")]).unwrap()).await.ok(), Some(11));

    assert!(matches!(
        session.search(vec![SearchFilter::regex("(unclosed")]),
        Err(ComputationError::SearchError(_))
    ));
    assert_eq!(session.get_search_result_len().await.unwrap(), 11);
}

#[tokio::test]
async fn test_live_append_is_matched() {
    let temp = TempDir::new().unwrap();
    let a = write_lines(temp.path(), "a.log", (0..10).map(|i| format!("first {}", i)));
    let b = write_lines(temp.path(), "b.log", (0..10).map(|i| format!("second {}", i)));
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &a).await;
    assert_eq!(wait(session.search(vec![SearchFilter::plain("5")]).unwrap()).await.ok(), Some(1));

    observe_text(&session, &b).await;
    assert_eq!(session.get_search_result_len().await.unwrap(), 2);
    let matches = session.grab_search(0, 2).await.unwrap();
    assert_eq!(contents(&matches), vec!["first 5", "second 5"]);
    assert_eq!(matches[1].position, 15);
}

#[tokio::test]
async fn test_search_issued_while_observing() {
    let temp = TempDir::new().unwrap();
    let lines = (0..50_000).map(|i| if i % 100 == 7 { format!("hit {}", i) } else { format!("miss {}", i) });
    let path = write_lines(temp.path(), "large.log", lines);
    let session = Session::with_defaults().await.unwrap();

    let observing = session.observe(ObserveOptions::file(&path, ParserType::Text)).unwrap();
    let searching = session.search(vec![SearchFilter::plain("hit")]).unwrap();
    assert!(wait(observing).await.is_resolved());
    let found = wait(searching).await.ok().expect("search should resolve");

    let len = session.get_search_result_len().await.unwrap();
    assert_eq!(len, 500);
    assert!(found <= len, "resolved {} above committed {}", found, len);
    let grabbed = session.grab_search(0, len).await.unwrap();
    assert!(grabbed.windows(2).all(|pair| pair[0].position < pair[1].position));
    assert!(grabbed.iter().all(|element| element.content.starts_with("hit")));

    assert_eq!(wait(session.search(vec![SearchFilter::plain("hit")]).unwrap()).await.ok(), Some(500));
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_nearest_position() {
    let temp = TempDir::new().unwrap();
    let hits = [0, 1, 2, 3, 4, 5, 100, 200, 300, 400, 500];
    let lines = (0..600).map(|i| if hits.contains(&i) { format!("match {}", i) } else { format!("other {}", i) });
    let path = write_lines(temp.path(), "nearest.log", lines);
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;
    assert_eq!(wait(session.search(vec![SearchFilter::plain("match")]).unwrap()).await.ok(), Some(11));

    let near = session.get_nearest_position(10).await.unwrap().unwrap();
    assert_eq!((near.index, near.position), (5, 5));
    let near = session.get_nearest_position(110).await.unwrap().unwrap();
    assert_eq!((near.index, near.position), (6, 100));
    session.drop_search().await.unwrap();
    assert_eq!(session.get_nearest_position(10).await.unwrap(), None);
}

#[tokio::test]
async fn test_map_scaling() {
    let temp = TempDir::new().unwrap();
    let lines = (0..1000).map(|i| if i % 10 == 0 { format!("tick {}", i) } else { format!("idle {}", i) });
    let path = write_lines(temp.path(), "map.log", lines);
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;
    wait(session.search(vec![SearchFilter::plain("tick")]).unwrap()).await;

    let map = session.get_map(10, None).await.unwrap();
    assert_eq!(map.len(), 10);
    assert!(map.iter().all(|bucket| bucket == &vec![(0u8, 10u16)]));

    let map = session.get_map(2000, Some(0..=19)).await.unwrap();
    assert_eq!(map.len(), 20);
    assert_eq!(map[0], vec![(0, 1)]);
    assert!(map[1].is_empty());
    assert_eq!(map[10], vec![(0, 1)]);
}

#[tokio::test]
async fn test_extract_leaves_index_untouched() {
    let temp = TempDir::new().unwrap();
    let lines = (0..5000).map(|i| {
        if i % 100 == 0 || i <= 5 {
            format!("[{}]:: some CPU={}% line data", i, i % 97)
        } else {
            format!("[{}]:: some line data", i)
        }
    });
    let path = write_lines(temp.path(), "extract.log", lines);
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;

    let filter = SearchFilter::regex(r"cpu=(\d{1,})").ignore_case(true);
    let results = wait(session.extract(vec![filter]).unwrap()).await.ok().unwrap();
    assert_eq!(session.get_search_result_len().await.unwrap(), 0);
    assert_eq!(results.len(), 55);
    for pos in 0..=5u64 {
        assert_eq!(results[pos as usize].index, pos);
    }
    for pos in 1..=49u64 {
        assert_eq!(results[pos as usize + 5].index, pos * 100);
    }
    assert!(results.iter().all(|r| r.values.len() == 1 && r.values[0].0 == 0));
    assert_eq!(results[6].values[0].1, vec![(100 % 97).to_string()]);
}

#[tokio::test]
async fn test_search_values() {
    let temp = TempDir::new().unwrap();
    let lines = (0..100).map(|i| if i % 4 == 0 { format!("cpu={}", i) } else { format!("noise {}", i) });
    let path = write_lines(temp.path(), "values.log", lines);
    let session = Session::with_defaults().await.unwrap();
    let mut updates = session.events().search_values_updated.subscribe();
    observe_text(&session, &path).await;

    assert!(wait(session.search_values(vec![r"cpu=(\d+)".to_string()]).unwrap()).await.is_resolved());
    assert_eq!(updates.recv().await, Some(None));
    let ranges = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(ranges[&0], (0.0, 96.0));

    let values = session.get_values(1000, None).await.unwrap();
    assert_eq!(values[&0].len(), 25);
    let reduced = session.get_values(5, None).await.unwrap();
    assert!(reduced[&0].len() <= 5);
    assert!(matches!(
        session.search_values(vec!["no group".to_string()]),
        Err(ComputationError::SearchError(_))
    ));
}

#[tokio::test]
async fn test_nested_match() {
    let temp = TempDir::new().unwrap();
    let lines = (0..50).map(|i| match i % 10 {
        0 => format!("error code={}", i),
        5 => format!("error fatal {}", i),
        _ => format!("ok {}", i),
    });
    let path = write_lines(temp.path(), "nested.log", lines);
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;
    assert_eq!(wait(session.search(vec![SearchFilter::plain("error")]).unwrap()).await.ok(), Some(10));

    let fatal = SearchFilter::plain("fatal");
    let forward = session.search_nested_match(fatal.clone(), 2, false).await.unwrap().unwrap();
    assert_eq!((forward.index, forward.position), (3, 15));
    let backward = session.search_nested_match(fatal.clone(), 2, true).await.unwrap().unwrap();
    assert_eq!((backward.index, backward.position), (1, 5));
    assert_eq!(session.search_nested_match(fatal, 10, false).await.unwrap(), None);
}

// =============================================================================
// Indexed view
// =============================================================================

async fn indexed_fixture(temp: &TempDir) -> Session {
    let lines = (0..100).map(|i| if i % 5 == 0 { format!("match {}", i) } else { format!("line {}", i) });
    let path = write_lines(temp.path(), "indexed.log", lines);
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;
    assert_eq!(wait(session.search(vec![SearchFilter::plain("match")]).unwrap()).await.ok(), Some(20));
    session
}

#[tokio::test]
async fn test_grab_indexed_with_bookmarks() {
    let temp = TempDir::new().unwrap();
    let session = indexed_fixture(&temp).await;
    assert_eq!(session.get_indexed_len().await.unwrap(), 20);

    session.set_bookmarks(vec![2, 3]).await.unwrap();
    session.add_bookmark(5).await.unwrap();
    assert_eq!(session.get_indexed_len().await.unwrap(), 22);

    let grabbed = session.grab_indexed(0, 4).await.unwrap();
    let positions: Vec<u64> = grabbed.iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![0, 2, 3, 5]);
    assert_eq!(grabbed[0].nature, vec![Nature::Search.as_u8()]);
    assert_eq!(grabbed[1].nature, vec![Nature::Bookmark.as_u8()]);
    assert!(grabbed[3].nature.contains(&Nature::Search.as_u8()));
    assert!(grabbed[3].nature.contains(&Nature::Bookmark.as_u8()));

    session.remove_bookmark(2).await.unwrap();
    assert_eq!(session.get_indexed_len().await.unwrap(), 21);
    assert!(session.add_bookmark(100).await.is_err());
    assert!(session.grab_indexed(21, 1).await.is_err());
    assert!(session.grab_indexed(0, 0).await.is_err());

    assert_eq!(session.get_around_indexes(4).await.unwrap(), (Some(1), Some(2)));
    let ranges = session.get_indexed_ranges().await.unwrap();
    assert_eq!(ranges.len(), 20);
    assert_eq!(ranges[1], 5..=5);
}

#[tokio::test]
async fn test_selections_join_the_view() {
    let temp = TempDir::new().unwrap();
    let session = indexed_fixture(&temp).await;
    session.set_indexes(Nature::Selection, vec![11..=13]).await.unwrap();
    assert_eq!(session.get_indexed_len().await.unwrap(), 23);
    session.unset_indexes(Nature::Selection, vec![12..=12]).await.unwrap();
    assert_eq!(session.get_indexed_len().await.unwrap(), 22);
    assert!(session.set_indexes(Nature::Search, vec![1..=1]).await.is_err());
}

#[tokio::test]
async fn test_breadcrumbs_expansion_is_monotonic() {
    let temp = TempDir::new().unwrap();
    let lines = (0..100).map(|i| if i % 25 == 0 { format!("match {}", i) } else { format!("line {}", i) });
    let path = write_lines(temp.path(), "sparse.log", lines);
    let session = Session::with_defaults().await.unwrap();
    observe_text(&session, &path).await;
    assert_eq!(wait(session.search(vec![SearchFilter::plain("match")]).unwrap()).await.ok(), Some(4));

    session.set_indexing_mode(Mode::Breadcrumbs).await.unwrap();
    // per gap: two breadcrumbs on each side and a separator
    let len = session.get_indexed_len().await.unwrap();
    assert_eq!(len, 4 + 4 * 5);

    let view = session.grab_indexed(0, len).await.unwrap();
    let separator = view
        .iter()
        .find(|e| e.nature.contains(&Nature::BreadcrumbSeparator.as_u8()))
        .map(|e| e.position)
        .unwrap();
    assert_eq!(separator, 12);

    let mut previous = len;
    for above in [true, false, true] {
        session.expand_breadcrumbs(separator, 3, above).await.unwrap();
        let expanded = session.get_indexed_len().await.unwrap();
        assert!(expanded > previous);
        previous = expanded;
    }
    assert!(session.expand_breadcrumbs(0, 1, true).await.is_err());

    session.set_indexing_mode(Mode::Regular).await.unwrap();
    assert_eq!(session.get_indexed_len().await.unwrap(), 4);
    assert!(session.expand_breadcrumbs(separator, 1, true).await.is_err());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_destroyed_session_returns_unavailable() {
    let session = Session::with_defaults().await.unwrap();
    session.destroy().await.unwrap();
    assert!(session.is_destroyed());
    assert!(matches!(session.len().await, Err(ComputationError::SessionUnavailable)));
    assert!(matches!(session.grab(0, 1).await, Err(ComputationError::SessionUnavailable)));
    assert!(matches!(
        session.search(vec![SearchFilter::plain("x")]),
        Err(ComputationError::SessionUnavailable)
    ));
    assert!(matches!(
        session.assign("/tmp/whatever.log", ParserType::Text),
        Err(ComputationError::SessionUnavailable)
    ));
}

#[tokio::test]
async fn test_destroy_cancels_running_operations() {
    let session = Session::with_defaults().await.unwrap();
    let sleeper = session.sleep(60_000, false).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(WAIT, session.destroy()).await.unwrap().unwrap();
    let outcome = wait(sleeper).await;
    assert!(!outcome.is_rejected());
}

#[tokio::test]
async fn test_tracker_fault_destroys_session() {
    let session = Session::with_defaults().await.unwrap();
    let mut destroyed = session.events().session_destroyed.subscribe();
    session.trigger_tracker_error().await.unwrap();
    tokio::time::timeout(WAIT, destroyed.recv()).await.unwrap().unwrap();
    assert!(matches!(session.len().await, Err(ComputationError::SessionUnavailable)));
}

#[tokio::test]
async fn test_operation_events_and_stats() {
    let temp = TempDir::new().unwrap();
    let path = write_lines(temp.path(), "ops.log", (0..5).map(|i| format!("op {}", i)));
    let session = Session::with_defaults().await.unwrap();
    session.set_debug(true).await.unwrap();
    let mut done = session.events().operation_done.subscribe();
    let mut file_read = session.events().file_read.subscribe();

    let task = session.assign(&path, ParserType::Text).unwrap();
    let uuid = task.uuid();
    assert!(wait(task).await.is_resolved());
    assert_eq!(file_read.recv().await, Some(()));
    let (finished, result) = tokio::time::timeout(WAIT, done.recv()).await.unwrap().unwrap();
    assert_eq!(finished, uuid);
    assert_eq!(result.as_deref(), Some("null"));

    let stats: serde_json::Value = serde_json::from_str(&session.get_operations_stat().await.unwrap()).unwrap();
    assert_eq!(stats[0]["name"], "observe");
    assert!(session.events().debug_check_order().is_ok());
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn test_abort_sleep_with_ignored_cancel() {
    let session = Session::with_defaults().await.unwrap();
    let task = session.sleep(100, true).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();
    assert!(task.is_canceling());
    assert_eq!(wait(task).await, TaskOutcome::Canceled);
}
