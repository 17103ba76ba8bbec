//! Event Sourcing Integration Tests
//!
//! Covers the replay contract of `ColumnStore` and the on-disk flow:
//! - Round-trip, identity and contiguity properties
//! - The documented end-to-end scenarios
//! - Recording through `EventStore`, snapshot + tail recovery
//! - Branch divergence

use std::collections::HashSet;
use std::fs;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use colstore::event_store::{EventStore, EventStoreConfig, SnapshotManager};
use colstore::events::{
    AddColumn, AppendRow, AppendRows, DeleteRows, ExpandRows, FilterRows, GroupByAggregate,
    MetaSet, RenameColumn, SampleRows, ShuffleRows, SortRows, TackOnRow,
};
use colstore::{row, AggFn, BranchRegistry, ColumnStore, Event, StoreError, Value, MAIN_BRANCH};

fn five_rows() -> ColumnStore {
    ColumnStore::from_rows(&[
        row! { "id" => 0, "name" => "ada" },
        row! { "id" => 1, "name" => "bob" },
        row! { "id" => 2, "name" => "cy" },
        row! { "id" => 3, "name" => "di" },
        row! { "id" => 4, "name" => "ed" },
    ])
}

fn test_config(dir: &TempDir, threshold: usize) -> EventStoreConfig {
    EventStoreConfig {
        snapshot_threshold: threshold,
        ..EventStoreConfig::new(dir.path().join("data"))
    }
}

#[test]
fn test_dict_round_trip_preserves_ids() {
    let mut store = five_rows();
    store
        .apply(&[
            Event::new(
                1,
                RenameColumn {
                    old_name: "name".into(),
                    new_name: "who".into(),
                },
            ),
            Event::new(
                2,
                MetaSet {
                    key: "source".into(),
                    value: Value::from("roster"),
                },
            ),
        ])
        .unwrap();

    let restored = ColumnStore::from_dict(store.to_dict()).unwrap();
    assert!(restored.same_state(&store));
    assert_eq!(restored.row_ids(), store.row_ids());
    assert_eq!(restored.column_id("who"), store.column_id("who"));
    assert_eq!(restored.meta(), store.meta());
    assert_eq!(restored.version(), 2);

    let via_json = ColumnStore::from_json(&store.to_json().unwrap()).unwrap();
    assert_eq!(via_json, store);
}

#[test]
fn test_rename_is_metadata_only() {
    let before = five_rows();
    let old_id = before.column_id("name").cloned().unwrap();

    let mut after = before.snapshot();
    after
        .apply(&[Event::new(
            1,
            RenameColumn {
                old_name: "name".into(),
                new_name: "who".into(),
            },
        )])
        .unwrap();

    assert_eq!(after.column_id("who"), Some(&old_id));
    assert!(after.column_id("name").is_none());
    assert_eq!(after.column_by_id(&old_id), before.column_by_id(&old_id));
    assert_eq!(&after["who"], &before["name"]);
    assert_eq!(after.columns(), vec!["id", "who"]);
}

#[test]
fn test_row_ids_survive_permutation_and_filter() {
    let store = five_rows();
    let original: HashSet<_> = store.row_ids().iter().cloned().collect();

    let events = vec![
        Event::new(
            1,
            SortRows {
                columns: vec!["name".into()],
                descending: vec![true],
            },
        ),
        Event::new(2, ShuffleRows { seed: "abc".into() }),
        Event::new(
            3,
            FilterRows {
                expression: "id % 2 == 0".into(),
            },
        ),
    ];
    let mut after = store.snapshot();
    for event in &events {
        after.apply([event]).unwrap();
        let ids: HashSet<_> = after.row_ids().iter().cloned().collect();
        assert!(ids.is_subset(&original));
        after.check_invariants().unwrap();
    }
    assert_eq!(after.nrows(), 3);
}

#[test]
fn test_contiguity_gap_stops_at_last_good_version() {
    let mut store = ColumnStore::new();
    let events = vec![
        Event::new(1, AppendRow { row: row! { "a" => 1 } }),
        Event::new(2, AppendRow { row: row! { "a" => 2 } }),
        Event::new(4, AppendRow { row: row! { "a" => 4 } }),
    ];

    let result = store.apply(&events);
    assert!(matches!(
        result,
        Err(StoreError::NonContiguous {
            expected: 3,
            found: 4
        })
    ));
    assert_eq!(store.version(), 2);
    assert_eq!(store["a"], [Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_duplicate_version_is_rejected() {
    let mut store = ColumnStore::new();
    let events = vec![
        Event::new(1, AppendRow { row: row! { "a" => 1 } }),
        Event::new(2, AppendRow { row: row! { "a" => 2 } }),
        Event::new(2, AppendRow { row: row! { "a" => 3 } }),
    ];

    assert!(matches!(
        store.apply(&events),
        Err(StoreError::NonContiguous {
            expected: 3,
            found: 2
        })
    ));
    assert_eq!(store.version(), 2);
}

#[test]
fn test_seeded_shuffle_is_deterministic() {
    let shuffle = [Event::new(1, ShuffleRows { seed: "abc".into() })];

    let first = ColumnStore::from_rows(&five_rows().to_rows(false));
    let second = ColumnStore::from_rows(&five_rows().to_rows(false));
    let mut a = first.snapshot();
    let mut b = second.snapshot();
    a.apply(&shuffle).unwrap();
    b.apply(&shuffle).unwrap();

    assert_eq!(a.to_rows(false), b.to_rows(false));
    assert_eq!(
        a["id"],
        [Value::Int(2), Value::Int(4), Value::Int(3), Value::Int(0), Value::Int(1)]
    );
}

#[test]
fn test_seeded_sample_is_deterministic() {
    let store = ColumnStore::from_rows(
        &(0..10).map(|i| row! { "i" => i }).collect::<Vec<_>>(),
    );
    let sample = [Event::new(1, SampleRows { n: 4, seed: "x".into() })];

    let mut a = store.snapshot();
    let mut b = store.snapshot();
    a.apply(&sample).unwrap();
    b.apply(&sample).unwrap();

    assert_eq!(a.row_ids(), b.row_ids());
    assert_eq!(
        a["i"],
        [Value::Int(9), Value::Int(1), Value::Int(5), Value::Int(4)]
    );
}

#[test]
fn test_replay_is_idempotent() {
    let events = vec![
        Event::new(1, AppendRows { rows: vec![row! { "a" => 1 }, row! { "a" => 2 }] }),
        Event::new(
            2,
            RenameColumn {
                old_name: "a".into(),
                new_name: "b".into(),
            },
        ),
        Event::new(3, ShuffleRows { seed: "s".into() }),
    ];

    let mut once = ColumnStore::new();
    once.apply(&events).unwrap();
    let mut twice = once.snapshot();
    twice.apply(&events).unwrap();

    assert_eq!(twice.version(), 3);
    assert!(twice.same_state(&once));

    // Out-of-order input is sorted by version before applying.
    let reversed: Vec<Event> = events.iter().rev().cloned().collect();
    let from_reversed = ColumnStore::from_events(&reversed).unwrap();
    assert_eq!(from_reversed.to_rows(false), once.to_rows(false));
}

#[test]
fn test_replay_reproduces_live_ids() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir, 0);

    let mut log = EventStore::with_config(config.clone());
    let mut live = log.initialize().unwrap();
    log.record(
        &mut live,
        AppendRows {
            rows: vec![
                row! { "tags" => vec!["a", "b"], "n" => 1 },
                row! { "tags" => vec!["c"], "n" => 2 },
            ],
        },
    )
    .unwrap();
    log.record(
        &mut live,
        AddColumn {
            name: "flag".into(),
            values: vec![Value::Bool(true), Value::Bool(false)],
        },
    )
    .unwrap();
    log.record(
        &mut live,
        ExpandRows {
            columns: vec!["tags".into()],
            number_field: true,
        },
    )
    .unwrap();
    log.record(
        &mut live,
        TackOnRow {
            index: 0,
            overrides: row! { "n" => 9 },
        },
    )
    .unwrap();

    // Two independent replays and the live store agree on every id.
    let events = log.load_events().unwrap();
    let first = ColumnStore::from_events(&events).unwrap();
    let second = ColumnStore::from_events(&events).unwrap();
    assert!(first.same_state(&live));
    assert!(second.same_state(&first));
    assert_eq!(first.row_ids(), live.row_ids());
    assert_eq!(first.column_id("tags_number"), live.column_id("tags_number"));

    // An id handed out before a restart still addresses the same row after it.
    let target = live.row_ids()[1].clone();
    log.record(
        &mut live,
        DeleteRows {
            indices: Vec::new(),
            row_ids: vec![target.to_string()],
        },
    )
    .unwrap();
    assert_eq!(live.nrows(), 3);

    let restarted = EventStore::with_config(config).initialize().unwrap();
    assert!(restarted.same_state(&live));
    assert_eq!(restarted.get_row_index(target.as_str()), -1);
}

#[test]
fn test_append_rename_filter_scenario() {
    let mut store = ColumnStore::from_rows(&[row! { "a" => 1, "b" => 2 }, row! { "a" => 3, "b" => 4 }]);

    store
        .apply(&[Event::new(1, AppendRow { row: row! { "a" => 5, "b" => 6 } })])
        .unwrap();
    assert_eq!(store.nrows(), 3);

    store
        .apply(&[Event::new(
            2,
            RenameColumn {
                old_name: "a".into(),
                new_name: "x".into(),
            },
        )])
        .unwrap();
    assert_eq!(store.columns(), vec!["x", "b"]);
    assert_eq!(store["x"], [Value::Int(1), Value::Int(3), Value::Int(5)]);

    store
        .apply(&[Event::new(
            3,
            FilterRows {
                expression: "x > 2".into(),
            },
        )])
        .unwrap();
    assert_eq!(store.nrows(), 2);
    assert_eq!(store["x"], [Value::Int(3), Value::Int(5)]);
}

#[test]
fn test_expand_with_alignment_scenario() {
    let mut store = ColumnStore::from_rows(&[row! {
        "tags" => vec!["x", "y"],
        "scores" => vec![1, 2],
    }]);

    store
        .apply(&[Event::new(
            1,
            ExpandRows {
                columns: vec!["tags".into(), "scores".into()],
                number_field: true,
            },
        )])
        .unwrap();

    assert_eq!(
        store.to_rows(false),
        vec![
            row! { "tags" => "x", "scores" => 1, "tags_number" => 1, "scores_number" => 1 },
            row! { "tags" => "y", "scores" => 2, "tags_number" => 2, "scores_number" => 2 },
        ]
    );
}

#[test]
fn test_group_by_sum_scenario() {
    let mut store = ColumnStore::from_rows(&[
        row! { "cat" => "A", "v" => 10 },
        row! { "cat" => "A", "v" => 20 },
        row! { "cat" => "B", "v" => 5 },
    ]);

    store
        .apply(&[Event::new(
            1,
            GroupByAggregate {
                id_vars: vec!["cat".into()],
                aggregations: IndexMap::from([("v".to_string(), AggFn::Sum)]),
            },
        )])
        .unwrap();

    let rows = store.to_rows(false);
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&row! { "cat" => "A", "v" => 30 }));
    assert!(rows.contains(&row! { "cat" => "B", "v" => 5 }));
}

#[test]
fn test_event_wire_format() {
    let event = Event::with_timestamp(
        7,
        1_704_067_200,
        RenameColumn {
            old_name: "a".into(),
            new_name: "x".into(),
        },
    );
    let line = event.to_json_line().unwrap();
    let json: serde_json::Value = serde_json::from_str(&line).unwrap();

    assert_eq!(json["version"], 7);
    assert_eq!(json["ts"], 1_704_067_200);
    assert_eq!(json["op"]["type"], "rename_column");
    assert_eq!(json["op"]["old_name"], "a");
    assert!(json["eventId"].as_str().is_some_and(|id| id.len() == 36));

    let parsed = Event::from_json_line(&line).unwrap();
    assert_eq!(parsed.event_type(), "rename_column");
    assert_eq!(parsed.event_id, event.event_id);
}

#[test]
fn test_state_recovery_from_snapshot_and_events() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir, 3);

    let mut log = EventStore::with_config(config.clone());
    let mut store = log.initialize().unwrap();
    log.record(
        &mut store,
        AppendRows {
            rows: vec![
                row! { "cat" => "A", "v" => 1 },
                row! { "cat" => "B", "v" => 2 },
            ],
        },
    )
    .unwrap();
    log.record(&mut store, AppendRow { row: row! { "cat" => "A", "v" => 3 } })
        .unwrap();
    log.record(
        &mut store,
        RenameColumn {
            old_name: "v".into(),
            new_name: "value".into(),
        },
    )
    .unwrap();
    log.record(
        &mut store,
        FilterRows {
            expression: "cat == 'A'".into(),
        },
    )
    .unwrap();

    // Snapshot at version 3, one event in the tail.
    let meta = SnapshotManager::new(config.clone()).load_meta().unwrap().unwrap();
    assert_eq!(meta.version, 3);

    let mut reopened = EventStore::with_config(config.clone());
    let recovered = reopened.initialize().unwrap();
    assert!(recovered.same_state(&store));
    assert_eq!(recovered.version(), 4);
    assert_eq!(recovered["value"], [Value::Int(1), Value::Int(3)]);

    // A full replay without the snapshot agrees.
    let replayed = EventStore::with_config(config).replay_all().unwrap();
    assert!(replayed.same_state(&store));
}

#[test]
fn test_backup_snapshot_recovery() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir, 2);

    let mut log = EventStore::with_config(config.clone());
    let mut store = ColumnStore::new();
    for n in 1..=5 {
        log.record(&mut store, AppendRow { row: row! { "n" => n } })
            .unwrap();
    }
    assert!(config.previous_snapshot_path().exists());

    fs::write(config.latest_snapshot_path(), "{\"type\":\"snapshot_meta\"").unwrap();

    let mut reopened = EventStore::with_config(config);
    let recovered = reopened.initialize().unwrap();
    assert!(recovered.same_state(&store));
    assert_eq!(reopened.last_snapshot_version(), 2);
}

#[test]
fn test_log_gap_is_a_hard_error_on_startup() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir, 0);

    let mut log = EventStore::with_config(config.clone());
    log.append_event(&Event::new(1, AppendRow { row: row! { "n" => 1 } }))
        .unwrap();
    log.append_event(&Event::new(3, AppendRow { row: row! { "n" => 3 } }))
        .unwrap();

    let mut reopened = EventStore::with_config(config);
    assert!(matches!(
        reopened.initialize(),
        Err(StoreError::NonContiguous {
            expected: 2,
            found: 3
        })
    ));
}

#[test]
fn test_branches_diverge() {
    let base = ColumnStore::from_events(&[Event::new(
        1,
        AppendRows {
            rows: vec![row! { "a" => 1 }, row! { "a" => 2 }, row! { "a" => 3 }],
        },
    )])
    .unwrap();
    let registry = BranchRegistry::with_main(base);
    registry.fork(MAIN_BRANCH, "filtered").unwrap();

    registry
        .apply(
            "filtered",
            &[Event::new(
                2,
                FilterRows {
                    expression: "a >= 2".into(),
                },
            )],
        )
        .unwrap();

    let main = registry.get(MAIN_BRANCH).unwrap();
    let filtered = registry.get("filtered").unwrap();
    assert_eq!(main.nrows(), 3);
    assert_eq!(main.version(), 1);
    assert_eq!(filtered["a"], [Value::Int(2), Value::Int(3)]);
    assert_eq!(filtered.row_ids(), &main.row_ids()[1..]);
}
