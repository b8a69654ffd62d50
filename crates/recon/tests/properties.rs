// Property-based tests for batch boundaries and merge conservation.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::BTreeSet;

use proptest::prelude::*;

use mendkit_recon::audit::MemoryAudit;
use mendkit_recon::merge::MergeSpec;
use mendkit_recon::model::Attributes;
use mendkit_recon::strategies::{CopyFrom, Current, NormalizeUrl};
use mendkit_recon::{AttrValue, BatchOffset, BatchReport, Job, MemoryStore, Reconciler};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

const PAGES: [&str; 3] = ["/a", "/b", "/c"];
const SUFFIXES: [&str; 4] = ["", "/", "?utm_source=x", "/#top"];
const DATES: [&str; 2] = ["2024-05-01", "2024-05-02"];

#[derive(Debug, Clone)]
struct Row {
    page: usize,
    suffix: usize,
    date: usize,
    clicks: i64,
}

fn arb_rows(max: usize) -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec(
        (0..PAGES.len(), 0..SUFFIXES.len(), 0..DATES.len(), 0i64..1000)
            .prop_map(|(page, suffix, date, clicks)| Row { page, suffix, date, clicks }),
        0..max,
    )
}

/// Ids are spread out so gaps are part of every dataset.
fn store_from(rows: &[Row]) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (i, row) in rows.iter().enumerate() {
        let mut attrs = Attributes::new();
        attrs.insert(
            "url".into(),
            format!("https://blog.example.test{}{}", PAGES[row.page], SUFFIXES[row.suffix]).into(),
        );
        attrs.insert("date".into(), DATES[row.date].into());
        attrs.insert("clicks".into(), AttrValue::Integer(row.clicks));
        store.insert("clicks", (i as u64 + 1) * 3, attrs);
    }
    store
}

fn job() -> Job {
    Job::new("cleanup", "clicks", "url")
        .strategy(NormalizeUrl {
            name: "normalize".into(),
            target: "url".into(),
            from: "url".into(),
        })
        .merge(MergeSpec::new(["date", "url"], ["clicks"]))
}

fn total_clicks(store: &MemoryStore) -> i64 {
    store
        .records("clicks")
        .map(|rows| rows.values().filter_map(|r| r["clicks"].as_i64()).sum::<i64>())
        .unwrap_or(0)
}

/// Drive batches of `batch_size` until done; returns (store, candidates seen).
fn drive(store: MemoryStore, batch_size: usize) -> (MemoryStore, usize) {
    let mut rec = Reconciler::new(store, job(), MemoryAudit::new()).unwrap();
    let mut offset = BatchOffset::start();
    let mut seen = 0;
    loop {
        let report = rec.run_batch(offset, batch_size).unwrap();
        assert!(report.summary.is_conserved());
        seen += report.summary.total;
        offset = report.next_offset;
        if report.done {
            break;
        }
    }
    (rec.into_parts().0, seen)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn batch_size_does_not_change_outcome(
        rows in arb_rows(24),
        batch_size in 1usize..6,
    ) {
        let (whole, seen_whole) = drive(store_from(&rows), 1000);
        let (chunked, seen_chunked) = drive(store_from(&rows), batch_size);

        prop_assert_eq!(whole.records("clicks"), chunked.records("clicks"));
        prop_assert_eq!(seen_whole, rows.len());
        prop_assert_eq!(seen_chunked, rows.len());
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn merges_conserve_counters_and_leave_unique_keys(rows in arb_rows(24)) {
        let before = store_from(&rows);
        let expected = total_clicks(&before);
        let (after, _) = drive(before, 4);

        prop_assert_eq!(total_clicks(&after), expected);

        let mut keys = BTreeSet::new();
        if let Some(records) = after.records("clicks") {
            for attrs in records.values() {
                let key = (attrs["date"].clone(), attrs["url"].clone());
                prop_assert!(keys.insert(key), "duplicate key survived reconciliation");
            }
        }
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn second_pass_changes_nothing(rows in arb_rows(24)) {
        let (after, _) = drive(store_from(&rows), 5);
        let writes = after.write_count();
        let mut rec = Reconciler::new(after, job(), MemoryAudit::new()).unwrap();
        let report = rec.run_batch(BatchOffset::start(), 1000).unwrap();

        prop_assert_eq!(report.summary.repaired_total(), 0);
        prop_assert_eq!(report.summary.merged, 0);
        prop_assert_eq!(report.summary.already_correct, report.summary.total);
        prop_assert_eq!(rec.store().write_count(), writes);
    }
}

// ---------------------------------------------------------------------------
// Preview fidelity
// ---------------------------------------------------------------------------

const SLOTS: [&str; 3] = ["a", "b", "c"];

/// (current slot, wanted slot, counter). `None` leaves the attribute out.
fn arb_slots(max: usize) -> impl Strategy<Value = Vec<(Option<usize>, Option<usize>, i64)>> {
    prop::collection::vec(
        (
            prop::option::of(0..SLOTS.len()),
            prop::option::of(0..SLOTS.len()),
            0i64..100,
        ),
        0..max,
    )
}

fn slot_store(rows: &[(Option<usize>, Option<usize>, i64)]) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (i, (slot, wanted, n)) in rows.iter().enumerate() {
        let mut attrs = Attributes::new();
        if let Some(slot) = slot {
            attrs.insert("slot".into(), SLOTS[*slot].into());
        }
        if let Some(wanted) = wanted {
            attrs.insert("wanted".into(), SLOTS[*wanted].into());
        }
        attrs.insert("n".into(), AttrValue::Integer(*n));
        store.insert("slots", i as u64 + 1, attrs);
    }
    store
}

/// Moves records onto another record's key, so merges chain across the batch.
fn slot_job() -> Job {
    Job::new("slots", "slots", "slot")
        .strategy(CopyFrom {
            name: "wanted".into(),
            target: "slot".into(),
            from: "wanted".into(),
        })
        .strategy(Current {
            name: "existing".into(),
            target: "slot".into(),
        })
        .merge(MergeSpec::new(["slot"], ["n"]))
}

fn one_batch(store: MemoryStore, offset: BatchOffset, preview: bool) -> BatchReport {
    let mut rec = Reconciler::new(store, slot_job(), MemoryAudit::new()).unwrap();
    if preview {
        rec.preview_batch(offset, 1000).unwrap()
    } else {
        rec.run_batch(offset, 1000).unwrap()
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn preview_matches_execute(rows in arb_slots(16), skip in 0u64..4) {
        let offset = if skip == 0 { BatchOffset::start() } else { BatchOffset::after(skip) };
        let planned = one_batch(slot_store(&rows), offset, true);
        let applied = one_batch(slot_store(&rows), offset, false);

        prop_assert_eq!(&planned.summary, &applied.summary);
        prop_assert_eq!(
            serde_json::to_value(&planned.changes).unwrap(),
            serde_json::to_value(&applied.changes).unwrap()
        );
    }
}
