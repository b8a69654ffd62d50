use mendkit_recon::driver::run_to_completion;
use mendkit_recon::model::Attributes;
use mendkit_recon::{AttrValue, BatchOffset, Job, MigrationState, Reconciler, RecordId, StoreRead};
use mendkit_store::{SqliteAuditLog, SqliteStore};

const URL_JOB: &str = r#"
name = "click-url-cleanup"
dataset = "click_stats"
target = "url"

[[strategies]]
name = "normalize"
kind = "normalize_url"

[merge]
key = ["post_id", "date", "url"]
sum = ["clicks"]
"#;

const OWNER_JOB: &str = r#"
name = "ownership"
dataset = "profiles"
target = "owner_id"

[[strategies]]
name = "existing-owner"
kind = "current"

[[strategies]]
name = "by-login"
kind = "lookup"
dataset = "users"
match_on = "login"
using = "author_login"
"#;

fn row(pairs: &[(&str, AttrValue)]) -> Attributes {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn click(url: &str, clicks: i64) -> Attributes {
    row(&[
        ("post_id", AttrValue::Integer(7)),
        ("date", "2024-05-01".into()),
        ("url", url.into()),
        ("clicks", AttrValue::Integer(clicks)),
    ])
}

#[test]
fn merge_scenario_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.db");

    let mut store = SqliteStore::open(&path).unwrap();
    store
        .upsert(
            "click_stats",
            [
                (RecordId(1), click("https://blog.example.test/k/?utm_source=feed", 5)),
                (RecordId(2), click("https://blog.example.test/k", 3)),
            ],
        )
        .unwrap();

    let audit = SqliteAuditLog::open(&path).unwrap();
    let mut rec = Reconciler::new(store, Job::from_toml(URL_JOB).unwrap(), audit).unwrap();
    let report = rec.run_batch(BatchOffset::start(), 100).unwrap();
    assert_eq!(report.summary.repaired_via("normalize"), 1);
    assert_eq!(report.summary.merged, 1);

    let (store, audit) = rec.into_parts();
    drop(store);
    assert_eq!(
        audit
            .events("click-url-cleanup")
            .unwrap()
            .iter()
            .map(|e| e.category.as_str())
            .collect::<Vec<_>>(),
        vec!["repaired_via_normalize", "merged"]
    );

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.count("click_stats").unwrap(), 1);
    let kept = reopened.read("click_stats", RecordId(1)).unwrap().unwrap();
    assert_eq!(kept.get("clicks"), &AttrValue::Integer(8));
    assert_eq!(kept.get("url"), &AttrValue::from("https://blog.example.test/k"));
}

#[test]
fn lookup_against_another_dataset() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert("users", [(RecordId(40), row(&[("login", "ana".into())]))])
        .unwrap();
    store
        .upsert(
            "profiles",
            [
                (RecordId(1), row(&[("author_login", "ana".into())])),
                (RecordId(2), row(&[("author_login", "bob".into())])),
            ],
        )
        .unwrap();

    let mut rec = Reconciler::new(store, Job::from_toml(OWNER_JOB).unwrap(), SqliteAuditLog::open_in_memory().unwrap()).unwrap();
    let report = rec.run_batch(BatchOffset::start(), 10).unwrap();
    assert_eq!(report.summary.repaired_via("by-login"), 1);
    assert_eq!(report.summary.unmatched, 1);

    let profile = rec.store().read("profiles", RecordId(1)).unwrap().unwrap();
    assert_eq!(profile.get("owner_id"), &AttrValue::Integer(40));
}

#[test]
fn drive_persists_state_between_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.db");
    {
        let mut store = SqliteStore::open(&path).unwrap();
        store
            .upsert(
                "click_stats",
                (1..=5).map(|i| (RecordId(i), click(&format!("https://blog.example.test/p{i}/"), 1))),
            )
            .unwrap();
    }

    // First session stops after two batches.
    let store = SqliteStore::open(&path).unwrap();
    let state = store.load_state("click-url-cleanup").unwrap();
    let mut rec = Reconciler::new(store, Job::from_toml(URL_JOB).unwrap(), SqliteAuditLog::open(&path).unwrap()).unwrap();
    let first = run_to_completion(&mut rec, state, 2, Some(2), |_, _| Ok(())).unwrap();
    assert_eq!(first.totals.total, 4);
    rec.store().save_state("click-url-cleanup", &first.state).unwrap();
    drop(rec);

    // Second session picks up where the first stopped.
    let store = SqliteStore::open(&path).unwrap();
    let state = store.load_state("click-url-cleanup").unwrap();
    assert_eq!(state, MigrationState::InProgress { offset: BatchOffset::after(4) });
    let mut rec = Reconciler::new(store, Job::from_toml(URL_JOB).unwrap(), SqliteAuditLog::open(&path).unwrap()).unwrap();
    let second = run_to_completion(&mut rec, state, 2, None, |_, _| Ok(())).unwrap();
    assert_eq!(second.totals.total, 1);
    assert_eq!(second.state, MigrationState::Completed);
    rec.store().save_state("click-url-cleanup", &second.state).unwrap();

    // A completed migration runs nothing.
    let third = run_to_completion(&mut rec, MigrationState::Completed, 2, None, |_, _| Ok(())).unwrap();
    assert_eq!(third.batches, 0);

    let urls: Vec<_> = (1..=5)
        .map(|i| rec.store().read("click_stats", RecordId(i)).unwrap().unwrap().get("url").clone())
        .collect();
    assert!(urls.iter().all(|u| !u.as_str().unwrap().ends_with('/')));
}
