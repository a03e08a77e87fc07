use demo_parser_core::{
    open_db_in_memory, RepoError, RunKind, RunRepository, RunTracker, SqliteRunRepository,
};

#[test]
fn start_and_complete_run_records_counters() {
    let mut db = open_db_in_memory().unwrap();
    let mut tracker = RunTracker::sqlite(&mut db).unwrap();

    let run_id = tracker.start_run(RunKind::Detail, 20).unwrap();
    let open = tracker.get_run(run_id).unwrap();
    assert_eq!(open.kind, RunKind::Detail);
    assert_eq!(open.total_items, 20);
    assert!(!open.is_completed());
    assert!(open.duration_seconds.is_none());

    assert!(tracker.complete_run(run_id, 18, 2));
    let done = tracker.get_run(run_id).unwrap();
    assert!(done.is_completed());
    assert_eq!(done.processed_items, 18);
    assert_eq!(done.failed_items, 2);
    assert!(done.end_time.unwrap() >= done.start_time);
    assert!(done.duration_seconds.unwrap() >= 0.0);
}

#[test]
fn list_runs_returns_oldest_first() {
    let mut db = open_db_in_memory().unwrap();
    let mut tracker = RunTracker::sqlite(&mut db).unwrap();

    let listing = tracker.start_run(RunKind::Listing, 50).unwrap();
    let html = tracker.start_run(RunKind::Html, 10).unwrap();

    let kinds: Vec<(i64, RunKind)> = tracker
        .list_runs()
        .into_iter()
        .map(|run| (run.id, run.kind))
        .collect();
    assert_eq!(kinds, vec![(listing, RunKind::Listing), (html, RunKind::Html)]);
}

#[test]
fn completing_unknown_run_fails() {
    let mut db = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteRunRepository::try_new(&mut db).unwrap();
        let err = repo.complete_run(404, 1, 0).unwrap_err();
        assert!(matches!(err, RepoError::RunNotFound(404)));
        assert!(repo.get_run(404).unwrap().is_none());
    }

    let mut tracker = RunTracker::sqlite(&mut db).unwrap();
    assert!(!tracker.complete_run(404, 1, 0));
    assert!(tracker.get_run(404).is_none());
}

#[test]
fn unknown_parser_type_is_reported_as_invalid_data() {
    let mut db = open_db_in_memory().unwrap();
    db.conn()
        .execute(
            "INSERT INTO parser_runs (parser_type, start_time) VALUES ('sitemap', 0);",
            [],
        )
        .unwrap();

    let repo = SqliteRunRepository::try_new(&mut db).unwrap();
    assert!(matches!(repo.list_runs(), Err(RepoError::InvalidData(_))));
}
