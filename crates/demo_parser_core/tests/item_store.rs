use demo_parser_core::{
    open_db, open_db_in_memory, Database, DetailRecord, ItemListQuery, ItemRepository, ItemStatus,
    ItemStore, ListingRecord, Price, RecordValidationError, RepoError, RunKind, RunTracker,
    SqliteItemRepository, UpsertOutcome,
};
use serde_json::json;

fn listing(item_id: &str, brand: &str, price_units: i64) -> ListingRecord {
    let mut record = ListingRecord::new(
        item_id,
        json!({ "id": item_id, "brand": brand, "price": format!("${price_units}") }),
    );
    record.title = Some(format!("{brand} {item_id}"));
    record.url = Some(format!("https://cars.example/{item_id}"));
    record.brand = Some(brand.to_string());
    record.category = Some("sedan".to_string());
    record.price = Price::from_units(price_units);
    record
}

fn detail(item_id: &str) -> DetailRecord {
    let mut record = DetailRecord::new(item_id, json!({ "id": item_id, "mileage": 42_000 }));
    record.detail_html = Some(format!("<div id=\"{item_id}\">detail</div>"));
    record
}

#[test]
fn saving_same_listing_twice_keeps_one_row() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    let mut record = listing("car_1", "Toyota", 23_456);
    assert!(store.save_listing(&record));
    let first = store.get_item("car_1").unwrap();

    record.title = Some("Toyota Camry".to_string());
    assert!(store.save_listing(&record));

    let stats = store.get_statistics();
    assert_eq!(stats.total, 1);
    let second = store.get_item("car_1").unwrap();
    assert_eq!(second.row_id, first.row_id);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.title.as_deref(), Some("Toyota Camry"));
    assert_eq!(second.status, ItemStatus::Processed);
    assert_eq!(second.price, Price::from_units(23_456));
}

#[test]
fn repository_reports_created_then_updated() {
    let mut db = open_db_in_memory().unwrap();
    let mut repo = SqliteItemRepository::try_new(&mut db).unwrap();

    let record = listing("car_1", "Honda", 10_000);
    assert_eq!(repo.upsert_listing(&record).unwrap(), UpsertOutcome::Created);
    assert_eq!(repo.upsert_listing(&record).unwrap(), UpsertOutcome::Updated);
    assert_eq!(repo.upsert_detail(&detail("car_1")).unwrap(), UpsertOutcome::Updated);
    assert_eq!(repo.upsert_detail(&detail("car_2")).unwrap(), UpsertOutcome::Created);
}

#[test]
fn listing_and_detail_merge_without_overwriting() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    assert!(store.save_listing(&listing("car_1", "BMW", 41_000)));
    assert!(store.save_detail(&detail("car_1")));

    let merged = store.get_item("car_1").unwrap();
    assert_eq!(merged.brand.as_deref(), Some("BMW"));
    assert_eq!(merged.title.as_deref(), Some("BMW car_1"));
    assert_eq!(merged.price, Price::from_units(41_000));
    assert!(merged.has_listing());
    assert!(merged.has_detail());
    assert_eq!(merged.detail_payload.unwrap()["mileage"], json!(42_000));

    // A later listing write must not erase detail fields.
    let mut partial = ListingRecord::new("car_1", json!({ "id": "car_1", "seen": 2 }));
    partial.price = Price::from_units(39_000);
    assert!(store.save_listing(&partial));

    let after = store.get_item("car_1").unwrap();
    assert_eq!(after.brand.as_deref(), Some("BMW"));
    assert_eq!(after.title.as_deref(), Some("BMW car_1"));
    assert_eq!(after.price, Price::from_units(39_000));
    assert_eq!(after.listing_payload.unwrap()["seen"], json!(2));
    assert!(after.detail_html.is_some());
    assert!(after.detail_payload.is_some());
}

#[test]
fn detail_for_unknown_item_creates_bare_row() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    let mut record = detail("car_9");
    record.title = Some("Audi A4".to_string());
    record.url = Some("https://cars.example/car_9".to_string());
    assert!(store.save_detail(&record));

    let item = store.get_item("car_9").unwrap();
    assert_eq!(item.title.as_deref(), Some("Audi A4"));
    assert_eq!(item.url.as_deref(), Some("https://cars.example/car_9"));
    assert!(!item.has_listing());
    assert!(item.has_detail());
    assert_eq!(item.status, ItemStatus::Processed);
}

#[test]
fn batch_save_tolerates_invalid_records() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    let mut oversized = listing("car_2", "Kia", 9_000);
    oversized.title = Some("x".repeat(501));
    let records = vec![
        listing("car_1", "Kia", 8_000),
        oversized,
        ListingRecord::new("   ", json!({})),
        listing("car_3", "Kia", 10_000),
    ];

    assert_eq!(store.save_listings_batch(&records), 2);
    assert_eq!(store.get_statistics().total, 2);
    assert!(store.get_item("car_2").is_none());

    let details = vec![detail("car_1"), DetailRecord::new("car_3", json!([1, 2]))];
    assert_eq!(store.save_details_batch(&details), 1);
}

#[test]
fn repository_surfaces_validation_errors() {
    let mut db = open_db_in_memory().unwrap();
    let mut repo = SqliteItemRepository::try_new(&mut db).unwrap();

    let err = repo
        .upsert_listing(&ListingRecord::new("", json!({})))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(RecordValidationError::EmptyItemId)));

    let mut negative = listing("car_1", "Ford", 1);
    negative.price = Some(Price::from_cents(-100));
    let err = repo.upsert_listing(&negative).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(RecordValidationError::NegativePrice(_))
    ));
    assert_eq!(err.code(), "validation_failed");
}

#[test]
fn work_queues_exclude_completed_stages() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    for index in 1..=5 {
        assert!(store.save_listing(&listing(&format!("car_{index}"), "Mazda", 5_000)));
    }
    assert!(store.save_detail(&detail("car_2")));
    assert!(store.save_detail(&detail("car_4")));

    let pending: Vec<String> = store
        .get_items_for_details(10)
        .into_iter()
        .map(|item| item.item_id)
        .collect();
    assert_eq!(pending, vec!["car_1", "car_3", "car_5"]);

    let limited: Vec<String> = store
        .get_items_for_details(2)
        .into_iter()
        .map(|item| item.item_id)
        .collect();
    assert_eq!(limited, vec!["car_1", "car_3"]);

    assert!(store.save_html_content("car_1", "<html>1</html>", None));
    assert!(store.save_html_content("car_3", "<html>3</html>", Some("https://cars.example/3")));
    let html_pending: Vec<String> = store
        .get_items_for_html(100)
        .into_iter()
        .map(|item| item.item_id)
        .collect();
    assert_eq!(html_pending, vec!["car_2", "car_4", "car_5"]);
    assert!(store.get_items_for_html(0).is_empty());
}

#[test]
fn save_html_content_sets_url_and_creates_missing_rows() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    assert!(store.save_listing(&listing("car_1", "Volvo", 30_000)));
    assert!(store.save_html_content("car_1", "<html>volvo</html>", Some("")));
    let kept = store.get_item("car_1").unwrap();
    assert_eq!(kept.url.as_deref(), Some("https://cars.example/car_1"));
    assert_eq!(kept.html_content.as_deref(), Some("<html>volvo</html>"));

    assert!(store.save_html_content("car_1", "<html>v2</html>", Some("https://m.cars.example/1")));
    let replaced = store.get_item("car_1").unwrap();
    assert_eq!(replaced.url.as_deref(), Some("https://m.cars.example/1"));
    assert_eq!(replaced.html_content.as_deref(), Some("<html>v2</html>"));
    assert_eq!(replaced.brand.as_deref(), Some("Volvo"));

    assert!(store.save_html_content("car_7", "<html>new</html>", Some("https://cars.example/7")));
    let created = store.get_item("car_7").unwrap();
    assert!(created.has_html_content());
    assert!(!created.has_listing());
    assert_eq!(created.status, ItemStatus::Processed);

    assert!(!store.save_html_content("", "<html></html>", None));
}

#[test]
fn update_status_marks_failures_and_sets_processed_at() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    assert!(store.save_listing(&listing("car_1", "Fiat", 4_000)));
    assert!(store.get_item("car_1").unwrap().processed_at.is_none());

    assert!(store.update_status("car_1", ItemStatus::Failed, Some("timeout")));
    let failed = store.get_item("car_1").unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("timeout"));
    assert!(failed.processed_at.is_some());

    assert!(store.update_status("car_1", ItemStatus::New, None));
    let reset = store.get_item("car_1").unwrap();
    assert_eq!(reset.status, ItemStatus::New);
    assert_eq!(reset.error_message.as_deref(), Some("timeout"));

    assert!(!store.update_status("car_404", ItemStatus::Failed, None));
}

#[test]
fn statistics_count_statuses_and_rank_brands() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    let empty = store.get_statistics();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.success_rate, 0.0);
    assert!(empty.top_brands.is_empty());

    let brands = ["Toyota", "Toyota", "Toyota", "BMW", "BMW", "Audi"];
    for (index, brand) in brands.iter().enumerate() {
        assert!(store.save_listing(&listing(&format!("car_{index}"), brand, 1_000)));
    }
    assert!(store.save_listing(&ListingRecord::new("car_nobrand", json!({ "id": 7 }))));
    assert!(store.update_status("car_0", ItemStatus::Failed, Some("blocked")));
    assert!(store.update_status("car_1", ItemStatus::New, None));

    let stats = store.get_statistics();
    assert_eq!(stats.total, 7);
    assert_eq!(stats.by_status.processed, 5);
    assert_eq!(stats.by_status.failed, 1);
    assert_eq!(stats.by_status.new, 1);
    assert!((stats.success_rate - 5.0 / 7.0 * 100.0).abs() < 1e-9);

    let ranked: Vec<(&str, u64)> = stats
        .top_brands
        .iter()
        .map(|entry| (entry.brand.as_str(), entry.count))
        .collect();
    assert_eq!(ranked, vec![("Toyota", 3), ("BMW", 2), ("Audi", 1)]);
}

#[test]
fn statistics_report_full_success_when_all_processed() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    assert!(store.save_listing(&listing("car_1", "Toyota", 20_000)));
    assert!(store.save_listing(&listing("car_2", "Honda", 18_000)));
    assert!(store.save_listing(&listing("car_3", "Toyota", 22_000)));

    let stats = store.get_statistics();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status.processed, 3);
    assert_eq!(stats.by_status.new, 0);
    assert_eq!(stats.by_status.failed, 0);
    assert_eq!(stats.success_rate, 100.0);
    assert_eq!(stats.top_brands[0].brand, "Toyota");
    assert_eq!(stats.top_brands[0].count, 2);
    assert_eq!(stats.top_brands[1].brand, "Honda");
    assert_eq!(stats.top_brands[1].count, 1);
}

#[test]
fn top_brands_are_capped_at_ten() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    for index in 0..12 {
        assert!(store.save_listing(&listing(
            &format!("car_{index}"),
            &format!("Brand{index:02}"),
            1_000
        )));
    }

    let stats = store.get_statistics();
    assert_eq!(stats.top_brands.len(), 10);
    assert_eq!(stats.top_brands[0].brand, "Brand00");
}

#[test]
fn list_items_filters_by_brand_status_and_price() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    assert!(store.save_listing(&listing("car_1", "Toyota", 15_000)));
    assert!(store.save_listing(&listing("car_2", "toyota", 25_000)));
    assert!(store.save_listing(&listing("car_3", "Honda", 20_000)));
    assert!(store.save_listing(&ListingRecord::new("car_4", json!({ "id": "car_4" }))));
    assert!(store.update_status("car_2", ItemStatus::Failed, None));

    let ids = |query: &ItemListQuery| -> Vec<String> {
        store
            .list_items(query)
            .into_iter()
            .map(|item| item.item_id)
            .collect()
    };

    let by_brand = ItemListQuery {
        brand: Some("TOYOTA".to_string()),
        ..ItemListQuery::default()
    };
    assert_eq!(ids(&by_brand), vec!["car_1", "car_2"]);

    let by_status = ItemListQuery {
        status: Some(ItemStatus::Failed),
        ..ItemListQuery::default()
    };
    assert_eq!(ids(&by_status), vec!["car_2"]);

    let by_price = ItemListQuery {
        min_price: Price::from_units(16_000),
        max_price: Price::from_units(25_000),
        ..ItemListQuery::default()
    };
    assert_eq!(ids(&by_price), vec!["car_2", "car_3"]);

    let paged = ItemListQuery {
        limit: Some(2),
        offset: 1,
        ..ItemListQuery::default()
    };
    assert_eq!(ids(&paged), vec!["car_2", "car_3"]);

    let offset_only = ItemListQuery {
        offset: 3,
        ..ItemListQuery::default()
    };
    assert_eq!(ids(&offset_only), vec!["car_4"]);
}

#[test]
fn list_items_filters_by_detail_year() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    for (item_id, year) in [("car_1", json!(2016)), ("car_2", json!(2019)), ("car_3", json!(2023))] {
        assert!(store.save_listing(&listing(item_id, "Skoda", 12_000)));
        let record = DetailRecord::new(item_id, json!({ "id": item_id, "year": year }));
        assert!(store.save_detail(&record));
    }
    let odd_year = DetailRecord::new("car_4", json!({ "id": "car_4", "year": "2019" }));
    assert!(store.save_detail(&odd_year));
    assert!(store.save_listing(&listing("car_5", "Skoda", 12_000)));

    let query = ItemListQuery {
        min_year: Some(2017),
        max_year: Some(2023),
        ..ItemListQuery::default()
    };
    let ids: Vec<String> = store
        .list_items(&query)
        .into_iter()
        .map(|item| item.item_id)
        .collect();
    assert_eq!(ids, vec!["car_2", "car_3"]);

    let up_to = ItemListQuery {
        max_year: Some(2016),
        ..ItemListQuery::default()
    };
    assert_eq!(store.list_items(&up_to).len(), 1);
}

#[test]
fn clear_all_removes_items_and_runs() {
    let mut db = open_db_in_memory().unwrap();
    {
        let mut tracker = RunTracker::sqlite(&mut db).unwrap();
        let run = tracker.start_run(RunKind::Listing, 3).unwrap();
        assert!(tracker.complete_run(run, 3, 0));
    }

    let mut store = ItemStore::sqlite(&mut db).unwrap();
    for index in 0..3 {
        assert!(store.save_listing(&listing(&format!("car_{index}"), "Seat", 2_000)));
    }
    assert!(store.save_detail(&detail("car_0")));
    assert!(store.save_html_content("car_0", "<html>0</html>", None));

    assert_eq!(store.clear_all(), 3);
    assert_eq!(store.get_statistics().total, 0);
    assert!(store.get_items_for_details(10).is_empty());
    assert_eq!(store.clear_all(), 0);
    drop(store);

    let tracker = RunTracker::sqlite(&mut db).unwrap();
    assert!(tracker.list_runs().is_empty());

    let mut store = ItemStore::sqlite(&mut db).unwrap();
    assert!(store.save_listing(&listing("car_0", "Seat", 2_000)));
    assert_eq!(store.get_statistics().total, 1);

    let resaved = store.get_item("car_0").unwrap();
    assert!(resaved.has_listing());
    assert!(resaved.detail_payload.is_none());
    assert!(resaved.detail_html.is_none());
    assert!(resaved.html_content.is_none());
    let pending: Vec<String> = store
        .get_items_for_details(10)
        .into_iter()
        .map(|item| item.item_id)
        .collect();
    assert_eq!(pending, vec!["car_0"]);
}

#[test]
fn store_info_describes_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("info.db");
    let mut db = open_db(&path).unwrap();
    let store = ItemStore::sqlite(&mut db).unwrap();

    let info = store.get_store_info().unwrap();
    assert_eq!(info.backend_kind, "sqlite");
    assert_eq!(info.location, path.display().to_string());
    assert!(info.size_bytes > 0);
    assert!(info.size_mb() >= 0.0);
    assert!(info.tables.iter().any(|table| table == "items"));
    assert!(info.tables.iter().any(|table| table == "parser_runs"));
    assert!(info.tables.iter().any(|table| table == "schema_migrations"));

    let mut memory = open_db_in_memory().unwrap();
    let memory_store = ItemStore::sqlite(&mut memory).unwrap();
    let memory_info = memory_store.get_store_info().unwrap();
    assert_eq!(memory_info.location, ":memory:");
    assert!(memory_info.size_bytes > 0);
}

#[test]
fn raw_payloads_round_trip_through_store() {
    let mut db = open_db_in_memory().unwrap();
    let mut store = ItemStore::sqlite(&mut db).unwrap();

    let raw_listing = json!({
        "id": "car_12",
        "title": "Toyota Camry 2019",
        "url": "https://cars.example/car_12",
        "brand": "Toyota",
        "category": "sedan",
        "price": "$23,456",
        "html_content": "<div class=\"card\">car_12</div>",
    });
    let raw_detail = json!({
        "id": "car_12",
        "price_numeric": 23456.5,
        "page_html": "<html>car_12</html>",
        "specs": { "engine": "2.5L" },
    });

    assert!(store.save_listing(&ListingRecord::from_payload(raw_listing.clone()).unwrap()));
    assert!(store.save_detail(&DetailRecord::from_payload(raw_detail.clone()).unwrap()));

    let item = store.get_item("car_12").unwrap();
    assert_eq!(item.price, Some(Price::from_cents(2_345_600)));
    assert_eq!(item.listing_html.as_deref(), Some("<div class=\"card\">car_12</div>"));
    assert_eq!(item.detail_html.as_deref(), Some("<html>car_12</html>"));
    assert_eq!(item.listing_payload, Some(raw_listing));
    assert_eq!(item.detail_payload, Some(raw_detail));
}

#[test]
fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");

    {
        let mut db = open_db(&path).unwrap();
        let mut store = ItemStore::sqlite(&mut db).unwrap();
        assert!(store.save_listing(&listing("car_1", "Lada", 3_000)));
    }

    let mut db: Database = open_db(&path).unwrap();
    let store = ItemStore::sqlite(&mut db).unwrap();
    let item = store.get_item("car_1").unwrap();
    assert_eq!(item.brand.as_deref(), Some("Lada"));
    assert_eq!(item.price, Price::from_units(3_000));
}

#[test]
fn repository_requires_migrated_schema() {
    let mut db = Database::connect(demo_parser_core::DbLocation::Memory).unwrap();
    let result = SqliteItemRepository::try_new(&mut db);
    assert!(matches!(result, Err(RepoError::MissingRequiredTable("items"))));
}
