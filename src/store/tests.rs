use super::*;
use crate::limits::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("parkalloc_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn lot_with_spots(store: &Store, capacity: CategoryCounts, spots: &[(Category, SpotStatus)]) -> (Ulid, Vec<Ulid>) {
    let lot_id = Ulid::new();
    store.create_lot(lot_id, Some("Lot".into()), capacity).await.unwrap();
    let mut ids = Vec::new();
    for (i, (category, status)) in spots.iter().enumerate() {
        let id = Ulid::new();
        store
            .add_spot(id, lot_id, Some(format!("A{:03}", i + 1)), *category, *status)
            .await
            .unwrap();
        ids.push(id);
    }
    (lot_id, ids)
}

// ── Provisioning ─────────────────────────────────────────

#[tokio::test]
async fn create_and_read_lot() {
    let store = Store::open(test_wal_path("create_lot.wal")).unwrap();
    let id = Ulid::new();
    store
        .create_lot(id, Some("North".into()), CategoryCounts::new(40, 4, 6, 10))
        .await
        .unwrap();

    let lot = store.get_lot(id).await.unwrap();
    assert_eq!(lot.name.as_deref(), Some("North"));
    assert_eq!(lot.capacity, CategoryCounts::new(40, 4, 6, 10));
    assert_eq!(lot.allocated, CategoryCounts::default());
    assert_eq!(store.lot_count(), 1);
    assert_eq!(store.list_lots().await, vec![lot]);
}

#[tokio::test]
async fn duplicate_lot_rejected() {
    let store = Store::open(test_wal_path("dup_lot.wal")).unwrap();
    let id = Ulid::new();
    store.create_lot(id, None, CategoryCounts::default()).await.unwrap();
    let result = store.create_lot(id, None, CategoryCounts::default()).await;
    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn lot_name_too_long_rejected() {
    let store = Store::open(test_wal_path("long_name.wal")).unwrap();
    let result = store
        .create_lot(Ulid::new(), Some("x".repeat(MAX_NAME_LEN + 1)), CategoryCounts::default())
        .await;
    assert!(matches!(result, Err(StoreError::LimitExceeded(_))));
}

#[tokio::test]
async fn spot_on_missing_lot_fails() {
    let store = Store::open(test_wal_path("spot_missing_lot.wal")).unwrap();
    let result = store
        .add_spot(Ulid::new(), Ulid::new(), None, Category::General, SpotStatus::Free)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn vehicle_registration_and_category_change() {
    let store = Store::open(test_wal_path("vehicles.wal")).unwrap();
    let id = Ulid::new();
    store.register_vehicle(id, Category::Electric).await.unwrap();
    assert_eq!(store.vehicle_category(id).await.unwrap(), Category::Electric);

    store.set_vehicle_category(id, Category::Disabled).await.unwrap();
    assert_eq!(store.vehicle_category(id).await.unwrap(), Category::Disabled);

    assert!(matches!(
        store.register_vehicle(id, Category::General).await,
        Err(StoreError::AlreadyExists(_))
    ));
    assert!(matches!(
        store.set_vehicle_category(Ulid::new(), Category::General).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.vehicle_category(Ulid::new()).await,
        Err(StoreError::NotFound(_))
    ));
}

// ── Collaborator queries ─────────────────────────────────

#[tokio::test]
async fn get_lots_names_missing_id() {
    let store = Store::open(test_wal_path("get_lots.wal")).unwrap();
    let (left, _) = lot_with_spots(&store, CategoryCounts::default(), &[]).await;
    let missing = Ulid::new();

    let (l, r) = store.get_lots(left, left).await.unwrap();
    assert_eq!(l.id, r.id);

    match store.get_lots(left, missing).await {
        Err(StoreError::NotFound(id)) => assert_eq!(id, missing),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn find_free_spot_skips_occupied_and_reserved() {
    let store = Store::open(test_wal_path("find_free.wal")).unwrap();
    let (lot_id, ids) = lot_with_spots(
        &store,
        CategoryCounts::new(3, 0, 0, 0),
        &[
            (Category::General, SpotStatus::Occupied),
            (Category::General, SpotStatus::Reserved),
            (Category::General, SpotStatus::Free),
        ],
    )
    .await;

    let spot = store.find_free_spot(lot_id, Category::General).await.unwrap().unwrap();
    assert_eq!(spot.id, ids[2]);
    assert!(store.find_free_spot(lot_id, Category::Electric).await.unwrap().is_none());
}

// ── Commit path ──────────────────────────────────────────

#[tokio::test]
async fn commit_flips_spot_and_increments_counter() {
    let store = Store::open(test_wal_path("commit.wal")).unwrap();
    let (lot_id, ids) = lot_with_spots(
        &store,
        CategoryCounts::new(0, 2, 0, 0),
        &[(Category::Disabled, SpotStatus::Free)],
    )
    .await;

    let outcome = store
        .commit_allocation(lot_id, Category::Disabled, Some(ids[0]), CommitMode::Lenient)
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { spot_id: ids[0] });
    assert_eq!(store.get_spot(ids[0]).await.unwrap().status, SpotStatus::Occupied);
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.disabled, 1);
}

#[tokio::test]
async fn commit_retries_lookup_when_candidate_taken() {
    let store = Store::open(test_wal_path("commit_retry.wal")).unwrap();
    let (lot_id, ids) = lot_with_spots(
        &store,
        CategoryCounts::new(2, 0, 0, 0),
        &[
            (Category::General, SpotStatus::Free),
            (Category::General, SpotStatus::Free),
        ],
    )
    .await;
    store.set_spot_status(ids[0], SpotStatus::Occupied).await.unwrap();

    let outcome = store
        .commit_allocation(lot_id, Category::General, Some(ids[0]), CommitMode::Lenient)
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { spot_id: ids[1] });
}

#[tokio::test]
async fn commit_ignores_candidate_of_other_category() {
    let store = Store::open(test_wal_path("commit_wrong_cat.wal")).unwrap();
    let (lot_id, ids) = lot_with_spots(
        &store,
        CategoryCounts::new(1, 0, 1, 0),
        &[
            (Category::Electric, SpotStatus::Free),
            (Category::General, SpotStatus::Free),
        ],
    )
    .await;

    let outcome = store
        .commit_allocation(lot_id, Category::General, Some(ids[0]), CommitMode::Lenient)
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { spot_id: ids[1] });
    assert_eq!(store.get_spot(ids[0]).await.unwrap().status, SpotStatus::Free);
}

#[tokio::test]
async fn lenient_ghost_grows_counter_past_capacity() {
    let store = Store::open(test_wal_path("ghost.wal")).unwrap();
    let (lot_id, _) = lot_with_spots(&store, CategoryCounts::new(1, 0, 0, 0), &[]).await;

    for _ in 0..3 {
        let outcome = store
            .commit_allocation(lot_id, Category::General, None, CommitMode::Lenient)
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Ghost);
    }
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.general, 3);
}

#[tokio::test]
async fn strict_rejects_when_capacity_exhausted() {
    let store = Store::open(test_wal_path("strict_capacity.wal")).unwrap();
    let (lot_id, _) = lot_with_spots(
        &store,
        CategoryCounts::new(1, 0, 0, 0),
        &[
            (Category::General, SpotStatus::Free),
            (Category::General, SpotStatus::Free),
        ],
    )
    .await;

    let first = store
        .commit_allocation(lot_id, Category::General, None, CommitMode::Strict)
        .await
        .unwrap();
    assert!(matches!(first, CommitOutcome::Committed { .. }));

    let second = store
        .commit_allocation(lot_id, Category::General, None, CommitMode::Strict)
        .await
        .unwrap();
    assert_eq!(second, CommitOutcome::Rejected(NoSpotReason::CapacityExhausted));
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.general, 1);
}

#[tokio::test]
async fn strict_rejects_without_physical_spot() {
    let store = Store::open(test_wal_path("strict_no_row.wal")).unwrap();
    let (lot_id, _) = lot_with_spots(&store, CategoryCounts::new(5, 0, 0, 0), &[]).await;

    let outcome = store
        .commit_allocation(lot_id, Category::General, None, CommitMode::Strict)
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Rejected(NoSpotReason::NoPhysicalSpot));
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.general, 0);
}

#[tokio::test]
async fn commit_on_missing_lot_fails() {
    let store = Store::open(test_wal_path("commit_missing.wal")).unwrap();
    let result = store
        .commit_allocation(Ulid::new(), Category::General, None, CommitMode::Lenient)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn concurrent_commits_never_share_a_spot() {
    let store = Arc::new(Store::open(test_wal_path("race.wal")).unwrap());
    let (lot_id, ids) = lot_with_spots(
        &store,
        CategoryCounts::new(10, 0, 0, 0),
        &[(Category::General, SpotStatus::Free)],
    )
    .await;

    // Every caller saw the same single FREE spot before committing.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let candidate = ids[0];
        handles.push(tokio::spawn(async move {
            store
                .commit_allocation(lot_id, Category::General, Some(candidate), CommitMode::Lenient)
                .await
                .unwrap()
        }));
    }
    let mut committed = 0;
    let mut ghosts = 0;
    for h in handles {
        match h.await.unwrap() {
            CommitOutcome::Committed { spot_id } => {
                assert_eq!(spot_id, ids[0]);
                committed += 1;
            }
            CommitOutcome::Ghost => ghosts += 1,
            CommitOutcome::Rejected(r) => panic!("lenient commit rejected: {r:?}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(ghosts, 7);
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.general, 8);
}

// ── Device write path and read models ────────────────────

#[tokio::test]
async fn reset_occupancy_frees_everything() {
    let store = Store::open(test_wal_path("reset.wal")).unwrap();
    let (lot_id, ids) = lot_with_spots(
        &store,
        CategoryCounts::new(2, 0, 0, 1),
        &[
            (Category::General, SpotStatus::Free),
            (Category::Motorcycle, SpotStatus::Reserved),
        ],
    )
    .await;
    store
        .commit_allocation(lot_id, Category::General, None, CommitMode::Lenient)
        .await
        .unwrap();

    store.reset_occupancy(lot_id).await.unwrap();
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated, CategoryCounts::default());
    for id in ids {
        assert_eq!(store.get_spot(id).await.unwrap().status, SpotStatus::Free);
    }
}

#[tokio::test]
async fn set_status_on_unknown_spot_fails() {
    let store = Store::open(test_wal_path("status_unknown.wal")).unwrap();
    let result = store.set_spot_status(Ulid::new(), SpotStatus::Free).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

fn count_outcomes(results: Vec<Result<(), StoreError>>) -> (usize, usize) {
    let mut ok = 0;
    let mut duplicate = 0;
    for r in results {
        match r {
            Ok(()) => ok += 1,
            Err(StoreError::AlreadyExists(_)) => duplicate += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    (ok, duplicate)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_add_spot_same_id_lands_in_one_lot() {
    let store = Arc::new(Store::open(test_wal_path("dup_spot_race.wal")).unwrap());
    let mut lots = Vec::new();
    for _ in 0..4 {
        let lot_id = Ulid::new();
        store.create_lot(lot_id, None, CategoryCounts::new(5, 0, 0, 0)).await.unwrap();
        lots.push(lot_id);
    }

    let spot_id = Ulid::new();
    let mut handles = Vec::new();
    for lot_id in lots.clone() {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .add_spot(spot_id, lot_id, None, Category::General, SpotStatus::Free)
                .await
        }));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    assert_eq!(count_outcomes(results), (1, 3));

    let all = store.list_spots(SpotFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    let owner = store.get_spot(spot_id).await.unwrap().lot_id;
    assert_eq!(all[0].lot_id, owner);

    // The index and the owning lot agree, so status writes reach the spot.
    assert_eq!(store.set_spot_status(spot_id, SpotStatus::Reserved).await.unwrap(), owner);
    assert_eq!(store.get_spot(spot_id).await.unwrap().status, SpotStatus::Reserved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_lot_same_id_writes_once() {
    let path = test_wal_path("dup_lot_race.wal");
    let store = Arc::new(Store::open(path.clone()).unwrap());
    let id = Ulid::new();
    let mut handles = Vec::new();
    for i in 0..6u32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_lot(id, Some(format!("Lot {i}")), CategoryCounts::new(i + 1, 0, 0, 0))
                .await
        }));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    assert_eq!(count_outcomes(results), (1, 5));
    let live = store.get_lot(id).await.unwrap();
    drop(store);

    // Replay sees exactly the lot that won.
    let reopened = Store::open(path).unwrap();
    assert_eq!(reopened.lot_count(), 1);
    assert_eq!(reopened.get_lot(id).await.unwrap(), live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_register_vehicle_same_id_keeps_one_category() {
    let path = test_wal_path("dup_vehicle_race.wal");
    let store = Arc::new(Store::open(path.clone()).unwrap());
    let id = Ulid::new();
    let mut handles = Vec::new();
    for category in Category::ALL {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.register_vehicle(id, category).await }));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    assert_eq!(count_outcomes(results), (1, 3));
    let category = store.get_vehicle_category(&id).unwrap();
    drop(store);

    let reopened = Store::open(path).unwrap();
    assert_eq!(reopened.vehicle_count(), 1);
    assert_eq!(reopened.get_vehicle_category(&id).unwrap(), category);
}

#[tokio::test]
async fn duplicate_id_free_again_after_failed_provisioning() {
    let store = Store::open(test_wal_path("dup_after_fail.wal")).unwrap();
    let spot_id = Ulid::new();
    let missing_lot = Ulid::new();
    let result = store
        .add_spot(spot_id, missing_lot, None, Category::General, SpotStatus::Free)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    // The failed call released its claim on the id.
    let (lot_id, _) = lot_with_spots(&store, CategoryCounts::new(1, 0, 0, 0), &[]).await;
    store
        .add_spot(spot_id, lot_id, None, Category::General, SpotStatus::Free)
        .await
        .unwrap();
    assert_eq!(store.get_spot(spot_id).await.unwrap().lot_id, lot_id);
}

#[tokio::test]
async fn list_spots_filters() {
    let store = Store::open(test_wal_path("list_spots.wal")).unwrap();
    let (a, _) = lot_with_spots(
        &store,
        CategoryCounts::default(),
        &[
            (Category::General, SpotStatus::Free),
            (Category::Electric, SpotStatus::Occupied),
        ],
    )
    .await;
    let (_b, _) = lot_with_spots(
        &store,
        CategoryCounts::default(),
        &[(Category::General, SpotStatus::Occupied)],
    )
    .await;

    assert_eq!(store.list_spots(SpotFilter::default()).await.unwrap().len(), 3);
    let in_a = store
        .list_spots(SpotFilter {
            lot_id: Some(a),
            ..SpotFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(in_a.len(), 2);
    let occupied_general = store
        .list_spots(SpotFilter {
            category: Some(Category::General),
            status: Some(SpotStatus::Occupied),
            ..SpotFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(occupied_general.len(), 1);
    assert!(matches!(
        store
            .list_spots(SpotFilter {
                lot_id: Some(Ulid::new()),
                ..SpotFilter::default()
            })
            .await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn occupancy_stats_counts_by_status_and_category() {
    let store = Store::open(test_wal_path("stats.wal")).unwrap();
    assert_eq!(store.occupancy_stats().await.occupancy_rate, 0.0);

    lot_with_spots(
        &store,
        CategoryCounts::default(),
        &[
            (Category::General, SpotStatus::Free),
            (Category::General, SpotStatus::Occupied),
            (Category::Disabled, SpotStatus::Reserved),
            (Category::Electric, SpotStatus::Occupied),
        ],
    )
    .await;

    let stats = store.occupancy_stats().await;
    assert_eq!((stats.total, stats.free, stats.occupied, stats.reserved), (4, 1, 2, 1));
    assert_eq!(stats.by_category, CategoryCounts::new(2, 1, 1, 0));
    assert_eq!(stats.occupancy_rate, 50.0);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_counters_spots_and_vehicles() {
    let path = test_wal_path("replay.wal");
    let vehicle = Ulid::new();
    let (lot_id, ids) = {
        let store = Store::open(path.clone()).unwrap();
        let (lot_id, ids) = lot_with_spots(
            &store,
            CategoryCounts::new(2, 1, 0, 0),
            &[
                (Category::General, SpotStatus::Free),
                (Category::Disabled, SpotStatus::Free),
            ],
        )
        .await;
        store.register_vehicle(vehicle, Category::Disabled).await.unwrap();
        store
            .commit_allocation(lot_id, Category::Disabled, Some(ids[1]), CommitMode::Lenient)
            .await
            .unwrap();
        store
            .commit_allocation(lot_id, Category::General, None, CommitMode::Lenient)
            .await
            .unwrap();
        (lot_id, ids)
    };

    let store = Store::open(path).unwrap();
    let lot = store.get_lot(lot_id).await.unwrap();
    assert_eq!(lot.allocated, CategoryCounts::new(1, 1, 0, 0));
    assert_eq!(store.get_spot(ids[0]).await.unwrap().status, SpotStatus::Occupied);
    assert_eq!(store.get_spot(ids[1]).await.unwrap().status, SpotStatus::Occupied);
    assert_eq!(store.get_vehicle_category(&vehicle), Some(Category::Disabled));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let vehicle = Ulid::new();
    let (lot_id, ids) = {
        let store = Store::open(path.clone()).unwrap();
        let (lot_id, ids) = lot_with_spots(
            &store,
            CategoryCounts::new(3, 0, 0, 0),
            &[
                (Category::General, SpotStatus::Free),
                (Category::General, SpotStatus::Reserved),
            ],
        )
        .await;
        store.register_vehicle(vehicle, Category::General).await.unwrap();
        for _ in 0..10 {
            store.set_spot_status(ids[1], SpotStatus::Free).await.unwrap();
            store.set_spot_status(ids[1], SpotStatus::Reserved).await.unwrap();
        }
        store
            .commit_allocation(lot_id, Category::General, None, CommitMode::Lenient)
            .await
            .unwrap();
        store
            .commit_allocation(lot_id, Category::General, None, CommitMode::Lenient)
            .await
            .unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        store.compact_wal().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        (lot_id, ids)
    };

    let store = Store::open(path).unwrap();
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.general, 2);
    assert_eq!(store.get_spot(ids[0]).await.unwrap().status, SpotStatus::Occupied);
    assert_eq!(store.get_spot(ids[1]).await.unwrap().status, SpotStatus::Reserved);
    assert_eq!(store.get_vehicle_category(&vehicle), Some(Category::General));
}

#[tokio::test]
async fn appends_after_compaction_survive_replay() {
    let path = test_wal_path("compact_then_append.wal");
    let lot_id = {
        let store = Store::open(path.clone()).unwrap();
        let (lot_id, _) = lot_with_spots(&store, CategoryCounts::new(5, 0, 0, 0), &[]).await;
        store.compact_wal().await.unwrap();
        store
            .commit_allocation(lot_id, Category::General, None, CommitMode::Lenient)
            .await
            .unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 1);
        lot_id
    };

    let store = Store::open(path).unwrap();
    assert_eq!(store.get_lot(lot_id).await.unwrap().allocated.general, 1);
}
