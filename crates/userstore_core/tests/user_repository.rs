mod common;

use common::{jake, repo, user};
use userstore_core::db::{open_store_db, open_store_db_in_memory};
use userstore_core::{
    diff_users, EmailProjection, FieldChange, FieldValue, Key, KeyValueStore, KvUserRepository,
    RepoError, SqliteKvStore, StoreConfig, StoreError, TableNames, UpdateOutcome, User, UserDiff,
    UserField, UserRepository,
};

fn input_error(err: &RepoError) -> (&'static str, &str) {
    let input = err
        .input_error()
        .unwrap_or_else(|| panic!("expected input error, got {err:?}"));
    (input.field, input.message.as_str())
}

#[test]
fn created_user_is_visible_by_username_and_email() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);

    repo.create_user(&jake()).unwrap();

    let by_username = repo.get_user_by_username("jake").unwrap();
    let by_email = repo.get_user_by_email("jake@jake.jake").unwrap();
    assert_eq!(by_username, jake());
    assert_eq!(by_email, by_username);
    assert_eq!(repo.store().transactions(), 1);
    assert_eq!(repo.store().write_ops(), 2);
}

#[test]
fn duplicate_username_is_rejected_without_reserving_the_email() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    repo.create_user(&jake()).unwrap();

    let err = repo
        .create_user(&user("jake", "other@jake.jake"))
        .unwrap_err();

    assert_eq!(input_error(&err), ("username", "has already been taken"));
    assert!(err.input_error().unwrap().is_taken());
    let lookup = repo.get_user_by_email("other@jake.jake").unwrap_err();
    assert_eq!(input_error(&lookup), ("email", "not found"));
    assert_eq!(
        repo.get_user_by_username("jake").unwrap().email,
        "jake@jake.jake"
    );
}

#[test]
fn duplicate_email_is_rejected_and_user_record_rolled_back() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    repo.create_user(&jake()).unwrap();

    let err = repo
        .create_user(&user("celeb_jake", "jake@jake.jake"))
        .unwrap_err();

    assert_eq!(input_error(&err), ("email", "has already been taken"));
    let lookup = repo.get_user_by_username("celeb_jake").unwrap_err();
    assert_eq!(input_error(&lookup), ("username", "not found"));
    assert_eq!(
        repo.get_user_by_email("jake@jake.jake").unwrap().username,
        "jake"
    );
}

#[test]
fn invalid_user_is_rejected_before_any_store_call() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);

    let err = repo.create_user(&user("", "jake@jake.jake")).unwrap_err();
    assert_eq!(input_error(&err), ("username", "can't be blank"));
    let err = repo.create_user(&user("jake", "not-an-email")).unwrap_err();
    assert_eq!(input_error(&err), ("email", "is invalid"));
    let err = repo
        .create_user(&User::new("jake", "jake@jake.jake", Vec::<u8>::new()))
        .unwrap_err();
    assert_eq!(input_error(&err).0, "password");

    assert_eq!(repo.store().transactions(), 0);
}

#[test]
fn blank_lookups_are_input_errors() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);

    let err = repo.get_user_by_username("  ").unwrap_err();
    assert_eq!(input_error(&err), ("username", "can't be blank"));
    let err = repo.get_user_by_email("").unwrap_err();
    assert_eq!(input_error(&err), ("email", "can't be blank"));
    assert_eq!(repo.store().gets(), 0);
}

#[test]
fn bio_only_update_sets_exactly_the_bio() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();
    repo.create_user(&old).unwrap();

    let mut new = old.clone();
    new.bio = Some("I like to skateboard".to_string());
    assert_eq!(
        diff_users(&old, &new),
        UserDiff::Changed(vec![FieldChange::Set(
            UserField::Bio,
            FieldValue::Text("I like to skateboard".to_string())
        )])
    );

    let outcome = repo.update_user(&old, &new).unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Applied {
            changed_fields: vec![UserField::Bio],
            email_relinked: false,
        }
    );
    assert_eq!(repo.store().write_ops(), 3);

    let stored = repo.get_user_by_username("jake").unwrap();
    assert_eq!(stored.bio(), Some("I like to skateboard"));
    assert_eq!(stored.email, old.email);
    assert_eq!(stored.image, old.image);
    assert_eq!(stored.password_hash, old.password_hash);
}

#[test]
fn clearing_bio_removes_the_attribute() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let mut old = jake();
    old.bio = Some("x".to_string());
    repo.create_user(&old).unwrap();

    let mut new = old.clone();
    new.bio = Some(String::new());
    assert_eq!(
        diff_users(&old, &new).changes(),
        &[FieldChange::Remove(UserField::Bio)]
    );
    repo.update_user(&old, &new).unwrap();

    assert_eq!(repo.get_user_by_username("jake").unwrap().bio, None);
    let item = repo
        .store()
        .get_item("users", &Key::new("Username", "jake"))
        .unwrap()
        .unwrap();
    assert!(!item.contains_key("Bio"));
    assert!(item.contains_key("Image"));
}

#[test]
fn email_change_moves_the_projection_atomically() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();
    repo.create_user(&old).unwrap();

    let mut new = old.clone();
    new.email = "jake@new.example".to_string();
    let outcome = repo.update_user(&old, &new).unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Applied {
            changed_fields: vec![UserField::Email],
            email_relinked: true,
        }
    );
    assert_eq!(repo.store().transactions(), 2);

    let err = repo.get_user_by_email("jake@jake.jake").unwrap_err();
    assert!(err.input_error().unwrap().is_not_found());
    let by_email = repo.get_user_by_email("jake@new.example").unwrap();
    assert_eq!(by_email, repo.get_user_by_username("jake").unwrap());
    assert_eq!(by_email.email, "jake@new.example");
}

#[test]
fn failure_between_projection_writes_leaves_no_split_state() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();
    repo.create_user(&old).unwrap();

    conn.execute_batch(
        "CREATE TRIGGER fail_email_release
         BEFORE DELETE ON kv_items
         WHEN OLD.table_name = 'email_users'
         BEGIN
             SELECT RAISE(ABORT, 'injected failure');
         END;",
    )
    .unwrap();

    let mut new = old.clone();
    new.email = "jake@new.example".to_string();
    let err = repo.update_user(&old, &new).unwrap_err();
    assert!(matches!(err, RepoError::Store(StoreError::Db(_))));

    let err = repo.get_user_by_email("jake@new.example").unwrap_err();
    assert!(err.input_error().unwrap().is_not_found());
    assert_eq!(repo.get_user_by_email("jake@jake.jake").unwrap(), old);
    assert_eq!(repo.get_user_by_username("jake").unwrap().email, old.email);

    conn.execute_batch("DROP TRIGGER fail_email_release;").unwrap();
    repo.update_user(&old, &new).unwrap();
    assert_eq!(repo.get_user_by_email("jake@new.example").unwrap(), new);
}

#[test]
fn update_without_differences_performs_no_store_writes() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();
    repo.create_user(&old).unwrap();
    let before = repo.store().transactions();

    let mut new = old.clone();
    new.password_hash = Vec::new();
    assert_eq!(repo.update_user(&old, &new).unwrap(), UpdateOutcome::Unchanged);
    assert_eq!(repo.update_user(&old, &old).unwrap(), UpdateOutcome::Unchanged);

    assert_eq!(repo.store().transactions(), before);
    assert_eq!(repo.store().gets(), 0);
}

#[test]
fn batch_fetch_keeps_input_order_and_multiplicity() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let a = user("a", "a@example.com");
    repo.create_user(&a).unwrap();

    let names = vec!["a".to_string(), "a".to_string(), "b".to_string()];
    let found = repo.get_users_by_usernames(&names).unwrap();

    assert_eq!(found, vec![a.clone(), a, User::default()]);
    assert_eq!(repo.store().batch_gets(), 1);
}

#[test]
fn batch_fetch_beyond_variable_limit_is_paged() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let a = user("a", "a@example.com");
    repo.create_user(&a).unwrap();

    let mut names: Vec<String> = (0..40_000).map(|n| format!("ghost{n}")).collect();
    names.push("a".to_string());
    let found = repo.get_users_by_usernames(&names).unwrap();

    assert_eq!(found.len(), names.len());
    assert_eq!(found.last(), Some(&a));
    assert_eq!(found[0], User::default());
    assert_eq!(repo.store().batch_gets(), 1);
}

#[test]
fn empty_batch_fetch_skips_the_store() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);

    assert!(repo.get_users_by_usernames(&[]).unwrap().is_empty());
    assert_eq!(repo.store().batch_gets(), 0);
}

#[test]
fn dangling_projection_is_reported_not_masked() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    repo.store()
        .transact(&[EmailProjection::new("email_users").reserve("ghost@jake.jake", "ghost")])
        .unwrap();

    let err = repo.get_user_by_email("ghost@jake.jake").unwrap_err();
    match err {
        RepoError::DanglingReference { email, username } => {
            assert_eq!(email, "ghost@jake.jake");
            assert_eq!(username, "ghost");
        }
        other => panic!("expected dangling reference, got {other:?}"),
    }
}

#[test]
fn update_to_taken_email_is_a_conflict() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();
    repo.create_user(&old).unwrap();
    repo.create_user(&user("celeb_jake", "celeb@jake.jake"))
        .unwrap();

    let mut new = old.clone();
    new.email = "celeb@jake.jake".to_string();
    new.bio = Some("changed".to_string());
    let err = repo.update_user(&old, &new).unwrap_err();

    assert_eq!(input_error(&err), ("email", "has already been taken"));
    assert!(!err.is_retryable());
    assert_eq!(repo.get_user_by_username("jake").unwrap(), old);
    assert_eq!(
        repo.get_user_by_email("celeb@jake.jake").unwrap().username,
        "celeb_jake"
    );
}

#[test]
fn username_cannot_change_through_update() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();

    let mut new = old.clone();
    new.username = "jacob".to_string();
    let err = repo.update_user(&old, &new).unwrap_err();

    assert_eq!(input_error(&err), ("username", "can't be changed"));
    assert_eq!(repo.store().transactions(), 0);
}

#[test]
fn update_from_stale_snapshot_fails_instead_of_overwriting() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let snapshot = jake();
    repo.create_user(&snapshot).unwrap();

    let mut first = snapshot.clone();
    first.bio = Some("first writer".to_string());
    repo.update_user(&snapshot, &first).unwrap();

    let mut second = snapshot.clone();
    second.bio = Some("second writer".to_string());
    let err = repo.update_user(&snapshot, &second).unwrap_err();
    assert!(matches!(err, RepoError::StaleSnapshot));
    assert!(err.is_retryable());
    assert_eq!(
        repo.get_user_by_username("jake").unwrap().bio(),
        Some("first writer")
    );

    let fresh = repo.get_user_by_username("jake").unwrap();
    let mut retry = fresh.clone();
    retry.bio = Some("second writer".to_string());
    repo.update_user(&fresh, &retry).unwrap();
    assert_eq!(
        repo.get_user_by_username("jake").unwrap().bio(),
        Some("second writer")
    );
}

#[test]
fn update_of_missing_user_is_stale() {
    let conn = open_store_db_in_memory().unwrap();
    let repo = repo(&conn);
    let old = jake();

    let mut new = old.clone();
    new.bio = Some("nobody home".to_string());
    let err = repo.update_user(&old, &new).unwrap_err();

    assert!(matches!(err, RepoError::StaleSnapshot));
    assert!(repo.get_user_by_username("jake").unwrap_err().input_error().is_some());
}

#[test]
fn configured_tables_and_paging_are_honoured() {
    let conn = open_store_db_in_memory().unwrap();
    let config = StoreConfig::from_lookup(|name| match name {
        "USERSTORE_USER_TABLE" => Some("people".to_string()),
        "USERSTORE_EMAIL_USER_TABLE" => Some("people_by_email".to_string()),
        "USERSTORE_BATCH_PAGE_SIZE" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();
    let store = SqliteKvStore::try_new(&conn, config.batch).unwrap();
    let repo = KvUserRepository::new(store, config.tables);
    repo.create_user(&jake()).unwrap();

    assert!(repo
        .store()
        .get_item("people", &Key::new("Username", "jake"))
        .unwrap()
        .is_some());
    assert!(repo
        .store()
        .get_item("users", &Key::new("Username", "jake"))
        .unwrap()
        .is_none());
    assert_eq!(repo.get_user_by_email("jake@jake.jake").unwrap(), jake());
    repo.create_user(&user("celeb_jake", "celeb@jake.jake")).unwrap();
    let names = vec!["celeb_jake".to_string(), "jake".to_string()];
    let found = repo.get_users_by_usernames(&names).unwrap();
    assert_eq!(found[0].username, "celeb_jake");
    assert_eq!(found[1], jake());
}

#[test]
fn racing_creates_on_separate_connections_admit_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.db");
    drop(open_store_db(&path).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let path = path.clone();
            std::thread::spawn(move || {
                let conn = open_store_db(&path).unwrap();
                let repo = KvUserRepository::new(common::store(&conn), TableNames::default());
                repo.create_user(&user(&format!("racer{n}"), "same@jake.jake"))
                    .map_err(|err| err.to_string())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for failure in results.iter().filter_map(|result| result.as_ref().err()) {
        assert_eq!(failure, "email has already been taken");
    }

    let conn = open_store_db(&path).unwrap();
    let stored: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM kv_items WHERE table_name = 'users';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stored, 1);
}
