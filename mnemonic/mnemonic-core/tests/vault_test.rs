//! End-to-end tests through the vault facade

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use mnemonic_core::{
    config::ContainerConfig,
    model::{FilterType, GroupingKind, Taggable, GLOBAL_BRIEFCASE_ID, ROOT_ASPECT_GROUP_ID},
    setops,
    storage::ByteStore,
    Error, Vault, VaultConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> VaultConfig {
    VaultConfig {
        container: ContainerConfig {
            kdf_memory_kib: 64,
            kdf_iterations: 1,
            kdf_parallelism: 1,
        },
        ..VaultConfig::with_root(dir.path())
    }
}

#[test]
fn test_save_check_in_and_conflict() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "alice")?;

    let id = vault.save_file("a.txt", "", &[1, 2, 3], None, false)?;
    assert_eq!(vault.last_version_number(id)?, 0);
    assert_eq!(vault.file_hash(id)?, ByteStore::compute_hash(&[1, 2, 3]));

    assert_eq!(vault.check_in(id, &[1, 2, 3, 4], "append", 0)?, 1);
    assert!(matches!(
        vault.check_in(id, &[9], "stale", 0),
        Err(Error::VersionConflict { claimed: 0, actual: 1 })
    ));

    assert_eq!(vault.retrieve_version(id, 1)?, vec![1, 2, 3, 4]);
    assert_eq!(vault.retrieve_original(id)?, vec![1, 2, 3]);
    assert_eq!(vault.retrieve_last_version(id)?, (vec![1, 2, 3, 4], 1));

    let history = vault.version_history(id)?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].comment, "append");
    assert_eq!(vault.version_details(id, 1)?.hash, vault.version_hash(id, 1)?);

    let (old, new) = vault.version_diff(id, 0, 1)?;
    assert_eq!((old.len(), new.len()), (3, 4));
    Ok(())
}

#[test]
fn test_concurrent_check_ins_have_one_winner() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Arc::new(Vault::create(config(&temp_dir), "alice")?);
    let id = vault.save_file("shared.txt", "", b"base", None, false)?;

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let vault = vault.clone();
            std::thread::spawn(move || vault.check_in(id, &[b'0' + i], "race", 0))
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, Error::VersionConflict { actual: 1, .. })));

    // the winner's payload is what version 1 holds
    let winning = outcomes.iter().position(|o| o.is_ok()).unwrap() as u8;
    assert_eq!(vault.retrieve_version(id, 1)?, vec![b'0' + winning]);
    Ok(())
}

#[test]
fn test_second_session_cannot_overwrite_a_version() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let first = Vault::create(config(&temp_dir), "alice")?;
    let id = first.save_file("shared.txt", "", b"base", None, false)?;
    let second = Vault::open(config(&temp_dir), "alice")?;

    assert_eq!(first.check_in(id, b"session-a", "a", 0)?, 1);
    assert!(matches!(
        second.check_in(id, b"session-b", "b", 0),
        Err(Error::VersionConflict { claimed: 0, actual: 1 })
    ));

    for vault in [&first, &second] {
        assert_eq!(vault.retrieve_version(id, 1)?, b"session-a");
        assert_eq!(vault.version_hash(id, 1)?, ByteStore::compute_hash(b"session-a"));
        assert_eq!(vault.version_history(id)?.len(), 1);
    }

    // the second session catches up and continues the chain
    assert_eq!(second.check_in(id, b"session-b", "b", 1)?, 2);
    assert_eq!(first.retrieve_last_version(id)?, (b"session-b".to_vec(), 2));
    Ok(())
}

#[test]
fn test_bulk_grouping_changes_are_atomic() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "alice")?;
    let a = vault.save_file("a.txt", "", b"a", None, false)?;
    let b = vault.save_file("b.txt", "", b"b", None, false)?;
    let red = vault.create_aspect("red", "")?;
    let album = vault.create_collection("album", "")?;

    assert!(matches!(
        vault.apply_aspect_to_all(red, Taggable::File, &[a, 999]),
        Err(Error::NonExistentResource(_))
    ));
    assert!(!vault.is_aspect_applied(red, Taggable::File, a)?);

    assert!(matches!(
        vault.add_all_to_collection(album, &[a, b, 999]),
        Err(Error::NonExistentResource(_))
    ));
    assert!(vault.files_in_collection(album)?.is_empty());

    vault.apply_aspect_to_all(red, Taggable::File, &[a, b])?;
    vault.add_all_to_collection(album, &[a, b])?;
    assert!(vault.unapply_aspect_from_all(red, Taggable::File, &[b, 999]).is_err());
    assert!(vault.remove_all_from_collection(album, &[b, 999]).is_err());
    assert_eq!(vault.items_with_aspect(red, Taggable::File)?, vec![a, b]);
    assert_eq!(vault.files_in_collection(album)?, vec![a, b]);
    Ok(())
}

#[test]
fn test_aspect_groups() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "alice")?;

    let places = vault.create_aspect_group(ROOT_ASPECT_GROUP_ID, "places", "where")?;
    let cities = vault.create_aspect_group(places, "cities", "")?;
    assert!(vault.aspect_group_exists(cities)?);
    assert!(vault.aspect_group_exists_at_level(places, "cities")?);
    assert!(!vault.aspect_group_exists_at_level(ROOT_ASPECT_GROUP_ID, "cities")?);
    assert!(matches!(
        vault.create_aspect_group(places, "", ""),
        Err(Error::InvalidArgument(_))
    ));

    let paris = vault.create_aspect_in_group(cities, "paris", "")?;
    let plain = vault.create_aspect("plain", "")?;
    assert_eq!(vault.aspect(plain)?.group, ROOT_ASPECT_GROUP_ID);
    assert_eq!(vault.aspect_count_in_group(cities)?, 1);
    assert_eq!(vault.aspect_group_count_in_group(places)?, 1);
    assert_eq!(vault.child_aspect_groups(ROOT_ASPECT_GROUP_ID)?, vec![places]);

    vault.rename_aspect_group(cities, "towns")?;
    vault.describe_aspect_group(cities, "smaller places")?;
    let towns = vault.aspect_group(cities)?;
    assert_eq!((towns.name.as_str(), towns.parent), ("towns", Some(places)));

    assert!(matches!(
        vault.delete_aspect_group(ROOT_ASPECT_GROUP_ID),
        Err(Error::IllegalOperation(_))
    ));
    assert!(matches!(vault.delete_aspect_group(places), Err(Error::IllegalOperation(_))));
    assert!(matches!(vault.delete_aspect_group(cities), Err(Error::IllegalOperation(_))));

    vault.delete_aspect(paris)?;
    vault.delete_aspect_group(cities)?;
    vault.delete_aspect_group(places)?;
    assert!(vault.child_aspect_groups(ROOT_ASPECT_GROUP_ID)?.is_empty());
    assert!(matches!(vault.aspect_group(places), Err(Error::NonExistentResource(_))));
    Ok(())
}

#[test]
fn test_delete_file_removes_versions() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "bob")?;
    let id = vault.save_file("doc.md", "draft", b"one", None, false)?;
    vault.check_in(id, b"two", "", 0)?;
    vault.check_in(id, b"three", "", 1)?;

    assert_eq!(vault.delete_file(id)?, 3);
    assert!(!vault.file_exists(id)?);
    assert!(matches!(vault.retrieve_original(id), Err(Error::NonExistentResource(_))));
    assert_eq!(vault.storage_metrics()?.container_count, 0);

    let events: Vec<_> = vault
        .file_logs(id)?
        .iter()
        .map(|e| e.event.describe())
        .collect();
    assert_eq!(
        events,
        vec![
            "created as \"doc.md\"",
            "version 1 created",
            "version 2 created",
            "deleted"
        ]
    );
    Ok(())
}

#[test]
fn test_file_metadata_updates() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "carol")?;
    let day = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let id = vault.save_file("photo.jpg", "beach", b"jpeg", Some(day), false)?;

    vault.update_name(id, "sunset.jpg")?;
    vault.update_narration(id, "evening")?;
    assert_eq!(vault.file_name(id)?, "sunset.jpg");
    assert_eq!(vault.file_narration(id)?, "evening");
    assert_eq!(vault.file_size(id)?, 4);

    assert!(matches!(vault.deletion_time(id), Err(Error::NonExistentResource(_))));
    vault.set_deletion_time(id, day)?;
    assert_eq!(vault.deletion_time(id)?, day);
    vault.reset_deletion_time(id)?;
    assert!(vault.deletion_time(id).is_err());

    assert_eq!(vault.files_saved_on(day.date_naive())?, vec![id]);
    assert_eq!(vault.files_saved_before(day + Duration::seconds(1))?, vec![id]);
    assert!(vault.files_saved_after(day)?.is_empty());
    assert_eq!(vault.files_saved_between(day, day)?, vec![id]);

    let later = day + Duration::days(2);
    vault.update_save_time(id, later)?;
    assert_eq!(vault.save_time(id)?, later);

    assert!(matches!(vault.update_name(id, ""), Err(Error::InvalidArgument(_))));
    assert!(matches!(vault.file(0), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn test_duplicates_are_scored() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "dave")?;

    let original = vault.save_file("a.txt", "notes", b"same", None, false)?;
    let exact = vault.save_file("a.txt", "notes", b"same", None, false)?;
    let renamed = vault.save_file("b.txt", "notes", b"same", None, false)?;
    let other = vault.save_file("a.txt", "notes", b"different", None, false)?;

    let found = vault.duplicate_files(original)?;
    assert_eq!(found.get(&exact), Some(&1.0));
    assert_eq!(found.get(&renamed), Some(&0.85));
    assert!(!found.contains_key(&other));
    assert!(!found.contains_key(&original));
    Ok(())
}

#[test]
fn test_groupings_and_filters() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "erin")?;
    let a = vault.save_file("a", "", b"a", None, false)?;
    let b = vault.save_file("b", "", b"b", None, false)?;
    let c = vault.save_file("c", "", b"c", None, false)?;

    let red = vault.create_aspect("red", "")?;
    let round = vault.create_aspect("round", "")?;
    assert!(matches!(vault.create_aspect("red", "again"), Err(Error::DuplicateName(_))));
    assert_eq!(vault.apply_aspect_to_all(red, Taggable::File, &[a, b])?, 2);
    vault.apply_aspect(round, Taggable::File, b)?;
    vault.apply_aspect(round, Taggable::File, c)?;

    let all = vault.all_files()?;
    assert_eq!(vault.filter_files_within_aspects(&[red, round], &all, FilterType::And)?, vec![b]);
    assert_eq!(
        vault.filter_files_within_aspects(&[red, round], &all, FilterType::Or)?,
        vec![a, b, c]
    );
    assert_eq!(
        setops::invert(&all, &vault.items_with_aspect(red, Taggable::File)?)?,
        vec![c]
    );

    let work = vault.create_briefcase("work", "")?;
    vault.move_to_briefcase(a, work)?;
    assert_eq!(vault.briefcase_of(a)?, work);
    assert!(matches!(vault.delete_briefcase(work), Err(Error::IllegalOperation(_))));
    assert!(matches!(
        vault.delete_briefcase(GLOBAL_BRIEFCASE_ID),
        Err(Error::IllegalOperation(_))
    ));
    vault.remove_from_briefcase(a)?;
    vault.delete_briefcase(work)?;
    assert!(!vault.briefcase_exists(work)?);

    let album = vault.create_collection("album", "")?;
    assert_eq!(vault.add_all_to_collection(album, &[a, c, a])?, 2);
    assert_eq!(vault.collection_id("album")?, album);
    assert_eq!(vault.remove_all_from_collection(album, &[a])?, 1);
    assert_eq!(vault.files_in_collection(album)?, vec![c]);
    vault.delete_collection(album)?;
    assert!(matches!(vault.files_in_collection(album), Err(Error::NonExistentResource(_))));

    vault.delete_aspect(red)?;
    assert_eq!(vault.aspects_on(Taggable::File, b)?, vec![round]);
    Ok(())
}

#[test]
fn test_urls_and_notes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "frank")?;

    let url = vault.add_url("https://example.org", "home")?;
    let note = vault.add_note("buy milk")?;
    let todo = vault.create_aspect("todo", "")?;
    vault.apply_aspect(todo, Taggable::Note, note)?;

    assert_eq!(vault.update_url(url, None, Some("start page"))?.description, "start page");
    assert!(matches!(vault.add_note("   "), Err(Error::InvalidArgument(_))));
    assert_eq!(vault.items_with_aspect(todo, Taggable::Note)?, vec![note]);

    vault.delete_note(note)?;
    assert!(!vault.note_exists(note)?);
    assert!(vault.items_with_aspect(todo, Taggable::Note)?.is_empty());
    assert!(vault.url_exists(url)?);
    Ok(())
}

#[test]
fn test_archive_grouping() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "gina")?;
    let trip = vault.create_aspect("trip", "")?;
    for (name, data) in [("one.txt", "1"), ("two.txt", "22"), ("three.txt", "333")] {
        let id = vault.save_file(name, "", data.as_bytes(), None, false)?;
        vault.apply_aspect(trip, Taggable::File, id)?;
    }

    let out = temp_dir.path().join("exports");
    let path = vault.archive_grouping(GroupingKind::Aspect, trip, &out, "trip.mfc", Some("secret"))?;

    let entries = Vault::open_archive(&path, Some("secret"))?;
    let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["one.txt", "three.txt", "two.txt"]);
    assert!(Vault::open_archive(&path, Some("wrong")).is_err());
    Ok(())
}

#[test]
fn test_users() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = config(&temp_dir);

    assert!(Vault::users(&config)?.is_empty());
    Vault::create(config.clone(), "zed")?;
    Vault::create(config.clone(), "amy")?;
    assert!(matches!(
        Vault::create(config.clone(), "amy"),
        Err(Error::DuplicateName(_))
    ));
    assert!(matches!(Vault::open(config.clone(), "nobody"), Err(Error::NonExistentResource(_))));
    assert!(matches!(Vault::create(config.clone(), "../x"), Err(Error::InvalidArgument(_))));
    assert_eq!(Vault::users(&config)?, vec!["amy", "zed"]);

    // data survives reopening
    let id = {
        let vault = Vault::open(config.clone(), "amy")?;
        vault.save_file("kept.txt", "", b"kept", None, false)?
    };
    let vault = Vault::open(config.clone(), "amy")?;
    assert_eq!(vault.retrieve_original(id)?, b"kept");

    Vault::delete_user(&config, "zed")?;
    assert!(!Vault::user_exists(&config, "zed")?);
    Ok(())
}

#[test]
fn test_limits_apply() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = config(&temp_dir);
    config.limits.max_file_size = 8;
    config.limits.max_file_name_length = 5;
    let vault = Vault::create(config, "hal")?;

    assert!(matches!(
        vault.save_file("ok", "", &[0; 9], None, false),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        vault.save_file("toolong", "", b"x", None, false),
        Err(Error::InvalidArgument(_))
    ));
    let id = vault.save_file("ok", "", &[0; 8], None, false)?;
    assert!(matches!(vault.check_in(id, &[1; 9], "", 0), Err(Error::InvalidArgument(_))));
    assert!(vault.all_files()?.len() == 1);
    Ok(())
}

#[tokio::test]
async fn test_search_through_live_index() -> Result<()> {
    use mnemonic_core::indexer::LiveIndex;
    use mnemonic_core::search::SearchIndex;

    let temp_dir = TempDir::new()?;
    let vault = Vault::create(config(&temp_dir), "ivy")?;
    assert!(matches!(vault.search("x", 5), Err(Error::IllegalOperation(_))));

    let index = Arc::new(SearchIndex::new(vault.index_dir())?);
    let (live, _worker) = LiveIndex::spawn(index);
    let live = Arc::new(live);
    let vault = vault.with_indexer(live.clone());

    let indexed = vault.save_file("minutes.txt", "board meeting", b"budget approved", None, true)?;
    vault.save_file("quiet.txt", "", b"budget hidden", None, false)?;
    live.flush().await;

    assert_eq!(vault.search("budget", 10)?, vec![indexed]);
    assert_eq!(vault.search("board", 10)?, vec![indexed]);

    vault.delete_file(indexed)?;
    live.flush().await;
    assert!(vault.search("budget", 10)?.is_empty());
    Ok(())
}
