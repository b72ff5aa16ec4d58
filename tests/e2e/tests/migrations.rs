//! Migration ordering and idempotency, exercised against real on-disk databases rather than the
//! in-memory connections `substrate_core`'s own unit tests use.

use substrate_core::storage::migrations;

#[test]
fn migrations_apply_in_ascending_version_order() {
    let mut last = 0;
    for migration in migrations::MIGRATIONS {
        assert!(migration.version > last, "migration {} out of order", migration.version);
        last = migration.version;
    }
}

#[test]
fn fresh_database_applies_every_migration_exactly_once() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let applied = migrations::apply_migrations(&conn, true).unwrap();
    assert_eq!(applied as usize, migrations::MIGRATIONS.len());

    let reapplied = migrations::apply_migrations(&conn, true).unwrap();
    assert_eq!(reapplied, 0);
}

#[test]
fn current_version_tracks_the_highest_applied_migration() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    assert_eq!(migrations::current_version(&conn).unwrap(), 0);

    migrations::apply_migrations(&conn, true).unwrap();
    let highest = migrations::MIGRATIONS.iter().map(|m| m.version).max().unwrap();
    assert_eq!(migrations::current_version(&conn).unwrap(), highest);
}

#[test]
fn reopening_without_the_vector_extension_leaves_its_migration_pending() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        migrations::apply_migrations(&conn, false).unwrap();
    }

    let conn = rusqlite::Connection::open(&path).unwrap();
    let applied = migrations::apply_migrations(&conn, true).unwrap();
    assert_eq!(applied, 1, "only the vector-dependent migration should still be pending");
}
