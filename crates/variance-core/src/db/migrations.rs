//! `PRAGMA user_version` migrations for the collation store.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL), (2, schema::MIGRATION_V2_SQL)];

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the stored version is
/// negative or too large.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply pending migrations in ascending order, one transaction each.
///
/// # Errors
///
/// Returns an error if any migration fails; earlier migrations stay applied.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, current_schema_version, migrate};
    use rusqlite::Connection;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .expect("query sqlite_master")
            == 1
    }

    #[test]
    fn fresh_database_migrates_to_latest() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        assert_eq!(current_schema_version(&conn).expect("version"), 0);

        let applied = migrate(&mut conn).expect("migrate");
        assert_eq!(applied, LATEST_SCHEMA_VERSION);
        for table in ["comparison_sets", "witnesses", "annotations", "alignments", "artifact_cache"] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        migrate(&mut conn).expect("first migrate");
        let again = migrate(&mut conn).expect("second migrate");
        assert_eq!(again, LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn v1_database_upgrades_to_v2() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(super::schema::MIGRATION_V1_SQL)
            .expect("apply v1");
        conn.pragma_update(None, "user_version", 1_i64)
            .expect("set version");
        assert!(!table_exists(&conn, "artifact_cache"));

        migrate(&mut conn).expect("migrate");
        assert!(table_exists(&conn, "artifact_cache"));
    }

    #[test]
    fn alignment_sides_must_differ() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        migrate(&mut conn).expect("migrate");
        conn.execute_batch(
            "INSERT INTO comparison_sets (id, name, config_json) VALUES (1, 's', '{}');
             INSERT INTO witnesses (id, set_id, name, siglum, content, text_len)
                 VALUES (1, 1, 'A', 'A', 'abc', 3);
             INSERT INTO annotations (id, set_id, witness_id, kind, range_start, range_end)
                 VALUES (1, 1, 1, 'token', 0, 3);",
        )
        .expect("seed");

        let same_side = conn.execute(
            "INSERT INTO alignments (set_id, name, edit_distance, a_witness_id, a_annotation_id,
                 a_start, a_end, b_witness_id, b_annotation_id, b_start, b_end)
             VALUES (1, 'change', 1, 1, 1, 0, 3, 1, 1, 0, 3)",
            [],
        );
        assert!(same_side.is_err());
    }
}
