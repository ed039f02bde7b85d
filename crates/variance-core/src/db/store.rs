use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::cache::{CacheEntry, CacheKey};
use crate::config::CollatorConfig;
use crate::error::StoreError;
use crate::model::{
    AlignedAnnotation, Alignment, AlignmentClass, AlignmentFilter, AlignmentId, AlignmentName,
    Annotation, AnnotationId, AnnotationKind, ComparisonSet, NewAlignment, NewAnnotation, Range,
    SetId, SetStatus, Witness, WitnessId,
};
use crate::store::{
    AlignmentStore, AnnotationQuery, AnnotationStore, CacheStore, SetRepository, TextSource,
    check_alignments, check_bounds, check_status, check_transition, slice_chars,
};

/// [`crate::store::Store`] over one SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub(crate) const fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` against the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or `f` fails.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    fn witness_text(conn: &Connection, witness: WitnessId) -> Result<(String, usize), StoreError> {
        conn.query_row(
            "SELECT content, text_len FROM witnesses WHERE id = ?1",
            [witness.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(StoreError::WitnessNotFound(witness))
    }

    fn witness_len(conn: &Connection, witness: WitnessId) -> Result<usize, StoreError> {
        conn.query_row(
            "SELECT text_len FROM witnesses WHERE id = ?1",
            [witness.0],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StoreError::WitnessNotFound(witness))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_column<T: std::str::FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("{e}").into(),
        )
    })
}

fn set_from_row(row: &Row<'_>) -> rusqlite::Result<ComparisonSet> {
    let config_json: String = row.get(2)?;
    let config: CollatorConfig = serde_json::from_str(&config_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(ComparisonSet {
        id: SetId(row.get(0)?),
        name: row.get(1)?,
        config,
        status: parse_column(row, 3)?,
    })
}

fn witness_from_row(row: &Row<'_>) -> rusqlite::Result<Witness> {
    let start: Option<usize> = row.get(3)?;
    let end: Option<usize> = row.get(4)?;
    Ok(Witness {
        id: WitnessId(row.get(0)?),
        name: row.get(1)?,
        siglum: row.get(2)?,
        fragment: start.zip(end).map(|(start, end)| Range { start, end }),
    })
}

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<Annotation> {
    Ok(Annotation {
        id: AnnotationId(row.get(0)?),
        set: SetId(row.get(1)?),
        witness: WitnessId(row.get(2)?),
        kind: parse_column(row, 3)?,
        range: Range {
            start: row.get(4)?,
            end: row.get(5)?,
        },
        text: row.get(6)?,
    })
}

const ALIGNMENT_COLUMNS: &str = "id, set_id, name, group_id, edit_distance, manual, \
     a_witness_id, a_annotation_id, a_start, a_end, \
     b_witness_id, b_annotation_id, b_start, b_end";

fn alignment_from_row(row: &Row<'_>) -> rusqlite::Result<Alignment> {
    let side = |offset: usize| -> rusqlite::Result<AlignedAnnotation> {
        Ok(AlignedAnnotation {
            witness: WitnessId(row.get(offset)?),
            annotation: AnnotationId(row.get(offset + 1)?),
            range: Range {
                start: row.get(offset + 2)?,
                end: row.get(offset + 3)?,
            },
        })
    };
    Ok(Alignment {
        id: AlignmentId(row.get(0)?),
        set: SetId(row.get(1)?),
        name: parse_column::<AlignmentName>(row, 2)?,
        group: row.get(3)?,
        edit_distance: row.get(4)?,
        manual: row.get(5)?,
        annotations: [side(6)?, side(10)?],
    })
}

/// Build the listing query for `filter`. Exclusion and paging are applied in
/// SQL so that pages are stable.
fn alignment_query(set: SetId, filter: &AlignmentFilter) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {ALIGNMENT_COLUMNS} FROM alignments WHERE set_id = ?");
    let mut values = vec![Value::Integer(set.0)];

    match filter.class {
        AlignmentClass::Differences => sql.push_str(" AND name IN ('change', 'add_del')"),
        AlignmentClass::Transpositions => sql.push_str(" AND name = 'transposition'"),
        AlignmentClass::All => {}
    }

    if let Some(base) = filter.base {
        sql.push_str(" AND (a_witness_id = ? OR b_witness_id = ?)");
        values.extend([Value::Integer(base.0), Value::Integer(base.0)]);

        if !filter.excluded.is_empty() {
            let marks = vec!["?"; filter.excluded.len()].join(", ");
            sql.push_str(&format!(
                " AND (CASE WHEN a_witness_id = ? THEN b_witness_id ELSE a_witness_id END) NOT IN ({marks})"
            ));
            values.push(Value::Integer(base.0));
            values.extend(filter.excluded.iter().map(|w| Value::Integer(w.0)));
        }

        sql.push_str(
            " ORDER BY CASE WHEN a_witness_id = ? THEN a_start ELSE b_start END, \
             CASE WHEN a_witness_id = ? THEN a_end ELSE b_end END, id",
        );
        values.extend([Value::Integer(base.0), Value::Integer(base.0)]);
    } else {
        sql.push_str(" ORDER BY id");
    }

    if let Some((offset, limit)) = filter.page {
        sql.push_str(" LIMIT ? OFFSET ?");
        values.extend([Value::Integer(to_sql_int(limit)), Value::Integer(to_sql_int(offset))]);
    }
    (sql, values)
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

impl TextSource for SqliteStore {
    fn text_len(&self, witness: WitnessId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Self::witness_len(&conn, witness)
    }

    fn read(&self, witness: WitnessId, range: Range) -> Result<String, StoreError> {
        let conn = self.lock()?;
        let (content, len) = Self::witness_text(&conn, witness)?;
        check_bounds(witness, range, len)?;
        Ok(slice_chars(&content, range))
    }
}

impl AnnotationStore for SqliteStore {
    fn create_annotations(
        &self,
        batch: Vec<NewAnnotation>,
    ) -> Result<Vec<AnnotationId>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(batch.len());
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO annotations (set_id, witness_id, kind, range_start, range_end, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for new in &batch {
                let len = Self::witness_len(&tx, new.witness)?;
                check_bounds(new.witness, new.range, len)?;
                insert.execute(params![
                    new.set.0,
                    new.witness.0,
                    new.kind.as_str(),
                    new.range.start,
                    new.range.end,
                    new.text,
                ])?;
                ids.push(AnnotationId(tx.last_insert_rowid()));
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn list_annotations(
        &self,
        set: SetId,
        query: &AnnotationQuery,
    ) -> Result<Vec<Annotation>, StoreError> {
        let conn = self.lock()?;
        let (lo, hi) = query
            .within
            .map_or((0, i64::MAX), |r| (to_sql_int(r.start), to_sql_int(r.end)));
        let mut stmt = conn.prepare_cached(
            "SELECT id, set_id, witness_id, kind, range_start, range_end, text
             FROM annotations
             WHERE set_id = ?1 AND witness_id = ?2 AND kind = ?3
               AND range_start >= ?4 AND range_end <= ?5
             ORDER BY range_start, range_end, id",
        )?;
        let rows = stmt.query_map(
            params![set.0, query.witness.0, query.kind.as_str(), lo, hi],
            annotation_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_annotations(&self, set: SetId, kinds: &[AnnotationKind]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for kind in kinds {
            removed += tx.execute(
                "DELETE FROM annotations WHERE set_id = ?1 AND kind = ?2",
                params![set.0, kind.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn delete_annotation_ids(&self, ids: &[AnnotationId]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM annotations WHERE id = ?1", [id.0])?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

impl AlignmentStore for SqliteStore {
    fn create_alignments(&self, batch: Vec<NewAlignment>) -> Result<usize, StoreError> {
        check_alignments(&batch)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO alignments (set_id, name, group_id, edit_distance, manual,
                     a_witness_id, a_annotation_id, a_start, a_end,
                     b_witness_id, b_annotation_id, b_start, b_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for new in &batch {
                let [a, b] = &new.annotations;
                insert.execute(params![
                    new.set.0,
                    new.name.as_str(),
                    new.group,
                    new.edit_distance,
                    new.manual,
                    a.witness.0,
                    a.annotation.0,
                    a.range.start,
                    a.range.end,
                    b.witness.0,
                    b.annotation.0,
                    b.range.start,
                    b.range.end,
                ])?;
            }
        }
        tx.commit()?;
        Ok(batch.len())
    }

    fn list_alignments(
        &self,
        set: SetId,
        filter: &AlignmentFilter,
    ) -> Result<Vec<Alignment>, StoreError> {
        let conn = self.lock()?;
        let (sql, values) = alignment_query(set, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), alignment_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn clear(&self, set: SetId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "DELETE FROM alignments WHERE set_id = ?1 AND manual = 0",
            [set.0],
        )?)
    }
}

impl SetRepository for SqliteStore {
    fn create_set(&self, name: &str, config: CollatorConfig) -> Result<SetId, StoreError> {
        let conn = self.lock()?;
        let config_json = serde_json::to_string(&config)?;
        conn.execute(
            "INSERT INTO comparison_sets (name, config_json, status) VALUES (?1, ?2, ?3)",
            params![name, config_json, SetStatus::NotCollated.as_str()],
        )?;
        Ok(SetId(conn.last_insert_rowid()))
    }

    fn set(&self, id: SetId) -> Result<ComparisonSet, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, config_json, status FROM comparison_sets WHERE id = ?1",
            [id.0],
            set_from_row,
        )
        .optional()?
        .ok_or(StoreError::SetNotFound(id))
    }

    fn sets(&self) -> Result<Vec<ComparisonSet>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, config_json, status FROM comparison_sets ORDER BY id")?;
        let rows = stmt.query_map([], set_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn add_witness(
        &self,
        set: SetId,
        name: &str,
        siglum: &str,
        text: &str,
        fragment: Option<Range>,
    ) -> Result<WitnessId, StoreError> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM comparison_sets WHERE id = ?1", [set.0], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::SetNotFound(set));
        }

        let len = text.chars().count();
        if let Some(range) = fragment {
            check_bounds(WitnessId(0), range, len)?;
        }
        conn.execute(
            "INSERT INTO witnesses (set_id, name, siglum, content, text_len, fragment_start, fragment_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                set.0,
                name,
                siglum,
                text,
                len,
                fragment.map(|r| r.start),
                fragment.map(|r| r.end),
            ],
        )?;
        Ok(WitnessId(conn.last_insert_rowid()))
    }

    fn remove_witness(&self, witness: WitnessId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM witnesses WHERE id = ?1", [witness.0])?;
        if removed == 0 {
            return Err(StoreError::WitnessNotFound(witness));
        }
        Ok(())
    }

    fn witnesses_of(&self, set: SetId) -> Result<Vec<Witness>, StoreError> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM comparison_sets WHERE id = ?1", [set.0], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::SetNotFound(set));
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, name, siglum, fragment_start, fragment_end
             FROM witnesses WHERE set_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([set.0], witness_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_status(&self, set: SetId, status: SetStatus) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let current: SetStatus = tx
            .query_row(
                "SELECT status FROM comparison_sets WHERE id = ?1",
                [set.0],
                |row| parse_column(row, 0),
            )
            .optional()?
            .ok_or(StoreError::SetNotFound(set))?;
        check_transition(current, status)?;
        tx.execute(
            "UPDATE comparison_sets SET status = ?2 WHERE id = ?1",
            params![set.0, status.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn compare_and_set_status(
        &self,
        set: SetId,
        expected: &[SetStatus],
        next: SetStatus,
    ) -> Result<SetStatus, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let previous: SetStatus = tx
            .query_row(
                "SELECT status FROM comparison_sets WHERE id = ?1",
                [set.0],
                |row| parse_column(row, 0),
            )
            .optional()?
            .ok_or(StoreError::SetNotFound(set))?;
        check_status(set, previous, expected)?;
        check_transition(previous, next)?;
        tx.execute(
            "UPDATE comparison_sets SET status = ?2 WHERE id = ?1",
            params![set.0, next.as_str()],
        )?;
        tx.commit()?;
        Ok(previous)
    }
}

impl CacheStore for SqliteStore {
    fn cache_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.lock()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, created_at_ms FROM artifact_cache
                 WHERE set_id = ?1 AND witness_key = ?2 AND kind = ?3",
                params![key.set.0, key.witnesses, key.kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(payload, ms)| CacheEntry {
            payload,
            created_at: DateTime::from_timestamp_millis(ms).unwrap_or_default(),
        }))
    }

    fn cache_put(&self, key: &CacheKey, payload: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO artifact_cache (set_id, witness_key, kind, payload, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (set_id, witness_key, kind)
             DO UPDATE SET payload = excluded.payload, created_at_ms = excluded.created_at_ms",
            params![
                key.set.0,
                key.witnesses,
                key.kind.as_str(),
                payload,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn cache_invalidate(&self, set: SetId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM artifact_cache WHERE set_id = ?1", [set.0])?)
    }

    fn cache_purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "DELETE FROM artifact_cache WHERE created_at_ms < ?1",
            [cutoff.timestamp_millis()],
        )?)
    }
}
