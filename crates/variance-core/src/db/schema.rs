//! Canonical SQLite schema for the collation store.
//!
//! Witness text is stored inline and never rewritten. Annotations and
//! alignments are disposable: re-collation clears and recomputes them, except
//! for manual alignments and the annotations they reference.

/// Migration v1: sets, witnesses, annotations and alignments.
///
/// Alignments are stored flat with one column group per side (`a_*`, `b_*`)
/// so base-relative listing needs no join.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS comparison_sets (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    config_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'not_collated' CHECK (status IN (
        'not_collated', 'tokenizing', 'tokenized', 'collating', 'collated', 'error'
    ))
);

CREATE TABLE IF NOT EXISTS witnesses (
    id INTEGER PRIMARY KEY,
    set_id INTEGER NOT NULL REFERENCES comparison_sets(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    siglum TEXT NOT NULL,
    content TEXT NOT NULL,
    text_len INTEGER NOT NULL CHECK (text_len >= 0),
    fragment_start INTEGER,
    fragment_end INTEGER,
    CHECK ((fragment_start IS NULL) = (fragment_end IS NULL)),
    CHECK (fragment_start IS NULL OR (fragment_start <= fragment_end AND fragment_end <= text_len))
);

CREATE INDEX IF NOT EXISTS idx_witnesses_set ON witnesses(set_id, id);

CREATE TABLE IF NOT EXISTS annotations (
    id INTEGER PRIMARY KEY,
    set_id INTEGER NOT NULL REFERENCES comparison_sets(id) ON DELETE CASCADE,
    witness_id INTEGER NOT NULL REFERENCES witnesses(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('token', 'gap', 'transposition')),
    range_start INTEGER NOT NULL,
    range_end INTEGER NOT NULL,
    text TEXT,
    CHECK (range_start >= 0 AND range_start <= range_end)
);

CREATE INDEX IF NOT EXISTS idx_annotations_witness_kind
    ON annotations(witness_id, kind, range_start, range_end);

CREATE INDEX IF NOT EXISTS idx_annotations_set_kind ON annotations(set_id, kind);

CREATE TABLE IF NOT EXISTS alignments (
    id INTEGER PRIMARY KEY,
    set_id INTEGER NOT NULL REFERENCES comparison_sets(id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK (name IN ('change', 'add_del', 'transposition')),
    group_id INTEGER NOT NULL DEFAULT 0 CHECK (group_id >= 0),
    edit_distance INTEGER NOT NULL CHECK (edit_distance >= -1),
    manual INTEGER NOT NULL DEFAULT 0 CHECK (manual IN (0, 1)),
    a_witness_id INTEGER NOT NULL REFERENCES witnesses(id) ON DELETE CASCADE,
    a_annotation_id INTEGER NOT NULL REFERENCES annotations(id) ON DELETE CASCADE,
    a_start INTEGER NOT NULL,
    a_end INTEGER NOT NULL,
    b_witness_id INTEGER NOT NULL REFERENCES witnesses(id) ON DELETE CASCADE,
    b_annotation_id INTEGER NOT NULL REFERENCES annotations(id) ON DELETE CASCADE,
    b_start INTEGER NOT NULL,
    b_end INTEGER NOT NULL,
    CHECK (a_witness_id <> b_witness_id)
);

CREATE INDEX IF NOT EXISTS idx_alignments_set_a ON alignments(set_id, a_witness_id, a_start, a_end);
CREATE INDEX IF NOT EXISTS idx_alignments_set_b ON alignments(set_id, b_witness_id, b_start, b_end);
CREATE INDEX IF NOT EXISTS idx_alignments_set_manual ON alignments(set_id, manual);
";

/// Migration v2: rendered-artifact cache.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS artifact_cache (
    set_id INTEGER NOT NULL REFERENCES comparison_sets(id) ON DELETE CASCADE,
    witness_key TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (set_id, witness_key, kind)
);

CREATE INDEX IF NOT EXISTS idx_artifact_cache_created ON artifact_cache(created_at_ms);
";
