//! Database schema and migrations for stowage.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded. The schema_version table tracks which ones have run.

/// Database migrations, in application order.
pub const MIGRATIONS: &[&str] = &[
    // v1: folder hierarchy
    r#"
CREATE TABLE folders (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    parent_id   TEXT REFERENCES folders(id),
    name        TEXT NOT NULL,
    is_root     INTEGER,                 -- 1 for the owner's root, NULL otherwise
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (owner_id, is_root),
    CHECK (is_root IS NULL OR is_root = 1),
    CHECK (COALESCE(is_root, 0) = (parent_id IS NULL))
);

CREATE INDEX idx_folders_owner_parent ON folders(owner_id, parent_id);
"#,
    // v2: file entries
    r#"
CREATE TABLE files (
    id               TEXT PRIMARY KEY,
    owner_id         TEXT NOT NULL,
    parent_id        TEXT NOT NULL REFERENCES folders(id),
    filename         TEXT NOT NULL,
    storage_locator  TEXT NOT NULL,
    size_bytes       INTEGER NOT NULL,
    mime_type        TEXT,
    content_hash     TEXT,
    meta             TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX idx_files_owner_parent ON files(owner_id, parent_id);
CREATE INDEX idx_files_locator ON files(storage_locator);
"#,
];
