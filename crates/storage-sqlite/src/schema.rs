//! Table definitions for the local gallery replica.
//!
//! Every synced table carries the same bookkeeping columns: a TEXT id
//! primary key, epoch-millis timestamps and the `sync_status` marker.
//! Tombstones and the pull checkpoint live in dedicated side tables.

pub const BOOTSTRAP_SQL: &str = "
CREATE TABLE IF NOT EXISTS galleries (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    description TEXT,
    cover_image_id TEXT,
    user_id TEXT,
    is_public INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_categories (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    icon TEXT,
    order_index INTEGER NOT NULL DEFAULT 0,
    is_visible INTEGER NOT NULL DEFAULT 1,
    is_public INTEGER NOT NULL DEFAULT 0,
    is_system INTEGER NOT NULL DEFAULT 0,
    user_id TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_images (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    description TEXT,
    storage_path TEXT,
    local_uri TEXT,
    thumbnail_path TEXT,
    source_type TEXT,
    source_url TEXT,
    source_author TEXT,
    is_public INTEGER NOT NULL DEFAULT 0,
    view_count INTEGER NOT NULL DEFAULT 0,
    user_id TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_image_categories (
    id TEXT PRIMARY KEY NOT NULL,
    image_id TEXT NOT NULL,
    category_id TEXT NOT NULL,
    user_id TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_tags (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    user_id TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_image_tags (
    id TEXT PRIMARY KEY NOT NULL,
    image_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    user_id TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_notes (
    id TEXT PRIMARY KEY NOT NULL,
    image_id TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    reminder_date INTEGER,
    attached_project_id TEXT,
    is_public INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    user_id TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_favorites (
    id TEXT PRIMARY KEY NOT NULL,
    image_id TEXT NOT NULL,
    user_id TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS gallery_image_projects (
    id TEXT PRIMARY KEY NOT NULL,
    image_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    usage_type TEXT,
    user_id TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'synced'
);

CREATE TABLE IF NOT EXISTS sync_tombstones (
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    deleted_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (table_name, record_id)
);

CREATE TABLE IF NOT EXISTS sync_cursor (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_pulled_at INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO sync_cursor (id, last_pulled_at) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_gallery_image_categories_image
    ON gallery_image_categories (image_id);
CREATE INDEX IF NOT EXISTS idx_gallery_image_tags_image
    ON gallery_image_tags (image_id);
CREATE INDEX IF NOT EXISTS idx_gallery_notes_image
    ON gallery_notes (image_id);
CREATE INDEX IF NOT EXISTS idx_gallery_favorites_image
    ON gallery_favorites (image_id);
CREATE INDEX IF NOT EXISTS idx_gallery_image_projects_image
    ON gallery_image_projects (image_id);
";
