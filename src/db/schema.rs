pub const SCHEMA: &str = r#"
-- Images: minimal registry, only user scoping and processing state are
-- consumed here. Acquisition and analysis live outside this system.
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    is_processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_images_user ON images(user);
CREATE INDEX IF NOT EXISTS idx_images_processed ON images(user, is_processed);

-- Persons: named or unnamed stable face groups, scoped to one user and one
-- detection model. Ids are allocated by the reconciler (max + 1), so rows
-- are inserted with explicit ids.
CREATE TABLE IF NOT EXISTS persons (
    id INTEGER PRIMARY KEY,
    user TEXT NOT NULL,
    model INTEGER NOT NULL,
    name TEXT,                  -- NULL until the user names the discovery
    is_valid INTEGER NOT NULL DEFAULT 1,  -- 0 = needs recompute
    last_generation_time TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_persons_user_model ON persons(user, model);

-- Faces: one detected face occurrence. The detection pipeline owns every
-- column except person, which only the reconciler writes.
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image INTEGER NOT NULL,
    model INTEGER NOT NULL,
    descriptor BLOB,            -- float32 array stored as little-endian bytes
    descriptor_dim INTEGER,
    confidence REAL NOT NULL DEFAULT 0,
    is_groupable INTEGER NOT NULL DEFAULT 1,
    person INTEGER,             -- NULL until assigned by reconciliation
    creation_time TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (image) REFERENCES images(id) ON DELETE CASCADE,
    FOREIGN KEY (person) REFERENCES persons(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_faces_image ON faces(image);
CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person);
CREATE INDEX IF NOT EXISTS idx_faces_model ON faces(model);

-- Per-user flags, e.g. the force-recreate override consumed by the
-- staleness policy.
CREATE TABLE IF NOT EXISTS user_settings (
    user TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (user, key)
);
"#;
