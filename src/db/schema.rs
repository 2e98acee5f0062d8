pub const SCHEMA: &str = r#"
-- Artworks: the reference catalog
CREATE TABLE IF NOT EXISTS artworks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,

    -- Dimensions in centimeters
    width_cm REAL,
    height_cm REAL,
    depth_cm REAL,

    medium TEXT,
    creation_date TEXT,      -- year, range, or "circa ..."
    description TEXT,

    -- Cataloging information
    catalog_number TEXT NOT NULL UNIQUE,
    accession_number TEXT,

    -- Digital assets
    reference_image_path TEXT,

    -- Matching features
    embedding BLOB,          -- float32 array stored as bytes
    embedding_dim INTEGER,
    extractor_version TEXT,  -- which extractor produced the embedding
    palette TEXT,            -- JSON array of dominant [r,g,b] colors

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_artworks_artist ON artworks(artist);

-- Exhibitions
CREATE TABLE IF NOT EXISTS exhibitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    museum TEXT NOT NULL,
    gallery TEXT,
    city TEXT,
    country TEXT,

    start_date TEXT,
    end_date TEXT,

    curator TEXT,
    description TEXT,
    exhibition_type TEXT,    -- 'permanent', 'temporary', 'traveling'

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_exhibitions_museum ON exhibitions(museum);

-- Installation photos
CREATE TABLE IF NOT EXISTS installation_photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exhibition_id INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    original_filename TEXT,

    -- Image metadata
    width INTEGER,
    height INTEGER,
    format TEXT,

    -- Capture information
    camera_make TEXT,
    camera_model TEXT,
    capture_date TEXT,
    photographer TEXT,

    -- Location within museum
    room TEXT,
    view_type TEXT,          -- overview, detail, angle

    quality_score REAL NOT NULL DEFAULT 1.0,

    -- Processing lifecycle
    status TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'processing', 'done', 'failed'
    processed_at TEXT,
    error_message TEXT,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (exhibition_id) REFERENCES exhibitions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_photos_exhibition ON installation_photos(exhibition_id);
CREATE INDEX IF NOT EXISTS idx_photos_status ON installation_photos(status);

-- Artwork appearances in installation photos
CREATE TABLE IF NOT EXISTS artwork_appearances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    artwork_id INTEGER NOT NULL,
    photo_id INTEGER NOT NULL,

    -- Normalized bounding box (0-1)
    bbox_x REAL NOT NULL CHECK (bbox_x >= 0 AND bbox_x <= 1),
    bbox_y REAL NOT NULL CHECK (bbox_y >= 0 AND bbox_y <= 1),
    bbox_w REAL NOT NULL CHECK (bbox_w > 0 AND bbox_x + bbox_w <= 1),
    bbox_h REAL NOT NULL CHECK (bbox_h > 0 AND bbox_y + bbox_h <= 1),

    detection_confidence REAL NOT NULL CHECK (detection_confidence >= 0 AND detection_confidence <= 1),
    matching_confidence REAL NOT NULL CHECK (matching_confidence >= 0 AND matching_confidence <= 1),

    -- Verification by a human reviewer
    verification TEXT NOT NULL DEFAULT 'unverified',  -- 'unverified', 'confirmed', 'rejected'
    verified_by TEXT,
    verified_at TEXT,

    -- Visual context
    occlusion TEXT NOT NULL DEFAULT 'none',           -- 'none', 'partial', 'heavy'
    lighting TEXT NOT NULL DEFAULT 'good',            -- 'good', 'moderate', 'poor'
    partial_visibility INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (artwork_id) REFERENCES artworks(id) ON DELETE CASCADE,
    FOREIGN KEY (photo_id) REFERENCES installation_photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_appearances_artwork ON artwork_appearances(artwork_id);
CREATE INDEX IF NOT EXISTS idx_appearances_photo ON artwork_appearances(photo_id);
CREATE INDEX IF NOT EXISTS idx_appearances_verification ON artwork_appearances(verification);
"#;

/// Idempotent schema migrations applied after the base schema. Each entry
/// may fail harmlessly when already applied.
pub const MIGRATIONS: &[&str] = &[
    // Room for ALTER TABLE statements as the schema evolves.
];
