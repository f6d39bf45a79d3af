use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::errors::AppResult;

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseContext> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(&db_path, flags)?;
    configure(&connection, true)?;
    run_migrations(&connection)?;

    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        "database context established"
    );
    Ok(DatabaseContext {
        connection,
        path: db_path,
    })
}

pub fn open_in_memory() -> AppResult<Connection> {
    let connection = Connection::open_in_memory()?;
    configure(&connection, false)?;
    run_migrations(&connection)?;
    Ok(connection)
}

fn configure(connection: &Connection, write_ahead_log: bool) -> AppResult<()> {
    if write_ahead_log {
        connection.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            destination TEXT NOT NULL,
            country TEXT,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );

        CREATE TABLE IF NOT EXISTS places (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            name_en TEXT,
            category TEXT NOT NULL,
            note TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            formatted_address TEXT NOT NULL,
            external_place_id TEXT,
            maps_url TEXT,
            rating REAL,
            rating_count INTEGER,
            price_level INTEGER,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS source_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            source_type TEXT NOT NULL CHECK (source_type IN ('photo', 'text')),
            image_url TEXT,
            mime_type TEXT,
            content TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processed', 'failed')),
            raw_text TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS photo_places (
            place_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            linked_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            PRIMARY KEY (place_id, item_id),
            FOREIGN KEY (place_id) REFERENCES places(id) ON DELETE CASCADE,
            FOREIGN KEY (item_id) REFERENCES source_items(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS text_places (
            place_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            linked_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            PRIMARY KEY (place_id, item_id),
            FOREIGN KEY (place_id) REFERENCES places(id) ON DELETE CASCADE,
            FOREIGN KEY (item_id) REFERENCES source_items(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_places_project ON places(project_id);
        CREATE INDEX IF NOT EXISTS idx_source_items_status
            ON source_items(project_id, source_type, status);
        "#,
    )?;

    Ok(())
}
