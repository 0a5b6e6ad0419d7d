use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::data::{
    Category, CategoryId, Design, DesignId, ExportRecord, Medium, MediumId, NewDesign,
};
use crate::error::CatalogError;

type CatalogResult<T> = Result<T, CatalogError>;

const DESIGN_COLUMNS: &str =
    "id, name, category_id, is_favorite, source_file_ref, preview_image_ref, last_modified";

/// The Catalog manages the SQLite catalog database.
/// It stores designs, categories, registered media and export records.
///
/// The connection sits behind a mutex so one `Catalog` can be shared
/// (`Arc<Catalog>`) between the discovery, registration and export services.
/// Uniqueness of medium names and tokens is enforced by the schema, not by
/// read-then-insert checks.
pub struct Catalog {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Catalog {
    /// Open or create the catalog at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> CatalogResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;

        info!("📁 Catalog initialized at: {}", db_path.display());

        let catalog = Catalog {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Catalog that lives only as long as the process. Used by tests.
    pub fn open_in_memory() -> CatalogResult<Self> {
        let catalog = Catalog {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Get the path where the database should be stored by default
    ///
    /// - Linux: ~/.local/share/stitch-catalog/catalog.db
    /// - macOS: ~/Library/Application Support/stitch-catalog/catalog.db
    /// - Windows: %APPDATA%\stitch-catalog\catalog.db
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("stitch-catalog");
        path.push("catalog.db");
        Some(path)
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(&self) -> CatalogResult<()> {
        let conn = self.session();
        conn.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS categories (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL UNIQUE,
                description     TEXT
            );

            CREATE TABLE IF NOT EXISTS designs (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                name                TEXT NOT NULL UNIQUE,
                category_id         INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                is_favorite         INTEGER NOT NULL DEFAULT 0,
                source_file_ref     TEXT NOT NULL,
                preview_image_ref   TEXT NOT NULL,
                last_modified       INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS media (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL UNIQUE,
                token           TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS export_records (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                design_id       INTEGER NOT NULL REFERENCES designs(id),
                medium_id       INTEGER NOT NULL REFERENCES media(id),
                exported_at     INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_export_records_medium
                ON export_records(medium_id);

            CREATE INDEX IF NOT EXISTS idx_export_records_design
                ON export_records(design_id);",
        )?;

        debug!("Catalog schema initialized");
        Ok(())
    }

    /// Path to the database file, `None` for in-memory catalogs
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Exclusive access to the connection for multi-statement work.
    ///
    /// A poisoned lock is recovered: SQLite rolls back any transaction that
    /// was open when the panicking thread dropped it.
    pub fn session(&self) -> Session<'_> {
        Session {
            conn: self.conn.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    // ========== Categories ==========

    pub fn insert_category(&self, name: &str, description: Option<&str>) -> CatalogResult<Category> {
        let session = self.session();
        session
            .conn
            .execute(
                "INSERT INTO categories (name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .map_err(|e| CatalogError::from_insert(e, name))?;

        Ok(Category {
            id: session.conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    /// Delete a category. Its designs keep existing with no category.
    pub fn delete_category(&self, id: CategoryId) -> CatalogResult<bool> {
        let mut session = self.session();
        let now = Utc::now().timestamp();
        let tx = session.conn.transaction()?;

        // ON DELETE SET NULL does not touch last_modified, so clear it here
        tx.execute(
            "UPDATE designs SET category_id = NULL, last_modified = ?1 WHERE category_id = ?2",
            params![now, id],
        )?;
        let removed = tx.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // ========== Designs ==========

    /// Insert a new design and return it with its generated ID
    pub fn insert_design(&self, design: &NewDesign) -> CatalogResult<Design> {
        let session = self.session();
        let now = Utc::now();

        session
            .conn
            .execute(
                "INSERT INTO designs (name, category_id, source_file_ref, preview_image_ref, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    design.name,
                    design.category_id,
                    design.source_file_ref,
                    design.preview_image_ref,
                    now.timestamp(),
                ],
            )
            .map_err(|e| CatalogError::from_insert(e, &design.name))?;

        Ok(Design {
            id: session.conn.last_insert_rowid(),
            name: design.name.clone(),
            category_id: design.category_id,
            is_favorite: false,
            source_file_ref: design.source_file_ref.clone(),
            preview_image_ref: design.preview_image_ref.clone(),
            last_modified: timestamp(now.timestamp()),
        })
    }

    pub fn design(&self, id: DesignId) -> CatalogResult<Option<Design>> {
        let session = self.session();
        let design = session
            .conn
            .query_row(
                &format!("SELECT {DESIGN_COLUMNS} FROM designs WHERE id = ?1"),
                params![id],
                design_from_row,
            )
            .optional()?;
        Ok(design)
    }

    pub fn design_by_name(&self, name: &str) -> CatalogResult<Option<Design>> {
        let session = self.session();
        let design = session
            .conn
            .query_row(
                &format!("SELECT {DESIGN_COLUMNS} FROM designs WHERE name = ?1"),
                params![name],
                design_from_row,
            )
            .optional()?;
        Ok(design)
    }

    /// Get all designs, newest first
    pub fn designs(&self) -> CatalogResult<Vec<Design>> {
        let session = self.session();
        let mut stmt = session
            .conn
            .prepare(&format!("SELECT {DESIGN_COLUMNS} FROM designs ORDER BY id DESC"))?;

        let designs = stmt
            .query_map([], design_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(designs)
    }

    pub fn design_count(&self) -> CatalogResult<i64> {
        let session = self.session();
        let count = session
            .conn
            .query_row("SELECT COUNT(*) FROM designs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Mark or unmark a design as favorite. Returns false if the design doesn't exist.
    pub fn set_favorite(&self, id: DesignId, favorite: bool) -> CatalogResult<bool> {
        let session = self.session();
        let updated = session.conn.execute(
            "UPDATE designs SET is_favorite = ?1, last_modified = ?2 WHERE id = ?3",
            params![favorite, Utc::now().timestamp(), id],
        )?;
        Ok(updated > 0)
    }

    // ========== Media ==========

    /// Insert a newly registered medium.
    ///
    /// Name and token collisions come back as `NameConflict` / `DuplicateToken`
    /// from the UNIQUE constraints.
    pub fn insert_medium(&self, name: &str, token: &str) -> CatalogResult<Medium> {
        let session = self.session();
        session
            .conn
            .execute(
                "INSERT INTO media (name, token) VALUES (?1, ?2)",
                params![name, token],
            )
            .map_err(|e| CatalogError::from_insert(e, name))?;

        Ok(Medium {
            id: session.conn.last_insert_rowid(),
            name: name.to_string(),
            identity_token: token.to_string(),
        })
    }

    pub fn medium(&self, id: MediumId) -> CatalogResult<Option<Medium>> {
        self.medium_where("id = ?1", &id)
    }

    /// Look up a medium by exact token match
    pub fn medium_by_token(&self, token: &str) -> CatalogResult<Option<Medium>> {
        self.medium_where("token = ?1", &token)
    }

    pub fn medium_by_name(&self, name: &str) -> CatalogResult<Option<Medium>> {
        self.medium_where("name = ?1", &name)
    }

    fn medium_where(&self, clause: &str, value: &dyn rusqlite::ToSql) -> CatalogResult<Option<Medium>> {
        let session = self.session();
        let medium = session
            .conn
            .query_row(
                &format!("SELECT id, name, token FROM media WHERE {clause}"),
                params![value],
                medium_from_row,
            )
            .optional()?;
        Ok(medium)
    }

    pub fn media(&self) -> CatalogResult<Vec<Medium>> {
        let session = self.session();
        let mut stmt = session
            .conn
            .prepare("SELECT id, name, token FROM media ORDER BY id")?;
        let media = stmt
            .query_map([], medium_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(media)
    }

    pub fn token_exists(&self, token: &str) -> CatalogResult<bool> {
        Ok(self.medium_by_token(token)?.is_some())
    }

    // ========== Export records ==========

    /// The export record for a design on a medium, if any
    pub fn export_record(
        &self,
        medium_id: MediumId,
        design_id: DesignId,
    ) -> CatalogResult<Option<ExportRecord>> {
        let session = self.session();
        let record = session
            .conn
            .query_row(
                "SELECT id, design_id, medium_id, exported_at FROM export_records
                 WHERE medium_id = ?1 AND design_id = ?2
                 ORDER BY id LIMIT 1",
                params![medium_id, design_id],
                export_record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All export records for a medium, oldest first
    pub fn export_records_for_medium(&self, medium_id: MediumId) -> CatalogResult<Vec<ExportRecord>> {
        let session = self.session();
        let mut stmt = session.conn.prepare(
            "SELECT id, design_id, medium_id, exported_at FROM export_records
             WHERE medium_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![medium_id], export_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Delete the export records of a design on a medium.
    /// Returns false if there was nothing to delete.
    pub fn delete_export_record(&self, medium_id: MediumId, design_id: DesignId) -> CatalogResult<bool> {
        let session = self.session();
        let removed = session.conn.execute(
            "DELETE FROM export_records WHERE medium_id = ?1 AND design_id = ?2",
            params![medium_id, design_id],
        )?;
        Ok(removed > 0)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Locked connection handed out by [`Catalog::session`]
pub struct Session<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl Session<'_> {
    /// Begin a transaction. Dropping the returned value without calling
    /// [`CatalogTx::commit`] rolls it back.
    pub fn transaction(&mut self) -> CatalogResult<CatalogTx<'_>> {
        Ok(CatalogTx {
            tx: self.conn.transaction()?,
        })
    }
}

/// A pending catalog write
pub struct CatalogTx<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl CatalogTx<'_> {
    /// Insert an export record inside the transaction. It only becomes
    /// visible to other sessions after `commit`.
    pub fn insert_export_record(
        &self,
        design_id: DesignId,
        medium_id: MediumId,
    ) -> CatalogResult<ExportRecord> {
        let now = Utc::now().timestamp();
        self.tx.execute(
            "INSERT INTO export_records (design_id, medium_id, exported_at) VALUES (?1, ?2, ?3)",
            params![design_id, medium_id, now],
        )?;

        Ok(ExportRecord {
            id: self.tx.last_insert_rowid(),
            design_id,
            medium_id,
            exported_at: timestamp(now),
        })
    }

    pub fn commit(self) -> CatalogResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> CatalogResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn design_from_row(row: &Row<'_>) -> rusqlite::Result<Design> {
    Ok(Design {
        id: row.get(0)?,
        name: row.get(1)?,
        category_id: row.get(2)?,
        is_favorite: row.get(3)?,
        source_file_ref: row.get(4)?,
        preview_image_ref: row.get(5)?,
        last_modified: timestamp(row.get(6)?),
    })
}

fn medium_from_row(row: &Row<'_>) -> rusqlite::Result<Medium> {
    Ok(Medium {
        id: row.get(0)?,
        name: row.get(1)?,
        identity_token: row.get(2)?,
    })
}

fn export_record_from_row(row: &Row<'_>) -> rusqlite::Result<ExportRecord> {
    Ok(ExportRecord {
        id: row.get(0)?,
        design_id: row.get(1)?,
        medium_id: row.get(2)?,
        exported_at: timestamp(row.get(3)?),
    })
}
