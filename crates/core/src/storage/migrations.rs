//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: r#"
            -- Elections table (dummy rows anchor pre-created rooms)
            CREATE TABLE IF NOT EXISTS elections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contract TEXT NOT NULL,
                start_at TEXT NOT NULL,
                phase TEXT NOT NULL,
                live_round INTEGER,
                round_end_at TEXT,
                is_dummy INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- Rooms table
            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                election_id INTEGER NOT NULL,
                round INTEGER,
                room_index INTEGER,
                short_name TEXT NOT NULL,
                long_name TEXT NOT NULL,
                chat_handle TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                invited_at TEXT,
                FOREIGN KEY (election_id) REFERENCES elections(id),
                UNIQUE(election_id, round, room_index)
            );

            -- Room members table
            CREATE TABLE IF NOT EXISTS room_members (
                room_id TEXT NOT NULL,
                election_id INTEGER NOT NULL,
                round INTEGER NOT NULL,
                account TEXT NOT NULL,
                contact_handle TEXT,
                added_at TEXT NOT NULL,
                PRIMARY KEY (room_id, account),
                FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
                UNIQUE(election_id, round, account)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Add election uniqueness and room indexes",
        sql: r#"
            -- One election per contract and start date, one dummy per contract
            CREATE UNIQUE INDEX IF NOT EXISTS idx_elections_start
                ON elections(contract, start_at) WHERE is_dummy = 0;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_elections_dummy
                ON elections(contract) WHERE is_dummy = 1;

            CREATE INDEX IF NOT EXISTS idx_rooms_round ON rooms(election_id, round);
            CREATE INDEX IF NOT EXISTS idx_room_members_round ON room_members(election_id, round);
        "#,
    },
    Migration {
        version: 3,
        description: "Add reminder definitions and delivery records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                election_id INTEGER NOT NULL,
                reminder_group TEXT NOT NULL,
                offset_minutes INTEGER NOT NULL,
                round INTEGER,
                fire_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (election_id) REFERENCES elections(id)
            );

            -- A rule exists once per election, group, offset and round
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reminders_rule
                ON reminders(election_id, reminder_group, offset_minutes, IFNULL(round, -1));

            -- At most one delivery per reminder and recipient
            CREATE TABLE IF NOT EXISTS reminder_deliveries (
                reminder_id TEXT NOT NULL,
                account TEXT NOT NULL,
                outcome TEXT NOT NULL,
                attempted_at TEXT NOT NULL,
                PRIMARY KEY (reminder_id, account),
                FOREIGN KEY (reminder_id) REFERENCES reminders(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 4,
        description: "Add contact directory",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contacts (
                account TEXT PRIMARY KEY,
                handle TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 5,
        description: "Track pending post-round cleanup",
        sql: r#"
            ALTER TABLE elections ADD COLUMN cleanup_round INTEGER;
            ALTER TABLE elections ADD COLUMN cleanup_round_end TEXT;
        "#,
    },
];

/// Initialize the migrations table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version
fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

/// Record that a migration was applied
fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Run all pending migrations
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let current_version = get_current_version(conn)?;
    info!(current_version, "Checking for pending migrations");

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );

            conn.execute_batch(migration.sql)?;
            record_migration(conn, migration)?;

            info!(version = migration.version, "Migration complete");
        }
    }

    let new_version = get_current_version(conn)?;
    if new_version > current_version {
        info!(
            from = current_version,
            to = new_version,
            "Database schema updated"
        );
    }

    Ok(())
}
