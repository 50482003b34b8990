use rusqlite::Connection;

/// Initialize the database schema.
///
/// Idempotent; safe to run on every open.
///
/// # Errors
///
/// Returns an error if table creation fails.
pub fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Key-value table for everything that is a single value: last reset
    // date, the two pattern lists (JSON arrays), the api key and the
    // settings object.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Per-hostname accumulated milliseconds for the current day.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_usage (
            hostname TEXT PRIMARY KEY,
            ms INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}
