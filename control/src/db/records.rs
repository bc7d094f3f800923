use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

/// List record identifiers in a category
pub fn list_ids(conn: &Connection, category: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT id FROM records WHERE category = ?1 ORDER BY id")
        .context("Failed to prepare statement")?;

    let ids = stmt
        .query_map(rusqlite::params![category], |row| row.get(0))
        .context("Failed to query records")?
        .collect::<Result<Vec<String>, _>>()
        .context("Failed to collect record ids")?;

    Ok(ids)
}

/// Get a record body, `None` if absent
pub fn get_record(conn: &Connection, category: &str, id: &str) -> Result<Option<String>> {
    let body = conn
        .query_row(
            "SELECT body FROM records WHERE category = ?1 AND id = ?2",
            rusqlite::params![category, id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to get record")?;

    Ok(body)
}

/// Insert or replace a record
pub fn upsert_record(conn: &Connection, category: &str, id: &str, body: &str) -> Result<()> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();

    conn.execute(
        "INSERT INTO records (category, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (category, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        rusqlite::params![category, id, body, now],
    )
    .context("Failed to upsert record")?;

    Ok(())
}

/// Delete a record. Returns the number of rows removed (0 if it did not exist).
pub fn delete_record(conn: &Connection, category: &str, id: &str) -> Result<usize> {
    let rows = conn
        .execute(
            "DELETE FROM records WHERE category = ?1 AND id = ?2",
            rusqlite::params![category, id],
        )
        .context("Failed to delete record")?;

    Ok(rows)
}
