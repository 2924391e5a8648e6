use rusqlite::Connection;

use crate::error::Result;

/// Initialise the ledger schema in `conn`.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
/// Amounts and balances are decimal strings; timestamps are Unix seconds.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            address     TEXT    NOT NULL PRIMARY KEY,
            balance     TEXT    NOT NULL DEFAULT '0',
            updated_at  INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS providers (
            address       TEXT    NOT NULL PRIMARY KEY,
            name          TEXT    NOT NULL,
            description   TEXT    NOT NULL DEFAULT '',
            is_active     INTEGER NOT NULL DEFAULT 1,
            registered_at INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS subscriptions (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            subscriber        TEXT    NOT NULL,
            provider          TEXT    NOT NULL REFERENCES providers (address),
            amount            TEXT    NOT NULL,
            interval_secs     INTEGER NOT NULL,
            next_payment_time INTEGER NOT NULL,
            is_active         INTEGER NOT NULL DEFAULT 1,
            created_at        INTEGER NOT NULL,
            retry_count       INTEGER NOT NULL DEFAULT 0,
            cancelled_at      INTEGER             -- NULL while active
        ) STRICT;

        -- Snapshot query: WHERE is_active = 1 ORDER BY next_payment_time, id
        CREATE INDEX IF NOT EXISTS idx_subscriptions_due
            ON subscriptions (is_active, next_payment_time, id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber
            ON subscriptions (subscriber);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_provider
            ON subscriptions (provider);

        CREATE TABLE IF NOT EXISTS payment_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id INTEGER NOT NULL REFERENCES subscriptions (id),
            cycle           INTEGER NOT NULL,
            subscriber      TEXT    NOT NULL,
            provider        TEXT    NOT NULL,
            amount          TEXT    NOT NULL,
            timestamp       INTEGER NOT NULL,
            transaction_id  TEXT    NOT NULL UNIQUE,
            UNIQUE (subscription_id, cycle)   -- one payment per billing cycle
        ) STRICT;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('accounts', 'providers', 'subscriptions', 'payment_events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
