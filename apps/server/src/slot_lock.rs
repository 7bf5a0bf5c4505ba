//! Exclusive write section for slot-occupancy changes.
//!
//! SQLite has no row locks, so the lock is the database write lock itself:
//! `BEGIN IMMEDIATE` takes it up front and waits at most `busy_timeout`
//! for another writer to finish. Everything between acquire and commit sees
//! a stable view of every slot, which covers the existence check and the
//! insert as one step.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use crate::error::{BookingError, BookingResult};

pub struct SlotLock {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl SlotLock {
    pub async fn acquire(db: &SqlitePool) -> BookingResult<Self> {
        let mut conn = db.acquire().await.map_err(BookingError::from_lock_wait)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(BookingError::from_lock_wait)?;
        Ok(Self { conn, open: true })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub async fn commit(mut self) -> BookingResult<()> {
        sqlx::query("COMMIT")
            .execute(&mut *self.conn)
            .await
            .map_err(BookingError::from_lock_wait)?;
        self.open = false;
        Ok(())
    }

    pub async fn rollback(mut self) {
        match sqlx::query("ROLLBACK").execute(&mut *self.conn).await {
            Ok(_) => self.open = false,
            Err(e) => tracing::warn!("Slot lock rollback failed: {}", e),
        }
    }
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        if self.open {
            // The transaction is still open; closing the connection makes
            // SQLite roll it back instead of handing it to the next caller.
            tracing::warn!("Slot lock dropped inside a transaction, discarding connection");
            self.conn.close_on_drop();
        }
    }
}
