//! Branch, barber and service lookups.

use sqlx::SqlitePool;

use crate::error::{BookingError, BookingResult};
use crate::models::{Barber, Branch, Service};

pub async fn branch_by_id(db: &SqlitePool, id: i64) -> BookingResult<Branch> {
    sqlx::query_as::<_, Branch>("SELECT id, name FROM branches WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| BookingError::not_found("branch", id))
}

pub async fn barber_by_id(db: &SqlitePool, id: i64) -> BookingResult<Barber> {
    sqlx::query_as::<_, Barber>(
        "SELECT id, branch_id, name, telegram_chat_id FROM barbers WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| BookingError::not_found("barber", id))
}

pub async fn service_by_id(db: &SqlitePool, id: i64) -> BookingResult<Service> {
    sqlx::query_as::<_, Service>("SELECT id, name, price FROM services WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| BookingError::not_found("service", id))
}

/// Looks up each id in order. Unknown ids are dropped.
pub async fn services_by_ids(db: &SqlitePool, ids: &[i64]) -> BookingResult<Vec<Service>> {
    let mut services = Vec::with_capacity(ids.len());
    for &id in ids {
        match service_by_id(db, id).await {
            Ok(service) => services.push(service),
            Err(BookingError::NotFound { .. }) => {
                tracing::warn!(service_id = id, "Unknown additional service ignored");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(services)
}

/// Comma-joined service names, `None` when there are none.
pub fn join_names(services: &[Service]) -> Option<String> {
    if services.is_empty() {
        return None;
    }
    Some(
        services
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    )
}
