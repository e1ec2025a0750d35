use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CreateOrder, Entitlement, GrantRow, GrantStatus, Order, Product};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Orders ============

const ORDER_COLS: &str = "id, email, sku, provider, status, amount_cents, currency, raw, created_at";

fn order_from_row(row: &Row) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        email: row.get(1)?,
        sku: row.get(2)?,
        provider: row.get(3)?,
        status: row.get(4)?,
        amount_cents: row.get(5)?,
        currency: row.get(6)?,
        raw: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Insert one order row. Orders are evidence, not state: this is the only
/// write this subsystem ever performs on the table.
pub fn insert_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO orders (id, email, sku, provider, status, amount_cents, currency, raw, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            input.email,
            input.sku,
            input.provider,
            input.status,
            input.amount_cents,
            input.currency,
            input.raw,
            created_at,
        ],
    )?;

    Ok(Order {
        id,
        email: input.email.clone(),
        sku: input.sku.clone(),
        provider: input.provider.clone(),
        status: input.status.clone(),
        amount_cents: input.amount_cents,
        currency: input.currency.clone(),
        raw: input.raw.clone(),
        created_at,
    })
}

pub fn orders_by_email(conn: &Connection, email: &str) -> Result<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders WHERE email = ?1 ORDER BY created_at ASC",
        ORDER_COLS
    ))?;
    let rows = stmt.query_map(params![email], order_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ============ Entitlements ============

const ENTITLEMENT_COLS: &str = "id, email, user_id, product, active, created_at, updated_at";

fn entitlement_from_row(row: &Row) -> rusqlite::Result<Entitlement> {
    Ok(Entitlement {
        id: row.get(0)?,
        email: row.get(1)?,
        user_id: row.get(2)?,
        product: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Activate one (email, product) entitlement, idempotently.
/// The conflict target (email, product) makes repeated grants converge on a
/// single active row. This path never deactivates.
pub fn upsert_entitlement(conn: &Connection, email: &str, product: Product) -> Result<Entitlement> {
    let ts = now();
    conn.execute(
        "INSERT INTO entitlements (id, email, product, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?4)
         ON CONFLICT(email, product) DO UPDATE SET active = 1, updated_at = ?4",
        params![gen_id(), email, product.as_str(), ts],
    )?;

    // The upserted row keeps its original id on conflict, so read it back.
    get_entitlement(conn, email, product)?.ok_or_else(|| {
        crate::error::AppError::Internal("Entitlement missing after upsert".into())
    })
}

/// Deactivate an entitlement (revoke). Returns whether a row was changed.
/// Re-granting reactivates via the upsert above; rows are never deleted.
pub fn deactivate_entitlement(conn: &Connection, email: &str, product: Product) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE entitlements SET active = 0, updated_at = ?3
         WHERE email = ?1 AND product = ?2",
        params![email, product.as_str(), now()],
    )?;
    Ok(changed > 0)
}

pub fn get_entitlement(
    conn: &Connection,
    email: &str,
    product: Product,
) -> Result<Option<Entitlement>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entitlements WHERE email = ?1 AND product = ?2",
        ENTITLEMENT_COLS
    ))?;
    Ok(stmt
        .query_row(params![email, product.as_str()], entitlement_from_row)
        .optional()?)
}

pub fn entitlements_for_email(conn: &Connection, email: &str) -> Result<Vec<Entitlement>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entitlements WHERE email = ?1 ORDER BY product ASC",
        ENTITLEMENT_COLS
    ))?;
    let rows = stmt.query_map(params![email], entitlement_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ============ Agenda grant outbox ============

const GRANT_COLS: &str = "id, email, product, status, tries, last_try, last_error, created_at";

fn grant_from_row(row: &Row) -> rusqlite::Result<GrantRow> {
    let status: String = row.get(3)?;
    Ok(GrantRow {
        id: row.get(0)?,
        email: row.get(1)?,
        product: row.get(2)?,
        status: GrantStatus::from_str(&status).unwrap_or(GrantStatus::Error),
        tries: row.get::<_, i64>(4)? as u32,
        last_try: row.get(5)?,
        last_error: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Insert a fresh pending outbox row for an Agenda grant.
pub fn insert_grant(conn: &Connection, email: &str) -> Result<GrantRow> {
    let id = gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO agenda_grants (id, email, product, status, tries, created_at)
         VALUES (?1, ?2, 'agenda', 'pending', 0, ?3)",
        params![id, email, created_at],
    )?;

    Ok(GrantRow {
        id,
        email: email.to_string(),
        product: "agenda".to_string(),
        status: GrantStatus::Pending,
        tries: 0,
        last_try: None,
        last_error: None,
        created_at,
    })
}

pub fn get_grant(conn: &Connection, id: &str) -> Result<Option<GrantRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM agenda_grants WHERE id = ?1",
        GRANT_COLS
    ))?;
    Ok(stmt.query_row(params![id], grant_from_row).optional()?)
}

/// Pending rows eligible for a sweep: tries below the cap, oldest first so
/// no row starves behind newer arrivals.
pub fn pending_grants(conn: &Connection, max_tries: u32, batch_size: u32) -> Result<Vec<GrantRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM agenda_grants
         WHERE status = 'pending' AND tries < ?1
         ORDER BY created_at ASC
         LIMIT ?2",
        GRANT_COLS
    ))?;
    let rows = stmt.query_map(params![max_tries, batch_size], grant_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Record a successful delivery attempt: pending -> ok, tries +1,
/// last_error cleared.
pub fn record_grant_success(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE agenda_grants
         SET status = 'ok', tries = tries + 1, last_try = ?2, last_error = NULL
         WHERE id = ?1 AND status = 'pending'",
        params![id, now()],
    )?;
    Ok(())
}

/// Record a failed delivery attempt: tries +1, error captured.
///
/// Terminality is decided against the live counter inside the UPDATE, not
/// from the caller's snapshot: concurrent sweeps that each read the same
/// stale `tries` would otherwise both record non-terminal failures and
/// strand the row at the cap while still 'pending'. `terminal` forces the
/// dead-letter regardless of tries (unusable email).
///
/// Returns the row as stored after the update, or `None` when the row was
/// already terminal and nothing changed.
pub fn record_grant_failure(
    conn: &Connection,
    id: &str,
    error: &str,
    terminal: bool,
    max_tries: u32,
) -> Result<Option<GrantRow>> {
    let changed = conn.execute(
        "UPDATE agenda_grants
         SET status = CASE WHEN ?2 OR tries + 1 >= ?3 THEN 'error' ELSE 'pending' END,
             tries = tries + 1, last_try = ?4, last_error = ?5
         WHERE id = ?1 AND status = 'pending'",
        params![id, terminal, max_tries, now(), error],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_grant(conn, id)
}
