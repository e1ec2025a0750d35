use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Orders (append-only audit log of payment events)
        -- Never updated or deleted by this service. Duplicate webhook
        -- deliveries create duplicate rows; entitlement upserts absorb them.
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            email TEXT,
            sku TEXT NOT NULL CHECK (sku IN ('retos', 'agenda', 'combo')),
            provider TEXT NOT NULL CHECK (provider IN ('stripe', 'wompi')),
            status TEXT NOT NULL,
            amount_cents INTEGER,
            currency TEXT,
            raw TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_email ON orders(email);
        CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at);

        -- Entitlements (derived access state, one row per email+product)
        -- 'combo' is expanded before it reaches this table.
        CREATE TABLE IF NOT EXISTS entitlements (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            user_id TEXT,
            product TEXT NOT NULL CHECK (product IN ('retos', 'agenda')),
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(email, product)
        );
        CREATE INDEX IF NOT EXISTS idx_entitlements_email ON entitlements(email);

        -- Agenda grant outbox (durable at-least-once delivery queue)
        -- Rows are never deleted; terminal rows remain as the audit trail.
        CREATE TABLE IF NOT EXISTS agenda_grants (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            product TEXT NOT NULL DEFAULT 'agenda',
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'ok', 'error')),
            tries INTEGER NOT NULL DEFAULT 0,
            last_try INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agenda_grants_sweep
            ON agenda_grants(created_at) WHERE status = 'pending';
        "#,
    )
}
