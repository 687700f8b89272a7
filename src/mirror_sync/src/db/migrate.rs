//! Schema bootstrap for `init-schema`.
//!
//! Plain `CREATE TABLE IF NOT EXISTS` statements, kept in lockstep with
//! `schema.rs`. Idempotent: safe to run on every deploy.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use tracing::info;

use crate::error::MirrorError;

const DDL: &[&str] = &[
    // ── POS reference mirror ──
    "CREATE TABLE IF NOT EXISTS pos_entity (
        pk BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL,
        root_type VARCHAR(50) NOT NULL,
        name VARCHAR(500),
        code VARCHAR(200),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB,
        CONSTRAINT uq_pos_entity_id_root_type UNIQUE (id, root_type)
    )",
    "CREATE INDEX IF NOT EXISTS ix_pos_entity_root_type ON pos_entity (root_type)",
    "CREATE TABLE IF NOT EXISTS pos_supplier (
        id UUID PRIMARY KEY,
        name VARCHAR(500),
        code VARCHAR(200),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        card_number VARCHAR(100),
        taxpayer_id_number VARCHAR(100),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS pos_department (
        id UUID PRIMARY KEY,
        parent_id UUID,
        name VARCHAR(500),
        code VARCHAR(200),
        department_type VARCHAR(50),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS pos_store (
        id UUID PRIMARY KEY,
        parent_id UUID,
        name VARCHAR(500),
        code VARCHAR(200),
        department_type VARCHAR(50),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS pos_group (
        id UUID PRIMARY KEY,
        parent_id UUID,
        name VARCHAR(500),
        code VARCHAR(200),
        department_type VARCHAR(50),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS pos_product_group (
        id UUID PRIMARY KEY,
        parent_id UUID,
        name VARCHAR(500),
        code VARCHAR(200),
        num VARCHAR(200),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS pos_product (
        id UUID PRIMARY KEY,
        parent_id UUID,
        name VARCHAR(500),
        code VARCHAR(200),
        num VARCHAR(200),
        description TEXT,
        product_type VARCHAR(50),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        main_unit UUID,
        category UUID,
        accounting_category UUID,
        tax_category UUID,
        default_sale_price NUMERIC(15, 4),
        unit_weight NUMERIC(15, 6),
        unit_capacity NUMERIC(15, 6),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE INDEX IF NOT EXISTS ix_pos_product_parent ON pos_product (parent_id)",
    "CREATE TABLE IF NOT EXISTS pos_employee (
        id UUID PRIMARY KEY,
        name VARCHAR(500),
        code VARCHAR(200),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        first_name VARCHAR(200),
        middle_name VARCHAR(200),
        last_name VARCHAR(200),
        role_id UUID,
        chat_id BIGINT UNIQUE,
        department_id UUID,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS pos_employee_role (
        id UUID PRIMARY KEY,
        name VARCHAR(500),
        code VARCHAR(200),
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        payment_per_hour NUMERIC(15, 4),
        steady_salary NUMERIC(15, 4),
        schedule_type VARCHAR(50),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    // ── finance reference mirror ──
    "CREATE TABLE IF NOT EXISTS fin_category (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        parent_id BIGINT,
        group_name VARCHAR(50),
        kind VARCHAR(50),
        pnl_type VARCHAR(100),
        description TEXT,
        is_built_in BOOLEAN,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_moneybag (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        kind VARCHAR(50),
        number VARCHAR(200),
        currency VARCHAR(10),
        balance NUMERIC(15, 2),
        surplus NUMERIC(15, 2),
        surplus_timestamp BIGINT,
        group_id BIGINT,
        archived BOOLEAN,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_moneybag_group (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_partner (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        inn VARCHAR(50),
        group_id BIGINT,
        comment TEXT,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_direction (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        parent_id BIGINT,
        description TEXT,
        archived BOOLEAN,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_goods (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        price NUMERIC(15, 2),
        unit VARCHAR(50),
        archived BOOLEAN,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_obtaining (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        partner_id BIGINT,
        date VARCHAR(50),
        sum NUMERIC(15, 2),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_job (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        price NUMERIC(15, 2),
        unit VARCHAR(50),
        archived BOOLEAN,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_deal (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        partner_id BIGINT,
        direction_id BIGINT,
        status VARCHAR(50),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_obligation_status (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_obligation (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        partner_id BIGINT,
        status_id BIGINT,
        sum NUMERIC(15, 2),
        date VARCHAR(50),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_pnl_category (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        parent_id BIGINT,
        kind VARCHAR(50),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    "CREATE TABLE IF NOT EXISTS fin_employee (
        id BIGINT PRIMARY KEY,
        name VARCHAR(500),
        post VARCHAR(200),
        archived BOOLEAN,
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB
    )",
    // ── operational ──
    "CREATE TABLE IF NOT EXISTS stock_balance (
        pk BIGSERIAL PRIMARY KEY,
        store_id UUID NOT NULL,
        store_name VARCHAR(500),
        product_id UUID NOT NULL,
        product_name VARCHAR(500),
        amount NUMERIC(15, 6) NOT NULL DEFAULT 0,
        money NUMERIC(15, 4),
        synced_at TIMESTAMP NOT NULL,
        raw_json JSONB,
        CONSTRAINT uq_stock_balance_store_product UNIQUE (store_id, product_id)
    )",
    "CREATE TABLE IF NOT EXISTS min_stock_level (
        pk BIGSERIAL PRIMARY KEY,
        product_id UUID NOT NULL,
        department_id UUID NOT NULL,
        product_name VARCHAR(500),
        min_level NUMERIC(15, 6) NOT NULL,
        max_level NUMERIC(15, 6),
        synced_at TIMESTAMP NOT NULL,
        CONSTRAINT uq_min_stock_product_department UNIQUE (product_id, department_id)
    )",
    "CREATE TABLE IF NOT EXISTS sync_log (
        id BIGSERIAL PRIMARY KEY,
        entity_type VARCHAR(100) NOT NULL,
        started_at TIMESTAMP NOT NULL,
        finished_at TIMESTAMP,
        status VARCHAR(20) NOT NULL DEFAULT 'running',
        records_synced INTEGER,
        error_message TEXT,
        triggered_by VARCHAR(100)
    )",
    "CREATE INDEX IF NOT EXISTS ix_sync_log_entity_type ON sync_log (entity_type)",
    // ── workflow ──
    "CREATE TABLE IF NOT EXISTS pending_writeoff (
        doc_id VARCHAR(16) PRIMARY KEY,
        document_uuid UUID NOT NULL,
        created_at TIMESTAMP NOT NULL,
        author_chat_id BIGINT NOT NULL,
        author_name VARCHAR(500) NOT NULL,
        store_id UUID NOT NULL,
        store_name VARCHAR(500) NOT NULL,
        account_id UUID NOT NULL,
        account_name VARCHAR(500) NOT NULL,
        reason TEXT NOT NULL,
        department_id UUID,
        items JSONB NOT NULL,
        admin_msg_ids JSONB NOT NULL DEFAULT '{}'::jsonb,
        is_locked BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE TABLE IF NOT EXISTS writeoff_history (
        id BIGSERIAL PRIMARY KEY,
        author_chat_id BIGINT NOT NULL,
        author_name VARCHAR(500),
        document_uuid UUID NOT NULL,
        store_name VARCHAR(500),
        account_name VARCHAR(500),
        reason TEXT,
        items JSONB NOT NULL,
        created_at TIMESTAMP NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_writeoff_history_author ON writeoff_history (author_chat_id)",
    "CREATE TABLE IF NOT EXISTS invoice_template (
        id BIGSERIAL PRIMARY KEY,
        owner_chat_id BIGINT NOT NULL,
        name VARCHAR(200) NOT NULL,
        store_id UUID NOT NULL,
        supplier_id UUID NOT NULL,
        items JSONB NOT NULL,
        created_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS product_request (
        id BIGSERIAL PRIMARY KEY,
        created_at TIMESTAMP NOT NULL,
        author_chat_id BIGINT NOT NULL,
        author_name VARCHAR(500) NOT NULL,
        department_id UUID,
        store_id UUID,
        section VARCHAR(20) NOT NULL,
        items JSONB NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'open',
        receiver_msg_ids JSONB NOT NULL DEFAULT '{}'::jsonb,
        is_locked BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE TABLE IF NOT EXISTS active_stoplist (
        pk BIGSERIAL PRIMARY KEY,
        product_id VARCHAR(64) NOT NULL,
        name VARCHAR(500),
        balance NUMERIC(15, 3) NOT NULL DEFAULT 0,
        terminal_group_id VARCHAR(64),
        organization_id VARCHAR(64),
        synced_at TIMESTAMP NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_active_stoplist_product_tg
        ON active_stoplist (product_id, COALESCE(terminal_group_id, ''))",
    "CREATE TABLE IF NOT EXISTS stoplist_history (
        id BIGSERIAL PRIMARY KEY,
        product_id VARCHAR(64) NOT NULL,
        name VARCHAR(500),
        terminal_group_id VARCHAR(64),
        started_at TIMESTAMP NOT NULL,
        ended_at TIMESTAMP,
        duration_seconds BIGINT
    )",
    "CREATE TABLE IF NOT EXISTS stoplist_message (
        chat_id BIGINT PRIMARY KEY,
        message_id BIGINT NOT NULL,
        snapshot_hash VARCHAR(64) NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS stock_alert_message (
        chat_id BIGINT PRIMARY KEY,
        message_id BIGINT NOT NULL,
        snapshot_hash VARCHAR(64) NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS cloud_token (
        id BIGSERIAL PRIMARY KEY,
        token TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bot_admin (
        id BIGSERIAL PRIMARY KEY,
        chat_id BIGINT NOT NULL UNIQUE,
        employee_id UUID NOT NULL,
        employee_name VARCHAR(500),
        added_at TIMESTAMP NOT NULL,
        added_by BIGINT
    )",
    "CREATE TABLE IF NOT EXISTS request_receiver (
        id BIGSERIAL PRIMARY KEY,
        chat_id BIGINT NOT NULL,
        section VARCHAR(20) NOT NULL,
        added_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ocr_document (
        id BIGSERIAL PRIMARY KEY,
        chat_id BIGINT NOT NULL,
        supplier_id UUID,
        supplier_name VARCHAR(500),
        store_id UUID,
        status VARCHAR(20) NOT NULL DEFAULT 'staged',
        warnings JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ocr_item (
        id BIGSERIAL PRIMARY KEY,
        document_id BIGINT NOT NULL REFERENCES ocr_document (id) ON DELETE CASCADE,
        line_no INTEGER NOT NULL,
        name VARCHAR(500) NOT NULL,
        product_id UUID,
        amount NUMERIC(15, 4) NOT NULL,
        price NUMERIC(15, 4),
        total NUMERIC(15, 4),
        vat_percent NUMERIC(5, 2),
        rate_unknown BOOLEAN NOT NULL DEFAULT FALSE
    )",
];

/// Creates every table the workspace uses. Idempotent.
pub async fn init_schema(conn: &mut AsyncPgConnection) -> Result<(), MirrorError> {
    for statement in DDL {
        conn.batch_execute(statement).await?;
    }
    info!(statements = DDL.len(), "schema initialised");
    Ok(())
}
