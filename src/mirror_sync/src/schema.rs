// Table definitions, kept in lockstep with db/migrate.rs.

// ── POS reference mirror ──

diesel::table! {
    pos_entity (pk) {
        pk -> Int8,
        id -> Uuid,
        root_type -> Text,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        deleted -> Bool,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_supplier (id) {
        id -> Uuid,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        deleted -> Bool,
        card_number -> Nullable<Text>,
        taxpayer_id_number -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_department (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        department_type -> Nullable<Text>,
        deleted -> Bool,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_store (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        department_type -> Nullable<Text>,
        deleted -> Bool,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_group (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        department_type -> Nullable<Text>,
        deleted -> Bool,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_product_group (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        num -> Nullable<Text>,
        deleted -> Bool,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_product (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        num -> Nullable<Text>,
        description -> Nullable<Text>,
        product_type -> Nullable<Text>,
        deleted -> Bool,
        main_unit -> Nullable<Uuid>,
        category -> Nullable<Uuid>,
        accounting_category -> Nullable<Uuid>,
        tax_category -> Nullable<Uuid>,
        default_sale_price -> Nullable<Numeric>,
        unit_weight -> Nullable<Numeric>,
        unit_capacity -> Nullable<Numeric>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_employee (id) {
        id -> Uuid,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        deleted -> Bool,
        first_name -> Nullable<Text>,
        middle_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        role_id -> Nullable<Uuid>,
        chat_id -> Nullable<Int8>,
        department_id -> Nullable<Uuid>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    pos_employee_role (id) {
        id -> Uuid,
        name -> Nullable<Text>,
        code -> Nullable<Text>,
        deleted -> Bool,
        payment_per_hour -> Nullable<Numeric>,
        steady_salary -> Nullable<Numeric>,
        schedule_type -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

// ── finance reference mirror (integer ids) ──

diesel::table! {
    fin_category (id) {
        id -> Int8,
        name -> Nullable<Text>,
        parent_id -> Nullable<Int8>,
        group_name -> Nullable<Text>,
        kind -> Nullable<Text>,
        pnl_type -> Nullable<Text>,
        description -> Nullable<Text>,
        is_built_in -> Nullable<Bool>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_moneybag (id) {
        id -> Int8,
        name -> Nullable<Text>,
        kind -> Nullable<Text>,
        number -> Nullable<Text>,
        currency -> Nullable<Text>,
        balance -> Nullable<Numeric>,
        surplus -> Nullable<Numeric>,
        surplus_timestamp -> Nullable<Int8>,
        group_id -> Nullable<Int8>,
        archived -> Nullable<Bool>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_moneybag_group (id) {
        id -> Int8,
        name -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_partner (id) {
        id -> Int8,
        name -> Nullable<Text>,
        inn -> Nullable<Text>,
        group_id -> Nullable<Int8>,
        comment -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_direction (id) {
        id -> Int8,
        name -> Nullable<Text>,
        parent_id -> Nullable<Int8>,
        description -> Nullable<Text>,
        archived -> Nullable<Bool>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_goods (id) {
        id -> Int8,
        name -> Nullable<Text>,
        price -> Nullable<Numeric>,
        unit -> Nullable<Text>,
        archived -> Nullable<Bool>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_obtaining (id) {
        id -> Int8,
        name -> Nullable<Text>,
        partner_id -> Nullable<Int8>,
        date -> Nullable<Text>,
        sum -> Nullable<Numeric>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_job (id) {
        id -> Int8,
        name -> Nullable<Text>,
        price -> Nullable<Numeric>,
        unit -> Nullable<Text>,
        archived -> Nullable<Bool>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_deal (id) {
        id -> Int8,
        name -> Nullable<Text>,
        partner_id -> Nullable<Int8>,
        direction_id -> Nullable<Int8>,
        status -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_obligation_status (id) {
        id -> Int8,
        name -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_obligation (id) {
        id -> Int8,
        name -> Nullable<Text>,
        partner_id -> Nullable<Int8>,
        status_id -> Nullable<Int8>,
        sum -> Nullable<Numeric>,
        date -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_pnl_category (id) {
        id -> Int8,
        name -> Nullable<Text>,
        parent_id -> Nullable<Int8>,
        kind -> Nullable<Text>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    fin_employee (id) {
        id -> Int8,
        name -> Nullable<Text>,
        post -> Nullable<Text>,
        archived -> Nullable<Bool>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

// ── operational tables ──

diesel::table! {
    stock_balance (pk) {
        pk -> Int8,
        store_id -> Uuid,
        store_name -> Nullable<Text>,
        product_id -> Uuid,
        product_name -> Nullable<Text>,
        amount -> Numeric,
        money -> Nullable<Numeric>,
        synced_at -> Timestamp,
        raw_json -> Nullable<Jsonb>,
    }
}

diesel::table! {
    min_stock_level (pk) {
        pk -> Int8,
        product_id -> Uuid,
        department_id -> Uuid,
        product_name -> Nullable<Text>,
        min_level -> Numeric,
        max_level -> Nullable<Numeric>,
        synced_at -> Timestamp,
    }
}

diesel::table! {
    sync_log (id) {
        id -> Int8,
        entity_type -> Text,
        started_at -> Timestamp,
        finished_at -> Nullable<Timestamp>,
        status -> Text,
        records_synced -> Nullable<Int4>,
        error_message -> Nullable<Text>,
        triggered_by -> Nullable<Text>,
    }
}

// ── workflow tables ──

diesel::table! {
    pending_writeoff (doc_id) {
        doc_id -> Text,
        document_uuid -> Uuid,
        created_at -> Timestamp,
        author_chat_id -> Int8,
        author_name -> Text,
        store_id -> Uuid,
        store_name -> Text,
        account_id -> Uuid,
        account_name -> Text,
        reason -> Text,
        department_id -> Nullable<Uuid>,
        items -> Jsonb,
        admin_msg_ids -> Jsonb,
        is_locked -> Bool,
    }
}

diesel::table! {
    writeoff_history (id) {
        id -> Int8,
        author_chat_id -> Int8,
        author_name -> Nullable<Text>,
        document_uuid -> Uuid,
        store_name -> Nullable<Text>,
        account_name -> Nullable<Text>,
        reason -> Nullable<Text>,
        items -> Jsonb,
        created_at -> Timestamp,
    }
}

diesel::table! {
    invoice_template (id) {
        id -> Int8,
        owner_chat_id -> Int8,
        name -> Text,
        store_id -> Uuid,
        supplier_id -> Uuid,
        items -> Jsonb,
        created_at -> Timestamp,
    }
}

diesel::table! {
    product_request (id) {
        id -> Int8,
        created_at -> Timestamp,
        author_chat_id -> Int8,
        author_name -> Text,
        department_id -> Nullable<Uuid>,
        store_id -> Nullable<Uuid>,
        section -> Text,
        items -> Jsonb,
        status -> Text,
        receiver_msg_ids -> Jsonb,
        is_locked -> Bool,
    }
}

diesel::table! {
    active_stoplist (pk) {
        pk -> Int8,
        product_id -> Text,
        name -> Nullable<Text>,
        balance -> Numeric,
        terminal_group_id -> Nullable<Text>,
        organization_id -> Nullable<Text>,
        synced_at -> Timestamp,
    }
}

diesel::table! {
    stoplist_history (id) {
        id -> Int8,
        product_id -> Text,
        name -> Nullable<Text>,
        terminal_group_id -> Nullable<Text>,
        started_at -> Timestamp,
        ended_at -> Nullable<Timestamp>,
        duration_seconds -> Nullable<Int8>,
    }
}

diesel::table! {
    stoplist_message (chat_id) {
        chat_id -> Int8,
        message_id -> Int8,
        snapshot_hash -> Text,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    stock_alert_message (chat_id) {
        chat_id -> Int8,
        message_id -> Int8,
        snapshot_hash -> Text,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    cloud_token (id) {
        id -> Int8,
        token -> Text,
        created_at -> Timestamp,
    }
}

// Legacy role tables; the spreadsheet matrix is superseding them. Kept
// behind a feature flag until the successor is confirmed live.

diesel::table! {
    bot_admin (id) {
        id -> Int8,
        chat_id -> Int8,
        employee_id -> Uuid,
        employee_name -> Nullable<Text>,
        added_at -> Timestamp,
        added_by -> Nullable<Int8>,
    }
}

diesel::table! {
    request_receiver (id) {
        id -> Int8,
        chat_id -> Int8,
        section -> Text,
        added_at -> Timestamp,
    }
}

// ── OCR staging ──

diesel::table! {
    ocr_document (id) {
        id -> Int8,
        chat_id -> Int8,
        supplier_id -> Nullable<Uuid>,
        supplier_name -> Nullable<Text>,
        store_id -> Nullable<Uuid>,
        status -> Text,
        warnings -> Jsonb,
        created_at -> Timestamp,
    }
}

diesel::table! {
    ocr_item (id) {
        id -> Int8,
        document_id -> Int8,
        line_no -> Int4,
        name -> Text,
        product_id -> Nullable<Uuid>,
        amount -> Numeric,
        price -> Nullable<Numeric>,
        total -> Nullable<Numeric>,
        vat_percent -> Nullable<Numeric>,
        rate_unknown -> Bool,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    pos_entity,
    pos_supplier,
    pos_department,
    pos_store,
    pos_group,
    pos_product_group,
    pos_product,
    pos_employee,
    pos_employee_role,
    stock_balance,
    min_stock_level,
    sync_log,
    pending_writeoff,
    writeoff_history,
    invoice_template,
    product_request,
    active_stoplist,
    stoplist_history,
);
