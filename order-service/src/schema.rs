diesel::table! {
    orders (id) {
        id -> Int8,
        user_id -> Int8,
        email -> Varchar,
        amount -> Numeric,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Int8,
        aggregate_id -> Int8,
        event_type -> Varchar,
        routing_key -> Varchar,
        payload -> Bytea,
        status -> Varchar,
        retry_count -> Int4,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(outbox_events -> orders (aggregate_id));

diesel::allow_tables_to_appear_in_same_query!(orders, outbox_events);
