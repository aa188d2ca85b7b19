diesel::table! {
    balances (user_id) {
        user_id -> Int8,
        balance -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
