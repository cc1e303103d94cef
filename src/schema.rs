table! {
    checkpoints (contract) {
        contract -> Text,
        last_timestamp_ms -> BigInt,
    }
}

table! {
    transactions (tx_hash) {
        tx_hash -> Text,
        contract -> Text,
        function_name -> Nullable<Text>,
        sender -> Nullable<Text>,
        receiver -> Nullable<Text>,
        ts_ms -> BigInt,
        status -> Nullable<Text>,
        raw_json -> Text,
    }
}

table! {
    jobs (job_id) {
        job_id -> BigInt,
        status -> Nullable<Text>,
        employer -> Nullable<Text>,
        updated_ts_ms -> BigInt,
        source_tx_hash -> Nullable<Text>,
        raw_json -> Text,
    }
}

table! {
    agreements (agreement_id) {
        agreement_id -> BigInt,
        status -> Nullable<Text>,
        employer -> Nullable<Text>,
        worker -> Nullable<Text>,
        updated_ts_ms -> BigInt,
        source_tx_hash -> Nullable<Text>,
        raw_json -> Text,
    }
}

table! {
    reputations (agent) {
        agent -> Text,
        score -> Nullable<BigInt>,
        updated_ts_ms -> BigInt,
        source_tx_hash -> Nullable<Text>,
        raw_json -> Text,
    }
}

table! {
    stats (id) {
        id -> Integer,
        updated_ts_ms -> BigInt,
        board_raw_json -> Text,
        protocol_raw_json -> Text,
    }
}

allow_tables_to_appear_in_same_query!(
    checkpoints,
    transactions,
    jobs,
    agreements,
    reputations,
    stats,
);
