use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, CounterVec, Gauge};

lazy_static! {
    // ── Backend traffic ─────────────────────────────────────────────────────
    pub static ref BACKEND_CALLS: CounterVec = register_counter_vec!(
        "console_backend_calls_total",
        "Backend calls by operation and outcome",
        &["operation", "outcome"]
    ).unwrap();

    pub static ref BACKEND_UP: Gauge = register_gauge!(
        "console_backend_up",
        "1 when the last connectivity probe reached the backend"
    ).unwrap();

    // ── Tenancy ─────────────────────────────────────────────────────────────
    pub static ref PROVISIONING_COUNTER: CounterVec = register_counter_vec!(
        "console_tenant_provisioning_total",
        "Tenant schema provisioning attempts by path and outcome",
        &["path", "outcome"]
    ).unwrap();

    pub static ref SIMULATED_READS: CounterVec = register_counter_vec!(
        "console_simulated_reads_total",
        "Tenant reads answered from sample data, by table and reason",
        &["table", "reason"]
    ).unwrap();

    pub static ref UPLOADS_COUNTER: CounterVec = register_counter_vec!(
        "console_uploads_total",
        "Objects uploaded by bucket kind",
        &["bucket"]
    ).unwrap();

    // ── Session ─────────────────────────────────────────────────────────────
    pub static ref SESSION_TRANSITIONS: CounterVec = register_counter_vec!(
        "console_session_transitions_total",
        "Session phase changes by target phase",
        &["phase"]
    ).unwrap();
}
