//! Fixed fixtures answered for simulated tenant reads.

use serde_json::{json, Value};
use uuid::Uuid;

const SAMPLE_TRAINER: &str = "sample-trainer";

fn id(n: u128) -> Uuid {
    Uuid::from_u128(0x5a3b_0000_0000_4000_8000_0000_0000_0000 | n)
}

fn players() -> Vec<Value> {
    vec![
        json!({
            "id": id(1), "name": "Ana Silva", "email": "ana.silva@example.com", "phone": null,
            "position": "midfielder", "birth_date": "2011-04-12", "notes": null,
            "created_at": "2026-01-10T09:00:00Z", "updated_at": null,
        }),
        json!({
            "id": id(2), "name": "Tiago Costa", "email": "tiago.costa@example.com", "phone": null,
            "position": "goalkeeper", "birth_date": "2010-09-03", "notes": "Left-footed",
            "created_at": "2026-01-12T09:00:00Z", "updated_at": null,
        }),
        json!({
            "id": id(3), "name": "Marta Sousa", "email": null, "phone": "+351 900 000 003",
            "position": "forward", "birth_date": "2012-02-28", "notes": null,
            "created_at": "2026-01-15T09:00:00Z", "updated_at": null,
        }),
    ]
}

fn homework() -> Vec<Value> {
    vec![
        json!({
            "id": id(11), "player_id": id(1), "title": "Passing drills",
            "description": "Wall passes, both feet", "due_date": "2026-02-01",
            "status": "assigned", "created_at": "2026-01-20T18:00:00Z",
        }),
        json!({
            "id": id(12), "player_id": id(2), "title": "Reflex training",
            "description": null, "due_date": "2026-02-03",
            "status": "completed", "created_at": "2026-01-21T18:00:00Z",
        }),
    ]
}

fn payments() -> Vec<Value> {
    vec![
        json!({ "id": id(21), "player_id": id(1), "amount": 35.0, "status": "paid", "period": "2026-01" }),
        json!({ "id": id(22), "player_id": id(2), "amount": 35.0, "status": "pending", "period": "2026-01" }),
        json!({ "id": id(23), "player_id": id(3), "amount": 35.0, "status": "overdue", "period": "2025-12" }),
    ]
}

fn trainers() -> Vec<Value> {
    vec![
        json!({
            "id": SAMPLE_TRAINER, "email": "coach@example.com", "name": "Sample Coach", "phone": null,
            "is_active": true, "plan": "basic", "subscription_status": "trial",
            "trial_started_at": "2026-01-01T00:00:00Z", "trial_ends_at": "2026-01-31T00:00:00Z",
            "subscription_started_at": null, "subscription_ends_at": null,
            "schema_name": "trainer_sample_trainer",
            "created_at": "2026-01-01T00:00:00Z", "updated_at": "2026-01-01T00:00:00Z",
        }),
    ]
}

fn player_auth() -> Vec<Value> {
    vec![
        json!({ "id": id(1), "trainer_id": SAMPLE_TRAINER, "email": "ana.silva@example.com", "name": "Ana Silva" }),
        json!({ "id": id(2), "trainer_id": SAMPLE_TRAINER, "email": "tiago.costa@example.com", "name": "Tiago Costa" }),
    ]
}

/// Sample rows for a tenant table; empty for tables without fixtures.
pub fn rows(table: &str) -> Vec<Value> {
    match table {
        "players" => players(),
        "homework" => homework(),
        "payments" => payments(),
        "trainers" => trainers(),
        "player_auth" => player_auth(),
        _ => Vec::new(),
    }
}
