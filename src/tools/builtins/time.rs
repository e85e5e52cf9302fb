use chrono::Utc;
use serde_json::{json, Value};

pub fn unix_time() -> Value {
    json!({ "unix_time": Utc::now().timestamp() })
}
