//! JSON output for the CLI
//!
//! - One JSON object per line on stdout
//! - UTF-8 only

use std::io::{self, Write};

use serde_json::{json, Value};

use super::errors::CliResult;
use crate::realtime::{ChangePayload, SubscriptionKey};

/// Write one JSON value followed by a newline
pub fn write_line(out: &mut impl Write, value: &Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = json!({
        "status": "ok",
        "data": data
    });
    write_line(&mut io::stdout(), &response)
}

/// JSON line for a delivered change
pub fn change_line(key: &SubscriptionKey, payload: &ChangePayload) -> Value {
    json!({
        "key": key.as_str(),
        "change": payload.to_wire(),
    })
}

/// Write a delivered change to stdout
pub fn write_change(key: &SubscriptionKey, payload: &ChangePayload) -> CliResult<()> {
    write_line(&mut io::stdout(), &change_line(key, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_line() {
        let mut out = Vec::new();
        write_line(&mut out, &json!({"a": 1})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"a\":1}\n");
    }

    #[test]
    fn test_change_line() {
        let payload = ChangePayload::insert("workouts", json!({"id": 7}));
        let line = change_line(&SubscriptionKey::new("workouts"), &payload);
        assert_eq!(line["key"], "workouts");
        assert_eq!(line["change"]["table"], "workouts");
    }
}
