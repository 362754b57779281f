use tracegate_types::{KeyId, ScriptId};
use std::collections::HashSet;
use std::str::FromStr;

// ── ScriptId ──────────────────────────────────────────────────────

#[test]
fn script_id_new_is_unique() {
    assert_ne!(ScriptId::new(), ScriptId::new());
}

#[test]
fn script_id_display_and_parse() {
    let id = ScriptId::new();
    let parsed = ScriptId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn script_id_parse_trims_whitespace() {
    let id = ScriptId::new();
    let parsed = ScriptId::parse(&format!("  {id}\n")).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn script_id_parse_invalid() {
    assert!(ScriptId::parse("not-a-uuid").is_err());
    assert!(ScriptId::from_str("").is_err());
}

#[test]
fn script_id_serde_is_transparent() {
    let id = ScriptId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let back: ScriptId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// ── KeyId ─────────────────────────────────────────────────────────

#[test]
fn key_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    assert_eq!(KeyId::from_uuid(uuid).as_uuid(), uuid);
}

#[test]
fn key_id_hash_and_eq() {
    let id = KeyId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn key_ids_are_time_ordered() {
    let a = KeyId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = KeyId::new();
    assert!(a < b);
}
