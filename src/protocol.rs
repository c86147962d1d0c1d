//! Client message parsing and outbound envelopes.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::entities::PlayerInput;
use crate::types::AbilityKind;

pub const DEFAULT_ROOM_ID: &str = "main";
const MAX_NAME_CHARS: usize = 16;
const MAX_ROOM_ID_CHARS: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Hello {
        name: String,
        room_id: Option<String>,
    },
    Input(PlayerInput),
    LobbyStart,
    LobbyCancel,
    ExtractionStart,
    ExtractionCancel,
    OpenChest {
        chest_id: String,
    },
    Pickup {
        item_id: String,
    },
    Drop,
    ReviveStart {
        target_id: String,
    },
    ReviveAccept,
    DebugHorde {
        count: Option<usize>,
    },
    CastAbility {
        kind: AbilityKind,
    },
    SummonTroop,
    Ping {
        t: f64,
    },
}

/// Returns `None` for anything malformed: unknown type, missing field, or a
/// field of the wrong JSON type.
pub fn parse_client_message(raw: &str) -> Option<ClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            let room_id = match object.get("roomId") {
                None => None,
                Some(value) => Some(value.as_str()?.to_string()),
            };
            Some(ClientMessage::Hello { name, room_id })
        }
        "input" => parse_input(object).map(ClientMessage::Input),
        "lobby_start" => Some(ClientMessage::LobbyStart),
        "lobby_cancel" => Some(ClientMessage::LobbyCancel),
        "extraction_start" => Some(ClientMessage::ExtractionStart),
        "extraction_cancel" => Some(ClientMessage::ExtractionCancel),
        "open_chest" => Some(ClientMessage::OpenChest {
            chest_id: object.get("chestId")?.as_str()?.to_string(),
        }),
        "pickup" => Some(ClientMessage::Pickup {
            item_id: object.get("itemId")?.as_str()?.to_string(),
        }),
        "drop" => Some(ClientMessage::Drop),
        "revive_start" => Some(ClientMessage::ReviveStart {
            target_id: object.get("targetId")?.as_str()?.to_string(),
        }),
        "revive_accept" => Some(ClientMessage::ReviveAccept),
        "debug_horde" => {
            let count = match object.get("count") {
                None => None,
                Some(value) => Some(usize::try_from(value.as_u64()?).ok()?),
            };
            Some(ClientMessage::DebugHorde { count })
        }
        "cast_ability" => {
            let kind = AbilityKind::parse(object.get("kind")?.as_str()?)?;
            Some(ClientMessage::CastAbility { kind })
        }
        "summon_troop" => Some(ClientMessage::SummonTroop),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_input(object: &Map<String, Value>) -> Option<PlayerInput> {
    let flag = |key: &str| -> Option<bool> {
        match object.get(key) {
            None => Some(false),
            Some(value) => value.as_bool(),
        }
    };
    let seq = match object.get("seq") {
        None => 0,
        Some(value) => u32::try_from(value.as_u64()?).ok()?,
    };
    let client_time_ms = match object.get("t") {
        None => 0,
        Some(value) => value.as_u64()?,
    };
    // Non-finite numbers are left for the room to sanitize.
    let aim = match object.get("aim") {
        None => 0.0,
        Some(value) => value.as_f64()? as f32,
    };
    let evil_progress = match object.get("evilProgress") {
        None => 0.0,
        Some(value) => value.as_f64()? as f32,
    };
    Some(PlayerInput {
        seq,
        client_time_ms,
        up: flag("up")?,
        down: flag("down")?,
        left: flag("left")?,
        right: flag("right")?,
        sprint: flag("sprint")?,
        dash: flag("dash")?,
        fire: flag("fire")?,
        aim,
        dialogue_open: flag("dialogue")?,
        evil_progress,
    })
}

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

/// Lowercased room id made of `[a-z0-9_-]`; `None` when the id is unusable.
pub fn normalize_room_id(raw: Option<&str>) -> Option<String> {
    let Some(value) = raw else {
        return Some(DEFAULT_ROOM_ID.to_string());
    };
    let normalized = value.trim().to_ascii_lowercase();
    let valid = !normalized.is_empty()
        && normalized.len() <= MAX_ROOM_ID_CHARS
        && normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(normalized)
}

/// `{"type": kind, "data": payload}` as a JSON string.
pub fn envelope<T: Serialize>(kind: &str, payload: &T) -> String {
    json!({
        "type": kind,
        "data": payload,
    })
    .to_string()
}

pub fn error_message(message: &str) -> String {
    json!({
        "type": "error",
        "message": message,
    })
    .to_string()
}

pub fn pong(t: f64) -> String {
    json!({
        "type": "pong",
        "t": t,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hello_message() {
        let parsed = parse_client_message(r#"{"type":"hello","name":"A","roomId":"alpha"}"#)
            .expect("hello message should parse");
        assert_eq!(
            parsed,
            ClientMessage::Hello {
                name: "A".to_string(),
                room_id: Some("alpha".to_string()),
            }
        );
    }

    #[test]
    fn parse_input_reads_flags_and_numbers() {
        let parsed = parse_client_message(
            r#"{"type":"input","seq":7,"t":1000,"up":true,"fire":true,"aim":1.5,"evilProgress":0.25}"#,
        );
        let Some(ClientMessage::Input(input)) = parsed else {
            panic!("expected input message");
        };
        assert_eq!(input.seq, 7);
        assert_eq!(input.client_time_ms, 1000);
        assert!(input.up && input.fire);
        assert!(!input.down && !input.dash);
        assert_eq!(input.aim, 1.5);
        assert_eq!(input.evil_progress, 0.25);
    }

    #[test]
    fn parse_input_rejects_wrong_types() {
        assert!(parse_client_message(r#"{"type":"input","up":"yes"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"input","seq":-1}"#).is_none());
        assert!(parse_client_message(r#"{"type":"input","aim":"left"}"#).is_none());
    }

    #[test]
    fn parse_commands_with_targets() {
        assert_eq!(
            parse_client_message(r#"{"type":"open_chest","chestId":"chest_3"}"#),
            Some(ClientMessage::OpenChest {
                chest_id: "chest_3".to_string()
            })
        );
        assert_eq!(
            parse_client_message(r#"{"type":"cast_ability","kind":"mine"}"#),
            Some(ClientMessage::CastAbility {
                kind: AbilityKind::Mine
            })
        );
        assert_eq!(
            parse_client_message(r#"{"type":"debug_horde"}"#),
            Some(ClientMessage::DebugHorde { count: None })
        );
        assert!(parse_client_message(r#"{"type":"cast_ability","kind":"nuke"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"pickup"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
    }

    #[test]
    fn parse_ping_requires_number() {
        assert_eq!(
            parse_client_message(r#"{"type":"ping","t":12.5}"#),
            Some(ClientMessage::Ping { t: 12.5 })
        );
        assert!(parse_client_message(r#"{"type":"ping","t":"now"}"#).is_none());
    }

    #[test]
    fn sanitize_name_applies_trim_empty_and_max_len() {
        assert_eq!(sanitize_name(""), "Player");
        assert_eq!(sanitize_name("   "), "Player");
        assert_eq!(sanitize_name(" Alice "), "Alice");
        assert_eq!(sanitize_name("12345678901234567890"), "1234567890123456");
    }

    #[test]
    fn room_ids_are_normalized() {
        assert_eq!(normalize_room_id(None).as_deref(), Some("main"));
        assert_eq!(normalize_room_id(Some(" Alpha-1 ")).as_deref(), Some("alpha-1"));
        assert_eq!(normalize_room_id(Some("")), None);
        assert_eq!(normalize_room_id(Some("a b")), None);
        assert_eq!(normalize_room_id(Some(&"x".repeat(33))), None);
    }

    #[test]
    fn envelopes_carry_type_and_data() {
        let value: Value = serde_json::from_str(&envelope("ui", &json!({"a": 1}))).expect("json");
        assert_eq!(value["type"], "ui");
        assert_eq!(value["data"]["a"], 1);
        let value: Value = serde_json::from_str(&error_message("nope")).expect("json");
        assert_eq!(value["message"], "nope");
    }
}
