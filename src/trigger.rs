use anyhow::{Context, Result};
use serde_json::Value;
use teloxide::types::Update;

/// What an invocation envelope asks the bot to do
#[derive(Debug)]
pub enum Trigger {
    /// Time-based event: run the daily quiz cycle
    ScheduledTick,
    /// A Telegram update pushed to the webhook
    Update(Box<Update>),
    Unrecognized,
}

/// Work out which path a raw invocation body belongs to.
///
/// Scheduler events carry `source: "aws.events"` or a `detail-type` field.
/// Gateway-proxied webhooks wrap the update JSON in a string `body`; direct
/// webhooks deliver the update itself. Updates are always parsed from text:
/// teloxide's `Update` does not deserialize correctly from a `serde_json::Value`.
pub fn classify(raw: &str) -> Result<Trigger> {
    let envelope: Value = serde_json::from_str(raw).context("Invocation body is not JSON")?;

    if envelope.get("source").and_then(Value::as_str) == Some("aws.events")
        || envelope.get("detail-type").is_some()
    {
        return Ok(Trigger::ScheduledTick);
    }

    if let Some(body) = envelope.get("body").and_then(Value::as_str) {
        return parse_update(body).context("Envelope body is not a Telegram update");
    }

    if envelope.get("update_id").is_some() {
        return parse_update(raw).context("Envelope is not a valid Telegram update");
    }

    Ok(Trigger::Unrecognized)
}

fn parse_update(text: &str) -> Result<Trigger> {
    let update: Update = serde_json::from_str(text)?;
    Ok(Trigger::Update(Box::new(update)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{ChatKind, GuardEvent, MemberStatus};
    use crate::platform::telegram::guard_event;
    use serde_json::json;

    fn update_json() -> String {
        json!({
            "update_id": 1001,
            "message": {
                "message_id": 3,
                "date": 1_700_000_000,
                "chat": { "id": -300, "type": "group", "title": "Elsewhere" },
                "from": { "id": 5, "is_bot": false, "first_name": "Bob" },
                "text": "hi"
            }
        })
        .to_string()
    }

    #[test]
    fn test_eventbridge_event_is_tick() {
        let envelope = json!({
            "version": "0",
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "detail": {}
        });
        assert!(matches!(classify(&envelope.to_string()).unwrap(), Trigger::ScheduledTick));
    }

    #[test]
    fn test_detail_type_alone_is_tick() {
        let envelope = json!({ "detail-type": "Scheduled Event" });
        assert!(matches!(classify(&envelope.to_string()).unwrap(), Trigger::ScheduledTick));
    }

    #[test]
    fn test_wrapped_body_is_update() {
        let envelope = json!({ "body": update_json() });
        match classify(&envelope.to_string()).unwrap() {
            Trigger::Update(update) => assert_eq!(update.id.0, 1001),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_update_is_update() {
        match classify(&update_json()).unwrap() {
            Trigger::Update(update) => assert_eq!(
                guard_event(&update),
                Some(GuardEvent::Message { chat_id: -300 })
            ),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_membership_update_reaches_guard() {
        let raw = json!({
            "update_id": 1002,
            "my_chat_member": {
                "chat": { "id": -300, "type": "group", "title": "Elsewhere" },
                "from": { "id": 1, "is_bot": false, "first_name": "Ada" },
                "date": 1_700_000_000,
                "old_chat_member": {
                    "user": { "id": 42, "is_bot": true, "first_name": "WhoSaid" },
                    "status": "left"
                },
                "new_chat_member": {
                    "user": { "id": 42, "is_bot": true, "first_name": "WhoSaid" },
                    "status": "administrator",
                    "can_be_edited": false,
                    "is_anonymous": false,
                    "can_manage_chat": true,
                    "can_delete_messages": true,
                    "can_manage_video_chats": true,
                    "can_restrict_members": true,
                    "can_promote_members": false,
                    "can_change_info": true,
                    "can_invite_users": true,
                    "can_post_stories": false,
                    "can_edit_stories": false,
                    "can_delete_stories": false
                }
            }
        })
        .to_string();

        let wrapped = json!({ "body": raw.as_str() }).to_string();
        for envelope in [raw, wrapped] {
            let Trigger::Update(update) = classify(&envelope).unwrap() else {
                panic!("expected update for {}", envelope);
            };
            assert_eq!(
                guard_event(&update),
                Some(GuardEvent::Membership {
                    chat_id: -300,
                    chat_kind: ChatKind::Group,
                    new_status: MemberStatus::Administrator,
                })
            );
        }
    }

    #[test]
    fn test_non_json_body_is_error() {
        assert!(classify("not json at all").is_err());
    }

    #[test]
    fn test_garbage_body_is_error() {
        let envelope = json!({ "body": "{not json" });
        assert!(classify(&envelope.to_string()).is_err());
    }

    #[test]
    fn test_unknown_envelope() {
        let envelope = json!({ "hello": "world" });
        assert!(matches!(classify(&envelope.to_string()).unwrap(), Trigger::Unrecognized));
    }
}
