//! Wire payloads submitted by the capture script.
//!
//! Bodies are parsed as `serde_json::Value` and validated by hand so a
//! failure can name the exact path of the offending field ("[2].attachments[0].id"),
//! which is what the capture script surfaces to the user. Snowflakes arrive
//! as decimal strings and must parse to u64. `null` counts as absent for
//! optional fields.

use serde_json::{Map, Value};

use packrat_store::models::{
    Attachment, Channel, Embed, Message, Poll, PollAnswer, Reaction, Server, ServerKind, User,
    EMOJI_FLAG_ANIMATED,
};
use packrat_store::urls::normalize_download_url;

use crate::error::ApiError;

type Result<T> = std::result::Result<T, ApiError>;

pub fn parse_track_channel(root: &Value) -> Result<(Server, Channel)> {
    let root = as_object(root, "")?;

    let server_value = require(root, "server", "")?;
    let server_obj = as_object(server_value, "server")?;
    let server = Server {
        id: as_snowflake(require(server_obj, "id", "server")?, "server.id")?,
        name: as_string(require(server_obj, "name", "server")?, "server.name")?.to_string(),
        kind: parse_server_kind(require(server_obj, "type", "server")?, "server.type")?,
    };

    let channel_value = require(root, "channel", "")?;
    let channel_obj = as_object(channel_value, "channel")?;
    let channel = Channel {
        id: as_snowflake(require(channel_obj, "id", "channel")?, "channel.id")?,
        server_id: server.id,
        name: as_string(require(channel_obj, "name", "channel")?, "channel.name")?.to_string(),
        parent_id: get(channel_obj, "parent")
            .map(|value| as_snowflake(value, "channel.parent"))
            .transpose()?,
        position: get(channel_obj, "position")
            .map(|value| as_i64(value, "channel.position"))
            .transpose()?,
        topic: get(channel_obj, "topic")
            .map(|value| as_string(value, "channel.topic").map(str::to_string))
            .transpose()?,
        nsfw: get(channel_obj, "nsfw")
            .map(|value| as_bool(value, "channel.nsfw"))
            .transpose()?,
    };

    Ok((server, channel))
}

pub fn parse_track_users(root: &Value) -> Result<Vec<User>> {
    let entries = as_array(root, "")?;
    let mut users = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let path = format!("[{i}]");
        let obj = as_object(entry, &path)?;
        users.push(User {
            id: as_snowflake(require(obj, "id", &path)?, &child(&path, "id"))?,
            name: as_string(require(obj, "name", &path)?, &child(&path, "name"))?.to_string(),
            avatar_url: get(obj, "avatar")
                .map(|value| as_string(value, &child(&path, "avatar")).map(str::to_string))
                .transpose()?,
            discriminator: get(obj, "discriminator")
                .map(|value| as_string(value, &child(&path, "discriminator")).map(str::to_string))
                .transpose()?,
        });
    }
    Ok(users)
}

pub fn parse_track_messages(root: &Value) -> Result<Vec<Message>> {
    let entries = as_array(root, "")?;
    let mut messages = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        messages.push(parse_message(entry, &format!("[{i}]"))?);
    }
    Ok(messages)
}

fn parse_message(value: &Value, path: &str) -> Result<Message> {
    let obj = as_object(value, path)?;

    let id = as_snowflake(require(obj, "id", path)?, &child(path, "id"))?;

    let attachments = match get(obj, "attachments") {
        None => Vec::new(),
        Some(value) => {
            let attachments_path = child(path, "attachments");
            let entries = as_array(value, &attachments_path)?;
            let mut attachments = Vec::with_capacity(entries.len());
            for (i, entry) in entries.iter().enumerate() {
                attachments.push(parse_attachment(
                    entry,
                    &format!("{attachments_path}[{i}]"),
                    id,
                )?);
            }
            attachments
        }
    };

    let embeds = match get(obj, "embeds") {
        None => Vec::new(),
        Some(value) => {
            let embeds_path = child(path, "embeds");
            let entries = as_array(value, &embeds_path)?;
            let mut embeds = Vec::with_capacity(entries.len());
            for (i, entry) in entries.iter().enumerate() {
                let json = as_string(entry, &format!("{embeds_path}[{i}]"))?;
                embeds.push(Embed {
                    json: json.to_string(),
                });
            }
            embeds
        }
    };

    let reactions = match get(obj, "reactions") {
        None => Vec::new(),
        Some(value) => {
            let reactions_path = child(path, "reactions");
            let entries = as_array(value, &reactions_path)?;
            let mut reactions = Vec::with_capacity(entries.len());
            for (i, entry) in entries.iter().enumerate() {
                reactions.push(parse_reaction(entry, &format!("{reactions_path}[{i}]"))?);
            }
            reactions
        }
    };

    let poll = get(obj, "poll")
        .map(|value| parse_poll(value, &child(path, "poll")))
        .transpose()?;

    Ok(Message {
        id,
        sender_id: as_snowflake(require(obj, "sender", path)?, &child(path, "sender"))?,
        channel_id: as_snowflake(require(obj, "channel", path)?, &child(path, "channel"))?,
        text: as_string(require(obj, "text", path)?, &child(path, "text"))?.to_string(),
        timestamp: as_i64(require(obj, "timestamp", path)?, &child(path, "timestamp"))?,
        edit_timestamp: get(obj, "editTimestamp")
            .map(|value| as_i64(value, &child(path, "editTimestamp")))
            .transpose()?,
        replied_to_id: get(obj, "repliedToId")
            .map(|value| as_snowflake(value, &child(path, "repliedToId")))
            .transpose()?,
        attachments,
        embeds,
        reactions,
        poll,
    })
}

fn parse_attachment(value: &Value, path: &str, message_id: u64) -> Result<Attachment> {
    let obj = as_object(value, path)?;
    let download_url = as_string(require(obj, "url", path)?, &child(path, "url"))?.to_string();
    Ok(Attachment {
        id: as_snowflake(require(obj, "id", path)?, &child(path, "id"))?,
        message_id,
        name: as_string(require(obj, "name", path)?, &child(path, "name"))?.to_string(),
        mime_type: get(obj, "type")
            .map(|value| as_string(value, &child(path, "type")).map(str::to_string))
            .transpose()?,
        normalized_url: normalize_download_url(&download_url),
        download_url,
        size: as_u64(require(obj, "size", path)?, &child(path, "size"))?,
        width: get(obj, "width")
            .map(|value| as_i64(value, &child(path, "width")))
            .transpose()?,
        height: get(obj, "height")
            .map(|value| as_i64(value, &child(path, "height")))
            .transpose()?,
    })
}

fn parse_reaction(value: &Value, path: &str) -> Result<Reaction> {
    let obj = as_object(value, path)?;
    let emoji_id = get(obj, "id")
        .map(|value| as_snowflake(value, &child(path, "id")))
        .transpose()?;
    let emoji_name = get(obj, "name")
        .map(|value| as_string(value, &child(path, "name")).map(str::to_string))
        .transpose()?;
    if emoji_id.is_none() && emoji_name.is_none() {
        return Err(ApiError::Validation(path.to_string()));
    }
    let animated = get(obj, "isAnimated")
        .map(|value| as_bool(value, &child(path, "isAnimated")))
        .transpose()?
        .unwrap_or(false);
    Ok(Reaction {
        emoji_id,
        emoji_name,
        emoji_flags: if animated { EMOJI_FLAG_ANIMATED } else { 0 },
        count: as_i64(require(obj, "count", path)?, &child(path, "count"))?,
    })
}

fn parse_poll(value: &Value, path: &str) -> Result<Poll> {
    let obj = as_object(value, path)?;

    let answers_path = child(path, "answers");
    let entries = as_array(require(obj, "answers", path)?, &answers_path)?;
    let mut answers = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        answers.push(parse_poll_answer(entry, &format!("{answers_path}[{i}]"))?);
    }

    Ok(Poll {
        question: as_string(require(obj, "question", path)?, &child(path, "question"))?
            .to_string(),
        multi_select: as_bool(
            require(obj, "multiSelect", path)?,
            &child(path, "multiSelect"),
        )?,
        expiry_timestamp: as_i64(
            require(obj, "expiryTimestamp", path)?,
            &child(path, "expiryTimestamp"),
        )?,
        answers,
    })
}

fn parse_poll_answer(value: &Value, path: &str) -> Result<PollAnswer> {
    let obj = as_object(value, path)?;

    let (emoji_id, emoji_name, emoji_flags) = match get(obj, "emoji") {
        None => (None, None, None),
        Some(value) => {
            let emoji_path = child(path, "emoji");
            let emoji = as_object(value, &emoji_path)?;
            let animated = get(emoji, "isAnimated")
                .map(|value| as_bool(value, &child(&emoji_path, "isAnimated")))
                .transpose()?
                .unwrap_or(false);
            (
                get(emoji, "id")
                    .map(|value| as_snowflake(value, &child(&emoji_path, "id")))
                    .transpose()?,
                get(emoji, "name")
                    .map(|value| as_string(value, &child(&emoji_path, "name")).map(str::to_string))
                    .transpose()?,
                Some(if animated { EMOJI_FLAG_ANIMATED } else { 0 }),
            )
        }
    };

    Ok(PollAnswer {
        answer_id: as_i64(require(obj, "id", path)?, &child(path, "id"))?,
        text: as_string(require(obj, "text", path)?, &child(path, "text"))?.to_string(),
        emoji_id,
        emoji_name,
        emoji_flags,
    })
}

fn parse_server_kind(value: &Value, path: &str) -> Result<ServerKind> {
    let raw = as_string(value, path)?;
    ServerKind::parse(raw).ok_or_else(|| ApiError::Validation(path.to_string()))
}

// --- Value navigation -------------------------------------------------

fn child(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ApiError::Validation(path.to_string()))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ApiError::Validation(path.to_string()))
}

/// Optional lookup; `null` counts as absent.
fn get<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    match obj.get(key) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value),
    }
}

fn require<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value> {
    get(obj, key).ok_or_else(|| ApiError::Validation(child(path, key)))
}

fn as_string<'a>(value: &'a Value, path: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ApiError::Validation(path.to_string()))
}

fn as_snowflake(value: &Value, path: &str) -> Result<u64> {
    as_string(value, path)?
        .parse::<u64>()
        .map_err(|_| ApiError::Validation(path.to_string()))
}

fn as_i64(value: &Value, path: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| ApiError::Validation(path.to_string()))
}

fn as_u64(value: &Value, path: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| ApiError::Validation(path.to_string()))
}

fn as_bool(value: &Value, path: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| ApiError::Validation(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validation_path<T: std::fmt::Debug>(result: Result<T>) -> String {
        match result {
            Err(ApiError::Validation(path)) => path,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn track_channel_happy_path() {
        let body = json!({
            "server": {"id": "1", "name": "S", "type": "SERVER"},
            "channel": {"id": "2", "name": "c"}
        });
        let (server, channel) = parse_track_channel(&body).unwrap();
        assert_eq!(server.id, 1);
        assert_eq!(server.kind, ServerKind::Server);
        assert_eq!(channel.id, 2);
        assert_eq!(channel.server_id, 1);
        assert_eq!(channel.parent_id, None);
    }

    #[test]
    fn track_channel_reports_field_paths() {
        let body = json!({"server": {"id": "1", "name": "S", "type": "castle"}, "channel": {"id": "2", "name": "c"}});
        assert_eq!(validation_path(parse_track_channel(&body)), "server.type");

        let body = json!({"server": {"id": "1", "name": "S", "type": "dm"}, "channel": {"name": "c"}});
        assert_eq!(validation_path(parse_track_channel(&body)), "channel.id");

        let body = json!({"channel": {"id": "2", "name": "c"}});
        assert_eq!(validation_path(parse_track_channel(&body)), "server");
    }

    #[test]
    fn snowflakes_must_be_decimal_strings() {
        let body = json!([{"id": 5, "name": "n"}]);
        assert_eq!(validation_path(parse_track_users(&body)), "[0].id");

        let body = json!([{"id": "not-a-number", "name": "n"}]);
        assert_eq!(validation_path(parse_track_users(&body)), "[0].id");

        let body = json!([{"id": "18446744073709551615", "name": "n"}]);
        assert_eq!(parse_track_users(&body).unwrap()[0].id, u64::MAX);
    }

    #[test]
    fn null_is_absent_for_optional_fields() {
        let body = json!([{"id": "1", "name": "n", "avatar": null, "discriminator": null}]);
        let users = parse_track_users(&body).unwrap();
        assert_eq!(users[0].avatar_url, None);
        assert_eq!(users[0].discriminator, None);
    }

    #[test]
    fn message_requires_core_fields() {
        let body = json!([{"id": "1", "sender": "2", "channel": "3", "timestamp": 0}]);
        assert_eq!(validation_path(parse_track_messages(&body)), "[0].text");
    }

    #[test]
    fn reaction_needs_id_or_name() {
        let body = json!([{
            "id": "1", "sender": "2", "channel": "3", "text": "", "timestamp": 0,
            "reactions": [{"count": 2}]
        }]);
        assert_eq!(
            validation_path(parse_track_messages(&body)),
            "[0].reactions[0]"
        );
    }

    #[test]
    fn attachment_paths_include_indexes() {
        let body = json!([{
            "id": "1", "sender": "2", "channel": "3", "text": "", "timestamp": 0,
            "attachments": [
                {"id": "9", "name": "a.png", "url": "https://cdn.example.com/a.png", "size": 1},
                {"id": "10", "name": "b.png", "size": 2}
            ]
        }]);
        assert_eq!(
            validation_path(parse_track_messages(&body)),
            "[0].attachments[1].url"
        );
    }

    #[test]
    fn full_message_parses() {
        let body = json!([{
            "id": "100", "sender": "7", "channel": "8",
            "text": "hello", "timestamp": 1700000000000i64,
            "editTimestamp": 1700000001000i64,
            "repliedToId": "99",
            "attachments": [{
                "id": "55", "name": "cat.png", "type": "image/png",
                "url": "https://CDN.Example.com/cat.png?ex=1&is=2&hm=3",
                "size": 2048, "width": 64, "height": 64
            }],
            "embeds": ["{\"type\":\"rich\"}"],
            "reactions": [{"name": "🎉", "count": 2}, {"id": "44", "isAnimated": true, "count": 1}],
            "poll": {
                "question": "soup?", "multiSelect": false, "expiryTimestamp": 1700009999999i64,
                "answers": [{"id": 1, "text": "yes", "emoji": {"name": "🍜"}}]
            }
        }]);

        let messages = parse_track_messages(&body).unwrap();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.id, 100);
        assert_eq!(message.edit_timestamp, Some(1_700_000_001_000));
        assert_eq!(message.replied_to_id, Some(99));

        let attachment = &message.attachments[0];
        assert_eq!(
            attachment.download_url,
            "https://CDN.Example.com/cat.png?ex=1&is=2&hm=3"
        );
        assert_eq!(attachment.normalized_url, "https://cdn.example.com/cat.png");

        assert_eq!(message.reactions[0].emoji_flags, 0);
        assert_eq!(message.reactions[1].emoji_flags, EMOJI_FLAG_ANIMATED);

        let poll = message.poll.as_ref().unwrap();
        assert_eq!(poll.answers[0].emoji_name.as_deref(), Some("🍜"));
        assert_eq!(poll.answers[0].emoji_flags, Some(0));
    }

    #[test]
    fn non_array_root_is_rejected() {
        assert_eq!(validation_path(parse_track_users(&json!({"id": "1"}))), "");
        assert_eq!(validation_path(parse_track_messages(&json!("nope"))), "");
    }
}
