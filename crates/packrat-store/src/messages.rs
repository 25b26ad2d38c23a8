//! Message persistence, including the rows derived from each message:
//! edit timestamp, reply link, attachments, embeds, reactions, and poll.
//!
//! Re-adding a message id replaces the message and all of its derived rows
//! atomically, which makes ingest idempotent regardless of how often the
//! capture script re-submits a channel.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Attachment, Embed, Message, Poll, PollAnswer, Reaction};
use crate::observe::Counts;
use crate::pool::ConnectionPool;
use crate::sql::{placeholders, upsert_sql};

const ID_CHUNK: usize = 500;

#[derive(Clone)]
pub struct MessagesRepository {
    pool: ConnectionPool,
    counts: Arc<Counts>,
}

impl MessagesRepository {
    pub(crate) fn new(pool: ConnectionPool, counts: Arc<Counts>) -> Self {
        Self { pool, counts }
    }

    /// Upsert a batch of messages and their derived rows in one transaction.
    pub fn add(&self, messages: &[Message]) -> Result<()> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        for message in messages {
            write_message(&tx, message)?;
        }
        tx.commit()?;
        self.counts.messages.refresh(&conn)?;
        self.counts.attachments.refresh(&conn)?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.acquire()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }

    /// How many of the given ids are already stored.
    pub fn count_existing(&self, ids: &[u64]) -> Result<i64> {
        let conn = self.pool.acquire()?;
        let mut total = 0i64;
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT COUNT(*) FROM messages WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let found: i64 = stmt.query_row(
                rusqlite::params_from_iter(chunk.iter().map(|id| *id as i64)),
                |row| row.get(0),
            )?;
            total += found;
        }
        Ok(total)
    }

    /// Visit every message, fully hydrated, oldest snowflake first. Holds
    /// one pooled connection until the scan completes.
    pub fn scan(&self, mut f: impl FnMut(Message)) -> Result<()> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, channel_id, text, timestamp FROM messages ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let sender_id: i64 = row.get(1)?;
            let channel_id: i64 = row.get(2)?;
            Ok((id, sender_id, channel_id, row.get::<_, String>(3)?, row.get::<_, i64>(4)?))
        })?;
        for row in rows {
            let (id, sender_id, channel_id, text, timestamp) = row?;
            f(hydrate(&conn, id, sender_id, channel_id, text, timestamp)?);
        }
        Ok(())
    }

    pub fn get_all(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        self.scan(|message| messages.push(message))?;
        Ok(messages)
    }

    pub fn total_count(&self) -> watch::Receiver<i64> {
        self.counts.messages.subscribe()
    }

    pub fn attachment_total_count(&self) -> watch::Receiver<i64> {
        self.counts.attachments.subscribe()
    }
}

fn write_message(conn: &Connection, message: &Message) -> Result<()> {
    let id = message.id as i64;

    let sql = upsert_sql(
        "messages",
        &["id"],
        &["sender_id", "channel_id", "text", "timestamp"],
    );
    conn.prepare_cached(&sql)?.execute(params![
        id,
        message.sender_id as i64,
        message.channel_id as i64,
        message.text,
        message.timestamp,
    ])?;

    // Replace every derived row for this id.
    for table in [
        "edit_timestamps",
        "replied_to",
        "attachments",
        "embeds",
        "reactions",
        "polls",
        "poll_answers",
    ] {
        conn.prepare_cached(&format!("DELETE FROM {table} WHERE message_id = ?1"))?
            .execute(params![id])?;
    }

    if let Some(edit_timestamp) = message.edit_timestamp {
        conn.prepare_cached(
            "INSERT INTO edit_timestamps (message_id, edit_timestamp) VALUES (?1, ?2)",
        )?
        .execute(params![id, edit_timestamp])?;
    }

    if let Some(replied_to_id) = message.replied_to_id {
        conn.prepare_cached("INSERT INTO replied_to (message_id, replied_to_id) VALUES (?1, ?2)")?
            .execute(params![id, replied_to_id as i64])?;
    }

    let attachment_sql = upsert_sql(
        "attachments",
        &["attachment_id"],
        &[
            "message_id",
            "name",
            "type",
            "normalized_url",
            "download_url",
            "size",
            "width",
            "height",
        ],
    );
    let mut seen = HashSet::new();
    for attachment in message.attachments.iter().filter(|a| seen.insert(a.id)) {
        conn.prepare_cached(&attachment_sql)?.execute(params![
            attachment.id as i64,
            id,
            attachment.name,
            attachment.mime_type,
            attachment.normalized_url,
            attachment.download_url,
            attachment.size as i64,
            attachment.width,
            attachment.height,
        ])?;
    }

    for embed in &message.embeds {
        conn.prepare_cached("INSERT INTO embeds (message_id, json) VALUES (?1, ?2)")?
            .execute(params![id, embed.json])?;
    }

    for reaction in &message.reactions {
        conn.prepare_cached(
            "INSERT INTO reactions (message_id, emoji_id, emoji_name, emoji_flags, count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            id,
            reaction.emoji_id.map(|e| e as i64),
            reaction.emoji_name,
            reaction.emoji_flags,
            reaction.count,
        ])?;
    }

    if let Some(poll) = &message.poll {
        conn.prepare_cached(
            "INSERT INTO polls (message_id, question, multi_select, expiry_timestamp)
             VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![id, poll.question, poll.multi_select, poll.expiry_timestamp])?;
        for answer in &poll.answers {
            conn.prepare_cached(
                "INSERT OR REPLACE INTO poll_answers
                     (message_id, answer_id, text, emoji_id, emoji_name, emoji_flags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                id,
                answer.answer_id,
                answer.text,
                answer.emoji_id.map(|e| e as i64),
                answer.emoji_name,
                answer.emoji_flags,
            ])?;
        }
    }

    Ok(())
}

fn hydrate(
    conn: &Connection,
    id: i64,
    sender_id: i64,
    channel_id: i64,
    text: String,
    timestamp: i64,
) -> Result<Message> {
    let edit_timestamp: Option<i64> = conn
        .prepare_cached("SELECT edit_timestamp FROM edit_timestamps WHERE message_id = ?1")?
        .query_row(params![id], |row| row.get(0))
        .optional()?;

    let replied_to_id: Option<i64> = conn
        .prepare_cached("SELECT replied_to_id FROM replied_to WHERE message_id = ?1")?
        .query_row(params![id], |row| row.get(0))
        .optional()?;

    let attachments = load_attachments(conn, id)?;
    let embeds = load_embeds(conn, id)?;
    let reactions = load_reactions(conn, id)?;
    let poll = load_poll(conn, id)?;

    Ok(Message {
        id: id as u64,
        sender_id: sender_id as u64,
        channel_id: channel_id as u64,
        text,
        timestamp,
        edit_timestamp,
        replied_to_id: replied_to_id.map(|r| r as u64),
        attachments,
        embeds,
        reactions,
        poll,
    })
}

fn load_attachments(conn: &Connection, message_id: i64) -> Result<Vec<Attachment>> {
    let mut stmt = conn.prepare_cached(
        "SELECT attachment_id, name, type, normalized_url, download_url, size, width, height
         FROM attachments WHERE message_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        let attachment_id: i64 = row.get(0)?;
        let size: i64 = row.get(5)?;
        Ok(Attachment {
            id: attachment_id as u64,
            message_id: message_id as u64,
            name: row.get(1)?,
            mime_type: row.get(2)?,
            normalized_url: row.get(3)?,
            download_url: row.get(4)?,
            size: size as u64,
            width: row.get(6)?,
            height: row.get(7)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn load_embeds(conn: &Connection, message_id: i64) -> Result<Vec<Embed>> {
    let mut stmt = conn
        .prepare_cached("SELECT json FROM embeds WHERE message_id = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map(params![message_id], |row| {
        Ok(Embed { json: row.get(0)? })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn load_reactions(conn: &Connection, message_id: i64) -> Result<Vec<Reaction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT emoji_id, emoji_name, emoji_flags, count
         FROM reactions WHERE message_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        let emoji_id: Option<i64> = row.get(0)?;
        Ok(Reaction {
            emoji_id: emoji_id.map(|e| e as u64),
            emoji_name: row.get(1)?,
            emoji_flags: row.get(2)?,
            count: row.get(3)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn load_poll(conn: &Connection, message_id: i64) -> Result<Option<Poll>> {
    let poll: Option<(String, bool, i64)> = conn
        .prepare_cached(
            "SELECT question, multi_select, expiry_timestamp FROM polls WHERE message_id = ?1",
        )?
        .query_row(params![message_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .optional()?;

    let Some((question, multi_select, expiry_timestamp)) = poll else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached(
        "SELECT answer_id, text, emoji_id, emoji_name, emoji_flags
         FROM poll_answers WHERE message_id = ?1 ORDER BY answer_id",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        let emoji_id: Option<i64> = row.get(2)?;
        Ok(PollAnswer {
            answer_id: row.get(0)?,
            text: row.get(1)?,
            emoji_id: emoji_id.map(|e| e as u64),
            emoji_name: row.get(3)?,
            emoji_flags: row.get(4)?,
        })
    })?;
    let answers = rows.collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(Poll {
        question,
        multi_select,
        expiry_timestamp,
        answers,
    }))
}
