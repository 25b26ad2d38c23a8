use rusqlite::Connection;

// Message-scoped lookups dominate once an archive grows past a few channels.
const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);
CREATE INDEX IF NOT EXISTS idx_embeds_message ON embeds(message_id);
CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);
CREATE INDEX IF NOT EXISTS idx_poll_answers_message ON poll_answers(message_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
