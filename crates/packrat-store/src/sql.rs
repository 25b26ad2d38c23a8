//! Small SQL building helpers shared by the repositories.

/// Build an upsert statement from a column descriptor list:
/// `INSERT INTO t (k, a, b) VALUES (?1, ?2, ?3)
///  ON CONFLICT (k) DO UPDATE SET a = excluded.a, b = excluded.b`.
///
/// With no non-key columns the conflict action degrades to DO NOTHING.
pub(crate) fn upsert_sql(table: &str, key_columns: &[&str], value_columns: &[&str]) -> String {
    let all: Vec<&str> = key_columns
        .iter()
        .chain(value_columns.iter())
        .copied()
        .collect();
    let placeholders: Vec<String> = (1..=all.len()).map(|i| format!("?{i}")).collect();

    let action = if value_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets: Vec<String> = value_columns
            .iter()
            .map(|col| format!("{col} = excluded.{col}"))
            .collect();
        format!("DO UPDATE SET {}", sets.join(", "))
    };

    format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) {action}",
        all.join(", "),
        placeholders.join(", "),
        key_columns.join(", "),
    )
}

/// `?1, ?2, ..., ?n` for IN-list queries.
pub(crate) fn placeholders(n: usize) -> String {
    let mut out = String::new();
    for i in 1..=n {
        if i > 1 {
            out.push_str(", ");
        }
        out.push_str(&format!("?{i}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_with_values() {
        assert_eq!(
            upsert_sql("users", &["id"], &["name", "avatar_url"]),
            "INSERT INTO users (id, name, avatar_url) VALUES (?1, ?2, ?3) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, avatar_url = excluded.avatar_url"
        );
    }

    #[test]
    fn upsert_composite_key_without_values() {
        assert_eq!(
            upsert_sql("poll_answers", &["message_id", "answer_id"], &[]),
            "INSERT INTO poll_answers (message_id, answer_id) VALUES (?1, ?2) \
             ON CONFLICT (message_id, answer_id) DO NOTHING"
        );
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(3), "?1, ?2, ?3");
        assert_eq!(placeholders(1), "?1");
    }
}
