//! The three analytical queries run after a load completes.
//!
//! Each query is parameterless apart from the table it targets and returns a
//! small ranked result set of two-column rows via the query runner.

use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

use crate::emit;
use crate::error::QueryError;
use crate::metrics::events::QueryCompleted;
use crate::warehouse::{run_query, WarehouseClient};

/// Emoji code-point ranges, shared between the SQL text and the in-process
/// query evaluator. Compatible with both RE2 and the regex crate.
pub(crate) const EMOJI_PATTERN: &str = r"(?:[\x{1F300}-\x{1F5FF}]|[\x{1F900}-\x{1F9FF}]|[\x{1F600}-\x{1F64F}]|[\x{1F680}-\x{1F6FF}]|[\x{2600}-\x{26FF}]\x{FE0F}?|[\x{2700}-\x{27BF}]\x{FE0F}?|\x{24C2}\x{FE0F}?|[\x{1F1E6}-\x{1F1FF}]{1,2}|[\x{1F170}\x{1F171}\x{1F17E}\x{1F17F}\x{1F18E}\x{1F191}-\x{1F19A}]\x{FE0F}?|[\x{0023}\x{002A}\x{0030}-\x{0039}]\x{FE0F}?\x{20E3}|[\x{2194}-\x{2199}\x{21A9}-\x{21AA}]\x{FE0F}?|[\x{2B05}-\x{2B07}\x{2B1B}\x{2B1C}\x{2B50}\x{2B55}]\x{FE0F}?|[\x{2934}\x{2935}]\x{FE0F}?|[\x{3297}\x{3299}]\x{FE0F}?|[\x{1F201}\x{1F202}\x{1F21A}\x{1F22F}\x{1F232}\x{1F23A}\x{1F250}\x{1F251}]\x{FE0F}?|[\x{203C}-\x{2049}]\x{FE0F}?|[\x{00A9}-\x{00AE}]\x{FE0F}?|[\x{2122}\x{2139}]\x{FE0F}?|\x{1F004}\x{FE0F}?|\x{1F0CF}\x{FE0F}?|[\x{231A}\x{231B}\x{2328}\x{23CF}\x{23E9}\x{23F3}\x{23F8}\x{23FA}]\x{FE0F}?)";

fn busiest_day_sql(dataset: &str, table: &str) -> String {
    format!(
        r#"
WITH
top_dates AS (
    SELECT CAST(date AS DATE) AS post_date,
        COUNT(*) AS post_count
    FROM {dataset}.{table}
    GROUP BY post_date
    ORDER BY post_count DESC
    LIMIT 10
),
top_users_per_date AS (
    SELECT td.post_date, t.user.username,
        MAX(td.post_count) AS date_post_count,
        COUNT(*) AS user_post_count,
        ROW_NUMBER() OVER (
            PARTITION BY td.post_date
            ORDER BY MAX(td.post_count) DESC, COUNT(*) DESC
        ) AS user_rank
    FROM {dataset}.{table} AS t
    INNER JOIN top_dates AS td
        ON td.post_date = CAST(t.date AS DATE)
    GROUP BY td.post_date, t.user.username
    ORDER BY date_post_count DESC, user_post_count DESC
)
SELECT post_date, username
FROM top_users_per_date
WHERE user_rank = 1
"#
    )
}

fn top_emoji_sql(dataset: &str, table: &str) -> String {
    format!(
        r#"
SELECT emoji, CAST(COUNT(*) AS INT64) AS occurrences
FROM (
    SELECT REGEXP_EXTRACT_ALL(content, r"{EMOJI_PATTERN}") AS emojis
    FROM {dataset}.{table}
)
CROSS JOIN UNNEST(emojis) AS emoji
GROUP BY emoji
ORDER BY occurrences DESC
LIMIT 10
"#
    )
}

fn top_mentioned_sql(dataset: &str, table: &str) -> String {
    format!(
        r#"
SELECT mentioned.username, COUNT(*) AS mention_count
FROM {dataset}.{table},
UNNEST(mentionedUsers) AS mentioned
GROUP BY mentioned.username
ORDER BY mention_count DESC
LIMIT 10
"#
    )
}

async fn run_named(
    client: &dyn WarehouseClient,
    name: &'static str,
    sql: String,
) -> Result<Vec<(Value, Value)>, QueryError> {
    let start = Instant::now();
    let rows = run_query(client, &sql).await?;

    emit!(QueryCompleted {
        name,
        rows: rows.len(),
        duration: start.elapsed(),
    });
    info!("Query '{}' returned {} rows", name, rows.len());
    for (rank, (first, second)) in rows.iter().enumerate() {
        debug!("  {}. {} {}", rank + 1, first, second);
    }

    Ok(rows)
}

/// For each of the 10 busiest dates, the user who posted the most that day.
pub async fn busiest_day_top_user(
    client: &dyn WarehouseClient,
    dataset: &str,
    table: &str,
) -> Result<Vec<(Value, Value)>, QueryError> {
    run_named(client, "busiest_day_top_user", busiest_day_sql(dataset, table)).await
}

/// The 10 most frequent emoji across all post content.
pub async fn top_emoji(
    client: &dyn WarehouseClient,
    dataset: &str,
    table: &str,
) -> Result<Vec<(Value, Value)>, QueryError> {
    run_named(client, "top_emoji", top_emoji_sql(dataset, table)).await
}

/// The 10 most mentioned usernames across all posts.
pub async fn top_mentioned_users(
    client: &dyn WarehouseClient,
    dataset: &str,
    table: &str,
) -> Result<Vec<(Value, Value)>, QueryError> {
    run_named(client, "top_mentioned_users", top_mentioned_sql(dataset, table)).await
}

/// Results of all three analytical queries.
#[derive(Debug, Clone)]
pub struct AnalyticsReport {
    pub busiest_day_top_user: Vec<(Value, Value)>,
    pub top_emoji: Vec<(Value, Value)>,
    pub top_mentioned_users: Vec<(Value, Value)>,
}

/// Run the three analytical queries against the loaded table.
pub async fn run_analytics(
    client: &dyn WarehouseClient,
    dataset: &str,
    table: &str,
) -> Result<AnalyticsReport, QueryError> {
    Ok(AnalyticsReport {
        busiest_day_top_user: busiest_day_top_user(client, dataset, table).await?,
        top_emoji: top_emoji(client, dataset, table).await?,
        top_mentioned_users: top_mentioned_users(client, dataset, table).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn emoji_pattern_compiles_and_matches() {
        let regex = Regex::new(EMOJI_PATTERN).unwrap();
        assert_eq!(regex.find_iter("😀 text 🚀 more 😀").count(), 3);
        assert_eq!(regex.find_iter("no emoji here").count(), 0);
    }

    #[test]
    fn sql_texts_reference_the_target_table() {
        for sql in [
            busiest_day_sql("ds", "posts"),
            top_emoji_sql("ds", "posts"),
            top_mentioned_sql("ds", "posts"),
        ] {
            assert!(sql.contains("ds.posts"), "missing table in: {sql}");
            assert!(sql.contains("LIMIT 10"));
        }
    }
}
