use sqlx::{Pool, Postgres};

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_conversations.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_conversation_participants.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_messages.sql");
const MIG_0004: &str = include_str!("../migrations/0004_create_message_reactions.sql");
const MIG_0005: &str = include_str!("../migrations/0005_create_message_reads.sql");
const MIG_0006: &str = include_str!("../migrations/0006_create_message_edits.sql");
const MIG_0007: &str = include_str!("../migrations/0007_create_search_history.sql");

pub async fn run_all(db: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    let all = [
        MIG_0001, MIG_0002, MIG_0003, MIG_0004, MIG_0005, MIG_0006, MIG_0007,
    ];
    for (i, sql) in all.into_iter().enumerate() {
        let label = i + 1;
        // Every statement is IF NOT EXISTS, so re-running is harmless.
        sqlx::raw_sql(sql).execute(db).await?;
        tracing::info!(migration = %label, "migration applied");
    }
    Ok(())
}
