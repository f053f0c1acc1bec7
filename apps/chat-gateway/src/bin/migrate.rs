//! Migration runner for the chat message store.
//!
//! Usage:
//!   cargo run -p chat-gateway --bin chat-migrate
//!   cargo run -p chat-gateway --bin chat-migrate -- --test
//!   cargo run -p chat-gateway --bin chat-migrate -- --revert
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy).

use std::error::Error;
use std::path::Path;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type BoxError = Box<dyn Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let flag = |name: &str| args.iter().any(|arg| arg == name);

    let mut database_url = std::env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL env var is required")?;
    if flag("--test") {
        database_url = with_test_db_suffix(&database_url);
    }

    println!("Connecting to database...");
    let mut conn = PgConnection::establish(&database_url)?;

    if flag("--revert") {
        let reverted = conn.revert_last_migration(MIGRATIONS)?;
        println!("  Reverted: {reverted}");
        return Ok(());
    }

    println!("Running pending migrations...");
    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if applied.is_empty() {
        println!("No pending migrations.");
    } else {
        for migration in &applied {
            println!("  Applied: {migration}");
        }
        println!("{} migration(s) applied.", applied.len());
    }
    Ok(())
}

/// `postgres://host/chat?x=y` becomes `postgres://host/chat_test?x=y`.
fn with_test_db_suffix(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };
    let Some((prefix, db_name)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db_name.is_empty() || db_name.ends_with("_test") {
        return database_url.to_string();
    }

    let mut updated = format!("{prefix}/{db_name}_test");
    if let Some(query) = query {
        updated.push('?');
        updated.push_str(query);
    }
    updated
}
