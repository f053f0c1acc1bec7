pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use chat_common::SnowflakeGenerator;
use redis::aio::ConnectionManager;

use auth::{Authenticator, JwtAuthenticator};
use config::Config;
use db::kv::{KeyValueStore, MemoryStore, RedisStore};
use db::messages::{MemoryMessageStore, MessageStore, PgMessageStore};
use db::threads::{MemoryThreads, PgThreadDirectory, ThreadDirectory};
use error::ApiError;
use gateway::append_log::{AppendLog, MemoryAppendLog, RedisAppendLog};
use gateway::fanout::{FanoutBroker, MemoryBroker, RedisBroker};
use gateway::presence::Presence;
use gateway::rate_limit::LimiterSet;
use gateway::registry::{Hub, HubParts};
use gateway::sequence::RoomSequencer;
use gateway::sink::PersistenceSink;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<Hub>,
    pub presence: Presence,
    pub auth: Arc<dyn Authenticator>,
    pub limiters: Arc<LimiterSet>,
}

/// Storage and messaging backends behind the hub.
pub struct Backends {
    pub kv: Arc<dyn KeyValueStore>,
    pub log: Arc<dyn AppendLog>,
    pub broker: Arc<dyn FanoutBroker>,
    pub messages: Arc<dyn MessageStore>,
    pub threads: Arc<dyn ThreadDirectory>,
}

impl Backends {
    /// Process-local backends. Private chat only works for matches that are
    /// registered on the returned thread directory.
    pub fn in_memory(config: &Config) -> Self {
        let messages = Arc::new(MemoryMessageStore::new());
        Self {
            kv: Arc::new(MemoryStore::new()),
            log: Arc::new(MemoryAppendLog::new(
                config.replay_max_entries,
                Duration::from_secs(config.replay_retention_secs),
            )),
            broker: Arc::new(MemoryBroker::new()),
            threads: Arc::new(MemoryThreads::new(messages.clone())),
            messages,
        }
    }

    /// Connect to whichever of Redis and Postgres are configured, falling back
    /// to process-local backends for the rest.
    pub async fn connect(config: &Config) -> Result<Self, ApiError> {
        let mut backends = Self::in_memory(config);

        match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let conn = ConnectionManager::new(client.clone()).await?;
                backends.kv = Arc::new(RedisStore::new(conn.clone()));
                backends.log = Arc::new(RedisAppendLog::new(
                    conn.clone(),
                    config.replay_max_entries,
                    config.replay_retention_secs,
                ));
                backends.broker = Arc::new(RedisBroker::new(client, conn));
                tracing::info!("using redis for presence, replay log and fan-out");
            }
            None => {
                tracing::warn!("REDIS_URL not set; live rooms are local to this process");
            }
        }

        match &config.database_url {
            Some(url) => {
                let pool = db::pool::connect(url)?;
                backends.messages = Arc::new(PgMessageStore::new(pool.clone()));
                backends.threads = Arc::new(PgThreadDirectory::new(pool));
            }
            None => {
                tracing::warn!("DATABASE_URL not set; messages are kept in memory");
            }
        }

        Ok(backends)
    }
}

impl AppState {
    /// Build the hub and its collaborators. Must be called inside a Tokio
    /// runtime (the persistence worker is spawned here).
    pub fn new(config: Config, backends: Backends) -> Self {
        let ttl = config.room_state_ttl_secs;
        let presence = Presence::new(backends.kv.clone(), ttl);
        let (sink, _worker) = PersistenceSink::spawn(backends.messages.clone());

        let hub = Hub::new(HubParts {
            broker: backends.broker,
            presence: presence.clone(),
            sequencer: RoomSequencer::new(backends.kv, ttl),
            log: backends.log,
            sink,
            threads: backends.threads,
            messages: backends.messages,
            snowflake: Arc::new(SnowflakeGenerator::new(config.worker_id)),
        });

        Self {
            auth: Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
            limiters: Arc::new(LimiterSet::from_config(&config)),
            config: Arc::new(config),
            hub,
            presence,
        }
    }
}
