use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::error::ApiError;

pub type DbPool = Pool<AsyncPgConnection>;

/// Create a Diesel async connection pool for the message store.
pub fn connect(database_url: &str) -> Result<DbPool, ApiError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager).max_size(20).build().map_err(|e| {
        tracing::error!(?e, "failed to build connection pool");
        ApiError::internal("database pool unavailable")
    })?;

    tracing::info!("database pool created");

    Ok(pool)
}
