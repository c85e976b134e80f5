//! Display-only cache of locked seats per trip.
//!
//! Only `are_seats_available` reads from here. Acquire always re-derives
//! availability from the lock store, so a stale entry can at worst show a
//! seat with the wrong status for `ttl_seconds`.

use redis::AsyncCommands;

use crate::redis_client::RedisClient;

#[derive(Clone)]
pub struct AvailabilityCache {
    redis: RedisClient,
    ttl_seconds: u64,
}

fn key(trip_id: &str) -> String {
    format!("trip:{}:locked_seats", trip_id)
}

impl AvailabilityCache {
    pub fn new(redis: RedisClient, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    /// Locked seats for the trip, or `None` on a cache miss.
    pub async fn locked_seats(&self, trip_id: &str) -> redis::RedisResult<Option<Vec<String>>> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(key(trip_id)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let seats = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(Some(seats))
    }

    pub async fn store_locked_seats(&self, trip_id: &str, seats: &[String]) -> redis::RedisResult<()> {
        let data = serde_json::to_string(seats).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key(trip_id), data, self.ttl_seconds).await
    }

    pub async fn invalidate(&self, trip_id: &str) -> redis::RedisResult<()> {
        let mut conn = self.redis.conn.clone();
        conn.del(key(trip_id)).await
    }
}
