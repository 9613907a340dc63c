use redis::aio::MultiplexedConnection;

use crate::error::ApiError;

/// Checks a counter-based rate limit stored in Redis.
///
/// INCR + EXPIRE: the TTL is set on the first hit only, so the window is
/// not pushed back by later attempts. Without a Redis connection, or when
/// Redis is unreachable, the request is let through.
pub async fn check_rate_limit(
    redis: Option<&MultiplexedConnection>,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> Result<(), ApiError> {
    let Some(redis) = redis else {
        return Ok(());
    };
    let mut conn = redis.clone();

    let count: u64 = match redis::cmd("INCR").arg(key).query_async(&mut conn).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, key, "rate limit check skipped");
            return Ok(());
        }
    };

    if count == 1 {
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(&mut conn)
            .await;
    }

    if count > max_attempts {
        return Err(ApiError::TooManyRequests(
            "Too many attempts, try again in a few minutes".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_redis_everything_passes() {
        for _ in 0..10 {
            assert!(check_rate_limit(None, "rate:login:x", 1, 60).await.is_ok());
        }
    }
}
