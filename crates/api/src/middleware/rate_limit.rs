use std::net::SocketAddr;

use axum::{
    body::Body, extract::ConnectInfo, extract::State, http::Request, middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{error::ApiError, state::AppState};

pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = addr.ip().to_string();
    let capacity = state.settings.api_rate_limit_rps;

    match allow_request(&state.redis, &key, capacity).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err(ApiError::RateLimited),
        Err(err) => {
            warn!(error = %err, "rate limiter unavailable, admitting request");
            Ok(next.run(req).await)
        }
    }
}

async fn allow_request(
    client: &redis::Client,
    key: &str,
    capacity: u32,
) -> redis::RedisResult<bool> {
    let mut conn = client.get_multiplexed_async_connection().await?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let bucket_key = format!("rl:{}", key);

    let script = r#"
local bucket = KEYS[1]
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])

local data = redis.call('HMGET', bucket, 'tokens', 'ts')
local tokens = tonumber(data[1]) or capacity
local ts = tonumber(data[2]) or now

local delta = math.max(0, now - ts)
local new_tokens = math.min(capacity, tokens + delta * capacity)

if new_tokens < 1 then
  redis.call('HMSET', bucket, 'tokens', new_tokens, 'ts', now)
  redis.call('EXPIRE', bucket, 120)
  return 0
else
  new_tokens = new_tokens - 1
  redis.call('HMSET', bucket, 'tokens', new_tokens, 'ts', now)
  redis.call('EXPIRE', bucket, 120)
  return 1
end
"#;

    let allowed: i32 = redis::Script::new(script)
        .key(bucket_key)
        .arg(now)
        .arg(capacity)
        .invoke_async(&mut conn)
        .await?;

    Ok(allowed == 1)
}
