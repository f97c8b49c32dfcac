/// Process configuration, loaded from the environment. Both binaries share
/// this struct; log filtering is configured separately through RUST_LOG.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_env: String,
    pub api_bind: String,
    pub database_url: String,
    pub redis_url: String,
    pub webhook_url: String,
    pub rate_limit_per_channel: u32,
    pub api_rate_limit_rps: u32,
    pub worker_concurrency: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let database_url =
            std::env::var("DATABASE_URL").or_else(|_| std::env::var("COURIER_DATABASE_URL"))?;
        let redis_url =
            std::env::var("REDIS_URL").or_else(|_| std::env::var("COURIER_REDIS_URL"))?;
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let api_bind =
            std::env::var("COURIER_API_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let webhook_url = std::env::var("WEBHOOK_URL")
            .unwrap_or_else(|_| "http://localhost:8081/send".to_string());
        let rate_limit_per_channel = std::env::var("RATE_LIMIT_PER_CHANNEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let api_rate_limit_rps = std::env::var("API_RATE_LIMIT_RPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);
        let worker_concurrency = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        Ok(Self {
            app_env,
            api_bind,
            database_url,
            redis_url,
            webhook_url,
            rate_limit_per_channel,
            api_rate_limit_rps,
            worker_concurrency,
        })
    }
}
