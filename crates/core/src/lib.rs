pub mod broker;
pub mod decision;
pub mod domain;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod schedule;
pub mod scoring;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use anyhow::Context;

    const DEFAULT_INGEST_CONCURRENCY: usize = 5;
    const DEFAULT_INGEST_MAX_PAGES: u32 = 10;
    const DEFAULT_SCORING_TOP_N: usize = 10;
    const DEFAULT_BUY_NOTIONAL: f64 = 1000.0;
    const DEFAULT_EXPIRY_MINUTES: i64 = 60;
    const DEFAULT_PIPELINE_CRON: &str = "0 30 13 * * Mon-Fri *";
    const DEFAULT_SCHEDULER_POLL_SECS: u64 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub sec_user_agent: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub alpaca_api_key_id: Option<String>,
        pub alpaca_api_secret_key: Option<String>,
        pub telegram_bot_token: Option<String>,
        pub telegram_chat_id: Option<String>,
        pub telegram_webhook_secret: Option<String>,
        pub public_base_url: Option<String>,

        pub ingest_concurrency: usize,
        pub ingest_max_pages: u32,
        pub scoring_top_n: usize,
        pub min_signal_score: u32,
        pub default_buy_notional: f64,
        pub recommendation_expiry: chrono::Duration,
        pub pipeline_cron: String,
        pub scheduler_poll_secs: u64,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let expiry_minutes = parse_env("RECOMMENDATION_EXPIRY_MINUTES", DEFAULT_EXPIRY_MINUTES)?;
            anyhow::ensure!(
                expiry_minutes > 0,
                "RECOMMENDATION_EXPIRY_MINUTES must be > 0 (got {expiry_minutes})"
            );

            let ingest_concurrency = parse_env("INGEST_CONCURRENCY", DEFAULT_INGEST_CONCURRENCY)?;
            anyhow::ensure!(ingest_concurrency >= 1, "INGEST_CONCURRENCY must be >= 1");

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                sec_user_agent: std::env::var("SEC_USER_AGENT").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                alpaca_api_key_id: std::env::var("ALPACA_API_KEY_ID").ok(),
                alpaca_api_secret_key: std::env::var("ALPACA_API_SECRET_KEY").ok(),
                telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
                telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
                telegram_webhook_secret: std::env::var("TELEGRAM_WEBHOOK_SECRET").ok(),
                public_base_url: std::env::var("PUBLIC_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),

                ingest_concurrency,
                ingest_max_pages: parse_env("INGEST_MAX_PAGES", DEFAULT_INGEST_MAX_PAGES)?,
                scoring_top_n: parse_env("SCORING_TOP_N", DEFAULT_SCORING_TOP_N)?,
                min_signal_score: parse_env("MIN_SIGNAL_SCORE", 0)?,
                default_buy_notional: parse_env("DEFAULT_BUY_NOTIONAL", DEFAULT_BUY_NOTIONAL)?,
                recommendation_expiry: chrono::Duration::minutes(expiry_minutes),
                pipeline_cron: std::env::var("PIPELINE_CRON")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_PIPELINE_CRON.to_string()),
                scheduler_poll_secs: parse_env("SCHEDULER_POLL_SECS", DEFAULT_SCHEDULER_POLL_SECS)?,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_sec_user_agent(&self) -> anyhow::Result<&str> {
            self.sec_user_agent
                .as_deref()
                .context("SEC_USER_AGENT is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_alpaca_credentials(&self) -> anyhow::Result<(&str, &str)> {
            let key_id = self
                .alpaca_api_key_id
                .as_deref()
                .context("ALPACA_API_KEY_ID is required")?;
            let secret = self
                .alpaca_api_secret_key
                .as_deref()
                .context("ALPACA_API_SECRET_KEY is required")?;
            Ok((key_id, secret))
        }

        pub fn require_telegram(&self) -> anyhow::Result<(&str, &str)> {
            let token = self
                .telegram_bot_token
                .as_deref()
                .context("TELEGRAM_BOT_TOKEN is required")?;
            let chat_id = self
                .telegram_chat_id
                .as_deref()
                .context("TELEGRAM_CHAT_ID is required")?;
            Ok((token, chat_id))
        }
    }

    /// Unset or blank falls back to `default`; anything else must parse.
    pub fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        parse_value(key, std::env::var(key).ok().as_deref(), default)
    }

    fn parse_value<T>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(default),
            Some(s) => s
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{key} has invalid value {s:?}: {e}")),
        }
    }

}
