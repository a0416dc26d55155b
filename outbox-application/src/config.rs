use crate::error::{AppError, AppResult};
use outbox_domain::eventing::PublisherConfig;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_WORKER_INTERVAL: &str = "OUTBOX_WORKER_INTERVAL";
pub const ENV_WORKER_BATCH_SIZE: &str = "OUTBOX_WORKER_BATCH_SIZE";
pub const ENV_PUBLISH_TIMEOUT: &str = "OUTBOX_PUBLISH_TIMEOUT";
pub const ENV_BUS_BACKEND: &str = "OUTBOX_BUS_BACKEND";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// 事件总线后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusBackend {
    #[default]
    Memory,
    Noop,
}

impl FromStr for BusBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "noop" => Ok(Self::Noop),
            other => Err(AppError::config(
                ENV_BUS_BACKEND,
                format!("unknown backend `{other}`, expected memory|noop"),
            )),
        }
    }
}

/// Outbox 运行配置，从环境变量加载
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub worker_interval: Duration,
    pub worker_batch_size: usize,
    pub publish_timeout: Option<Duration>,
    pub bus_backend: BusBackend,
    pub database_url: Option<String>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        let publisher = PublisherConfig::default();
        Self {
            worker_interval: publisher.interval,
            worker_batch_size: publisher.batch_size,
            publish_timeout: publisher.publish_timeout,
            bus_backend: BusBackend::default(),
            database_url: None,
        }
    }
}

impl OutboxConfig {
    /// 读取进程环境（先加载 `.env`，已存在的变量不被覆盖）
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 通过任意 key→value 查找构建配置；空值视为未设置
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_WORKER_INTERVAL) {
            config.worker_interval = parse_duration(ENV_WORKER_INTERVAL, &raw)?;
            if config.worker_interval.is_zero() {
                return Err(AppError::config(ENV_WORKER_INTERVAL, "must be positive"));
            }
        }

        if let Some(raw) = get(ENV_WORKER_BATCH_SIZE) {
            let size: usize = raw
                .trim()
                .parse()
                .map_err(|e| AppError::config(ENV_WORKER_BATCH_SIZE, format!("{raw:?}: {e}")))?;
            if size == 0 {
                return Err(AppError::config(ENV_WORKER_BATCH_SIZE, "must be >= 1"));
            }
            config.worker_batch_size = size;
        }

        if let Some(raw) = get(ENV_PUBLISH_TIMEOUT) {
            config.publish_timeout = Some(parse_duration(ENV_PUBLISH_TIMEOUT, &raw)?);
        }

        if let Some(raw) = get(ENV_BUS_BACKEND) {
            config.bus_backend = raw.parse()?;
        }

        config.database_url = get(ENV_DATABASE_URL);

        Ok(config)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            interval: self.worker_interval,
            batch_size: self.worker_batch_size,
            publish_timeout: self.publish_timeout,
        }
    }
}

/// 解析 `250ms`、`5s`、`2m`、`1h` 形式的时长，无单位时按秒处理
fn parse_duration(key: &'static str, raw: &str) -> AppResult<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| AppError::config(key, format!("invalid duration {raw:?}")))?;

    let duration = match unit.trim() {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        other => {
            return Err(AppError::config(
                key,
                format!("unknown duration unit {other:?} in {raw:?}"),
            ));
        }
    };
    duration.ok_or_else(|| AppError::config(key, format!("duration out of range: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = OutboxConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.worker_interval, Duration::from_secs(5));
        assert_eq!(config.worker_batch_size, 1000);
        assert_eq!(config.publish_timeout, None);
        assert_eq!(config.bus_backend, BusBackend::Memory);
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn reads_every_variable() {
        let config = OutboxConfig::from_lookup(lookup(&[
            (ENV_WORKER_INTERVAL, "250ms"),
            (ENV_WORKER_BATCH_SIZE, "50"),
            (ENV_PUBLISH_TIMEOUT, "2s"),
            (ENV_BUS_BACKEND, "noop"),
            (ENV_DATABASE_URL, "postgres://localhost/app"),
        ]))
        .unwrap();

        let publisher = config.publisher_config();
        assert_eq!(publisher.interval, Duration::from_millis(250));
        assert_eq!(publisher.batch_size, 50);
        assert_eq!(publisher.publish_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.bus_backend, BusBackend::Noop);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/app"));
    }

    #[test]
    fn duration_units() {
        let parse = |s| parse_duration("K", s).unwrap();
        assert_eq!(parse("10"), Duration::from_secs(10));
        assert_eq!(parse("3m"), Duration::from_secs(180));
        assert_eq!(parse("1h"), Duration::from_secs(3600));
        assert!(parse_duration("K", "5d").is_err());
        assert!(parse_duration("K", "ms").is_err());
    }

    #[test]
    fn oversized_duration_is_rejected() {
        let minutes = format!("{}m", u64::MAX / 60 + 1);
        let hours = format!("{}h", u64::MAX / 3600 + 1);
        for (key, value) in [(ENV_WORKER_INTERVAL, &minutes), (ENV_PUBLISH_TIMEOUT, &hours)] {
            let err = OutboxConfig::from_lookup(lookup(&[(key, value.as_str())])).unwrap_err();
            let AppError::Config { key: k, reason } = &err else {
                panic!("{key}={value}: unexpected error {err}");
            };
            assert_eq!(*k, key);
            assert!(reason.contains("out of range"), "{key}={value}: {err}");
        }
        assert_eq!(
            parse_duration("K", &format!("{}h", u64::MAX / 3600)).unwrap(),
            Duration::from_secs(u64::MAX / 3600 * 3600)
        );
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for (key, value) in [
            (ENV_WORKER_BATCH_SIZE, "0"),
            (ENV_WORKER_BATCH_SIZE, "many"),
            (ENV_WORKER_INTERVAL, "0s"),
            (ENV_PUBLISH_TIMEOUT, "soon"),
            (ENV_WORKER_INTERVAL, "307445734561825861m"),
            (ENV_BUS_BACKEND, "kafka"),
        ] {
            let err = OutboxConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(
                matches!(err, AppError::Config { key: k, .. } if k == key),
                "{key}={value}: {err}"
            );
        }
    }
}
