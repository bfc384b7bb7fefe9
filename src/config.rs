//! Configuration types, built from environment variables.

use std::time::Duration;

use reqwest::Url;

use crate::admission::{WorkerIdentity, WorkerRole};
use crate::error::ConfigError;

/// Path of the route authority's routing-rules endpoint.
pub const ROUTING_RULES_PATH: &str = "/api/v1/workloads/routing-rules";

/// Upper bound on the idle poll delay (one hour).
const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;

/// The baseline workload whose traffic is being sandboxed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineWorkload {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Route authority configuration.
#[derive(Debug, Clone)]
pub struct RouteAuthorityConfig {
    /// Base address of the route server (scheme + host + port).
    pub base_url: Url,
    pub baseline: BaselineWorkload,
    /// How long a fetched routing table stays fresh.
    pub refresh_interval: Duration,
    /// Timeout for a single routing-rules request.
    pub request_timeout: Duration,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sandbox name, `None` for the baseline worker.
    pub sandbox_name: Option<String>,
    /// Orchestration engine address.
    pub engine_url: Url,
    pub task_queue: String,
    /// Maximum number of tasks executing at once.
    pub max_concurrent_tasks: usize,
    /// Delay after a poll that returned no task.
    pub poll_interval: Duration,
    /// Consecutive poll failures tolerated before the poll loop gives up.
    pub max_poll_failures: u32,
    /// Upper bound on draining background tasks at shutdown.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Identity of this worker instance.
    pub fn identity(&self) -> WorkerIdentity {
        let role = match &self.sandbox_name {
            Some(name) => WorkerRole::Sandbox(name.clone()),
            None => WorkerRole::Baseline,
        };
        WorkerIdentity::new(role, self.task_queue.clone())
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub routes: RouteAuthorityConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let routes = RouteAuthorityConfig {
            base_url: parse_base_url(
                "ROUTES_API_ROUTE_SERVER_ADDR",
                &env.required("ROUTES_API_ROUTE_SERVER_ADDR")?,
            )?,
            baseline: BaselineWorkload {
                kind: env.required("ROUTES_API_BASELINE_KIND")?,
                namespace: env.required("ROUTES_API_BASELINE_NAMESPACE")?,
                name: env.required("ROUTES_API_BASELINE_NAME")?,
            },
            refresh_interval: Duration::from_secs(at_least_one(
                "ROUTES_API_REFRESH_INTERVAL_SECONDS",
                env.required_parsed("ROUTES_API_REFRESH_INTERVAL_SECONDS")?,
            )?),
            request_timeout: Duration::from_secs(
                env.parsed_or("ROUTES_API_REQUEST_TIMEOUT_SECONDS", 10)?,
            ),
        };

        let sandbox_name = env
            .optional("SIGNADOT_SANDBOX_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let max_concurrent_tasks: usize = at_least_one(
            "WORKER_MAX_CONCURRENT_TASKS",
            env.parsed_or("WORKER_MAX_CONCURRENT_TASKS", 16)?,
        )?;
        let poll_interval_ms: u64 = at_least_one(
            "WORKER_POLL_INTERVAL_MS",
            env.parsed_or("WORKER_POLL_INTERVAL_MS", 200)?,
        )?;
        if poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_POLL_INTERVAL_MS".into(),
                message: format!("must be at most {MAX_POLL_INTERVAL_MS}"),
            });
        }

        let worker = WorkerConfig {
            sandbox_name,
            engine_url: parse_base_url("TEMPORAL_SERVER_URL", &env.required("TEMPORAL_SERVER_URL")?)?,
            task_queue: env.required("TASK_QUEUE")?,
            max_concurrent_tasks,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_poll_failures: env.parsed_or("WORKER_MAX_POLL_FAILURES", 10)?,
            shutdown_timeout: Duration::from_secs(
                env.parsed_or("WORKER_SHUTDOWN_TIMEOUT_SECONDS", 30)?,
            ),
        };

        Ok(Self { routes, worker })
    }
}

/// Reject zero for settings where zero would mean a busy loop or no capacity.
fn at_least_one<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8>,
{
    if value < T::from(1) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".into(),
        });
    }
    Ok(value)
}

/// Parse an address that may omit its scheme (`routeserver:7778`).
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?} is not a valid address: {e}"),
    })?;

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?} has no host"),
        });
    }

    Ok(url)
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn required_parsed<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        parse_value(key, &raw)
    }

    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key).filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
