use std::time::Duration;

const DEFAULT_CALL_DEADLINE_MS: u64 = 12_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_BACKOFF_CAP_MS: u64 = 4_000;
const DEFAULT_SLIDING_LIMIT: u32 = 30;
const DEFAULT_SLIDING_WINDOW_SECS: u64 = 60;
const DEFAULT_APPROVAL_TTL_SECS: u64 = 300;
const DEFAULT_BATCH_POOL_SIZE: usize = 5;
const DEFAULT_MUTATION_LIMIT: i64 = 10;
const DEFAULT_MUTATION_WINDOW_SECS: u64 = 60;

const CALL_DEADLINE_MS_MIN: u64 = 500;
const CALL_DEADLINE_MS_MAX: u64 = 120_000;
const MAX_RETRIES_MAX: u32 = 10;
const SLIDING_LIMIT_MIN: u32 = 1;
const SLIDING_LIMIT_MAX: u32 = 10_000;
const SLIDING_WINDOW_SECS_MIN: u64 = 1;
const SLIDING_WINDOW_SECS_MAX: u64 = 3_600;
const APPROVAL_TTL_SECS_MIN: u64 = 30;
const APPROVAL_TTL_SECS_MAX: u64 = 3_600;
const BATCH_POOL_SIZE_MIN: usize = 1;
const BATCH_POOL_SIZE_MAX: usize = 64;

const CALL_DEADLINE_MS_ENV: &str = "WAYFINDER_CALL_DEADLINE_MS";
const MAX_RETRIES_ENV: &str = "WAYFINDER_MAX_RETRIES";
const BACKOFF_BASE_MS_ENV: &str = "WAYFINDER_BACKOFF_BASE_MS";
const BACKOFF_CAP_MS_ENV: &str = "WAYFINDER_BACKOFF_CAP_MS";
const SLIDING_LIMIT_ENV: &str = "WAYFINDER_TOOL_LIMIT";
const SLIDING_WINDOW_SECS_ENV: &str = "WAYFINDER_TOOL_WINDOW_SECS";
const APPROVAL_TTL_SECS_ENV: &str = "WAYFINDER_APPROVAL_TTL_SECS";
const BATCH_POOL_SIZE_ENV: &str = "WAYFINDER_BATCH_POOL_SIZE";
const MUTATION_LIMIT_ENV: &str = "WAYFINDER_MUTATION_LIMIT";
const MUTATION_WINDOW_SECS_ENV: &str = "WAYFINDER_MUTATION_WINDOW_SECS";

/// Knobs for the guarded invocation runtime. Defaults suit interactive
/// traffic; every value can be overridden from the environment, with
/// out-of-range overrides clamped rather than rejected so a bad deploy
/// config degrades instead of crashing.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hard deadline for one guarded call, retries included.
    pub call_deadline: Duration,
    /// Extra attempts after the first (3 means up to 4 invocations).
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Sliding-window request budget per identifier for read-style tools.
    pub sliding_limit: u32,
    pub sliding_window: Duration,
    /// Fixed-window budget per identifier for side-effecting tools.
    pub mutation_limit: i64,
    pub mutation_window_secs: u64,
    /// How long a pending/granted approval lives.
    pub approval_ttl_secs: u64,
    /// Worker pool size for batch invocations.
    pub batch_pool_size: usize,
    /// True when any value came from the environment.
    pub configured_via_env: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            call_deadline: Duration::from_millis(DEFAULT_CALL_DEADLINE_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            sliding_limit: DEFAULT_SLIDING_LIMIT,
            sliding_window: Duration::from_secs(DEFAULT_SLIDING_WINDOW_SECS),
            mutation_limit: DEFAULT_MUTATION_LIMIT,
            mutation_window_secs: DEFAULT_MUTATION_WINDOW_SECS,
            approval_ttl_secs: DEFAULT_APPROVAL_TTL_SECS,
            batch_pool_size: DEFAULT_BATCH_POOL_SIZE,
            configured_via_env: false,
        }
    }
}

impl RuntimeConfig {
    /// Load from the environment, clamping each override into its sane
    /// range. Unset or unparsable variables fall back to the default.
    pub fn from_env() -> Self {
        let mut config = RuntimeConfig::default();
        let mut overridden = false;

        if let Some(ms) = read_env_u64(CALL_DEADLINE_MS_ENV) {
            config.call_deadline =
                Duration::from_millis(ms.clamp(CALL_DEADLINE_MS_MIN, CALL_DEADLINE_MS_MAX));
            overridden = true;
        }
        if let Some(n) = read_env_u64(MAX_RETRIES_ENV) {
            config.max_retries = (n as u32).min(MAX_RETRIES_MAX);
            overridden = true;
        }
        if let Some(ms) = read_env_u64(BACKOFF_BASE_MS_ENV) {
            config.backoff_base = Duration::from_millis(ms.clamp(1, DEFAULT_BACKOFF_CAP_MS));
            overridden = true;
        }
        if let Some(ms) = read_env_u64(BACKOFF_CAP_MS_ENV) {
            config.backoff_cap =
                Duration::from_millis(ms.clamp(config.backoff_base.as_millis() as u64, 60_000));
            overridden = true;
        }
        if let Some(n) = read_env_u64(SLIDING_LIMIT_ENV) {
            config.sliding_limit = (n as u32).clamp(SLIDING_LIMIT_MIN, SLIDING_LIMIT_MAX);
            overridden = true;
        }
        if let Some(secs) = read_env_u64(SLIDING_WINDOW_SECS_ENV) {
            config.sliding_window = Duration::from_secs(
                secs.clamp(SLIDING_WINDOW_SECS_MIN, SLIDING_WINDOW_SECS_MAX),
            );
            overridden = true;
        }
        if let Some(n) = read_env_u64(MUTATION_LIMIT_ENV) {
            config.mutation_limit = (n as i64).max(1);
            overridden = true;
        }
        if let Some(secs) = read_env_u64(MUTATION_WINDOW_SECS_ENV) {
            config.mutation_window_secs =
                secs.clamp(SLIDING_WINDOW_SECS_MIN, SLIDING_WINDOW_SECS_MAX);
            overridden = true;
        }
        if let Some(secs) = read_env_u64(APPROVAL_TTL_SECS_ENV) {
            config.approval_ttl_secs = secs.clamp(APPROVAL_TTL_SECS_MIN, APPROVAL_TTL_SECS_MAX);
            overridden = true;
        }
        if let Some(n) = read_env_u64(BATCH_POOL_SIZE_ENV) {
            config.batch_pool_size =
                (n as usize).clamp(BATCH_POOL_SIZE_MIN, BATCH_POOL_SIZE_MAX);
            overridden = true;
        }

        config.configured_via_env = overridden;
        if overridden {
            tracing::info!(
                deadline_ms = config.call_deadline.as_millis() as u64,
                max_retries = config.max_retries,
                sliding_limit = config.sliding_limit,
                "runtime config overridden from environment"
            );
        }
        config
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse::<u64>().ok()
}
