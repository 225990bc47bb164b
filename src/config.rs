use std::env;

/// Engine tuning knobs. Read once at startup by the embedding service and
/// passed into the services that need them.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Forward-scan cap for the auto-scheduler's date adjustment, in days.
    pub scheduling_horizon_days: u32,
    /// Stride between candidate slot starts, in minutes.
    pub slot_stride_minutes: u32,
    /// Allowed deviation of an item's price from the catalog default, in
    /// percent (50 = the catalog price ±50%).
    pub price_band_percent: u32,
    /// Per-patient booking cap per day when no service-specific spacing
    /// rule applies.
    pub patient_daily_limit: u32,
    /// Day gap per sequence step used by the default estimated-date policy.
    pub estimate_interval_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling_horizon_days: 30,
            slot_stride_minutes: 30,
            price_band_percent: 50,
            patient_daily_limit: 2,
            estimate_interval_days: 7,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scheduling_horizon_days: env_or("PLAN_SCHEDULING_HORIZON_DAYS", defaults.scheduling_horizon_days),
            slot_stride_minutes: env_or("PLAN_SLOT_STRIDE_MINUTES", defaults.slot_stride_minutes),
            price_band_percent: env_or("PLAN_PRICE_BAND_PERCENT", defaults.price_band_percent),
            patient_daily_limit: env_or("PLAN_PATIENT_DAILY_LIMIT", defaults.patient_daily_limit),
            estimate_interval_days: env_or("PLAN_ESTIMATE_INTERVAL_DAYS", defaults.estimate_interval_days),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
