//! Configuration for the tour simulation.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Simulation configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of exhibits on a tour.
    pub exhibit_count: usize,

    /// Real time a guide spends in front of each exhibit.
    pub explanation_duration: Duration,

    /// Guides on duty when the museum opens.
    pub initial_guides: usize,

    /// Largest group a guide accepts.
    pub guide_max_group_size: u32,

    /// Smallest visitor group.
    pub group_size_min: u32,

    /// Largest visitor group.
    pub group_size_max: u32,

    /// Where groups meet their guide.
    pub rendezvous_point: String,

    /// Interval between group spawn attempts.
    pub spawn_delay: Duration,

    /// Opening hour, simulated clock (0-23).
    pub opening_hour: u32,

    /// Closing hour, simulated clock (1-24).
    pub closing_hour: u32,

    /// Hard cap on real run time.
    pub simulation_duration: Duration,

    /// Chance a spawn attempt brings in a new group.
    pub new_group_probability: f64,

    /// Chance a group asks a question at an exhibit.
    pub question_probability: f64,

    /// Chance per spawn tick that a touring guide hits an incident.
    pub incident_probability: f64,

    /// Chance a new group arrives as an emergency.
    pub emergency_probability: f64,

    /// Chance a new group arrives flagged priority.
    pub priority_probability: f64,

    /// Chance a new group is VIP.
    pub vip_probability: f64,

    /// Guide status report period.
    pub status_interval: Duration,

    /// Coordinator directory refresh period.
    pub coordinator_refresh_interval: Duration,

    /// How long the coordinator waits for a guide's answer.
    pub negotiation_timeout: Duration,

    /// How long a waiting group waits before re-sending its request.
    pub assignment_timeout: Duration,

    /// How long a blocked guide stays offline before being reset.
    pub blocked_reset_delay: Duration,

    /// Simulated seconds per real second.
    pub time_scale: f64,

    /// RNG seed; random if unset.
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            exhibit_count: 8,
            explanation_duration: Duration::from_secs(3),
            initial_guides: 4,
            guide_max_group_size: 15,
            group_size_min: 5,
            group_size_max: 20,
            rendezvous_point: "Hall Napoléon".to_string(),
            spawn_delay: Duration::from_secs(5),
            opening_hour: 9,
            closing_hour: 18,
            simulation_duration: Duration::from_secs(300),
            new_group_probability: 0.4,
            question_probability: 0.3,
            incident_probability: 0.02,
            emergency_probability: 0.03,
            priority_probability: 0.1,
            vip_probability: 0.1,
            status_interval: Duration::from_secs(30),
            coordinator_refresh_interval: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(2),
            assignment_timeout: Duration::from_secs(30),
            blocked_reset_delay: Duration::from_secs(20),
            time_scale: 160.0,
            seed: None,
            log_level: "info".to_string(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from `GALERIE_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_millis(parse_or(
                &lookup,
                key,
                default.as_millis() as u64,
            )?))
        };

        let seed = match lookup("GALERIE_SEED") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GALERIE_SEED",
                value: raw,
            })?),
            None => None,
        };

        let config = Self {
            exhibit_count: parse_or(&lookup, "GALERIE_EXHIBITS", d.exhibit_count)?,
            explanation_duration: millis("GALERIE_EXPLANATION_MS", d.explanation_duration)?,
            initial_guides: parse_or(&lookup, "GALERIE_GUIDES", d.initial_guides)?,
            guide_max_group_size: parse_or(&lookup, "GALERIE_GUIDE_MAX_GROUP", d.guide_max_group_size)?,
            group_size_min: parse_or(&lookup, "GALERIE_GROUP_MIN", d.group_size_min)?,
            group_size_max: parse_or(&lookup, "GALERIE_GROUP_MAX", d.group_size_max)?,
            rendezvous_point: lookup("GALERIE_RENDEZVOUS").unwrap_or(d.rendezvous_point),
            spawn_delay: millis("GALERIE_SPAWN_DELAY_MS", d.spawn_delay)?,
            opening_hour: parse_or(&lookup, "GALERIE_OPENING_HOUR", d.opening_hour)?,
            closing_hour: parse_or(&lookup, "GALERIE_CLOSING_HOUR", d.closing_hour)?,
            simulation_duration: millis("GALERIE_DURATION_MS", d.simulation_duration)?,
            new_group_probability: parse_or(&lookup, "GALERIE_P_NEW_GROUP", d.new_group_probability)?,
            question_probability: parse_or(&lookup, "GALERIE_P_QUESTION", d.question_probability)?,
            incident_probability: parse_or(&lookup, "GALERIE_P_INCIDENT", d.incident_probability)?,
            emergency_probability: parse_or(&lookup, "GALERIE_P_EMERGENCY", d.emergency_probability)?,
            priority_probability: parse_or(&lookup, "GALERIE_P_PRIORITY", d.priority_probability)?,
            vip_probability: parse_or(&lookup, "GALERIE_P_VIP", d.vip_probability)?,
            status_interval: millis("GALERIE_STATUS_INTERVAL_MS", d.status_interval)?,
            coordinator_refresh_interval: millis(
                "GALERIE_REFRESH_INTERVAL_MS",
                d.coordinator_refresh_interval,
            )?,
            negotiation_timeout: millis("GALERIE_NEGOTIATION_TIMEOUT_MS", d.negotiation_timeout)?,
            assignment_timeout: millis("GALERIE_ASSIGNMENT_TIMEOUT_MS", d.assignment_timeout)?,
            blocked_reset_delay: millis("GALERIE_BLOCKED_RESET_MS", d.blocked_reset_delay)?,
            time_scale: parse_or(&lookup, "GALERIE_TIME_SCALE", d.time_scale)?,
            seed,
            log_level: lookup("GALERIE_LOG_LEVEL").unwrap_or(d.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exhibit_count == 0 {
            return Err(ConfigError::Invalid("exhibit_count must be at least 1".into()));
        }
        if self.group_size_min == 0 || self.group_size_min > self.group_size_max {
            return Err(ConfigError::Invalid(format!(
                "group size bounds {}..={} are empty",
                self.group_size_min, self.group_size_max
            )));
        }
        if self.opening_hour >= self.closing_hour || self.closing_hour > 24 {
            return Err(ConfigError::Invalid(format!(
                "opening hours {}h-{}h are not a valid day",
                self.opening_hour, self.closing_hour
            )));
        }
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(ConfigError::Invalid("time_scale must be positive".into()));
        }
        for (name, p) in [
            ("new_group_probability", self.new_group_probability),
            ("question_probability", self.question_probability),
            ("incident_probability", self.incident_probability),
            ("emergency_probability", self.emergency_probability),
            ("priority_probability", self.priority_probability),
            ("vip_probability", self.vip_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!("{name} must be within 0..=1, got {p}")));
            }
        }
        // tokio intervals panic on a zero period.
        for (name, period) in [
            ("spawn_delay", self.spawn_delay),
            ("status_interval", self.status_interval),
            ("coordinator_refresh_interval", self.coordinator_refresh_interval),
            ("negotiation_timeout", self.negotiation_timeout),
            ("assignment_timeout", self.assignment_timeout),
        ] {
            if period.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Convert a real elapsed duration into simulated minutes.
    pub fn simulated_minutes(&self, real: Duration) -> f64 {
        real.as_secs_f64() * self.time_scale / 60.0
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}
