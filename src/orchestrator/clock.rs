//! Virtual time for simulated consultations.

use chrono::{DateTime, Duration, Utc};

use crate::agent::{AgentError, AgentResult};

/// Simulated clock; only moves when the orchestrator advances it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualClock {
    start: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { start, now: start }
    }

    /// Start at an RFC 3339 instant, or the wall clock when none is given.
    pub fn from_config(start: Option<&str>) -> AgentResult<Self> {
        match start {
            None => Ok(Self::new(Utc::now())),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| Self::new(t.with_timezone(&Utc)))
                .map_err(|e| AgentError::Config(format!("consultation.clock_start '{}': {}", s, e))),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Negative durations are ignored; time never runs backwards.
    pub fn advance(&mut self, by: Duration) {
        if by > Duration::zero() {
            self.now += by;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    pub fn describe_elapsed(&self) -> String {
        humanize(self.elapsed())
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// "just now", "40 minutes", "3 weeks", ...
pub fn humanize(d: Duration) -> String {
    let minutes = d.num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = d.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = d.num_days();
    if days < 14 {
        return plural(days, "day");
    }
    if days < 60 {
        return plural(days / 7, "week");
    }
    if days < 730 {
        return plural(days / 30, "month");
    }
    plural(days / 365, "year")
}
