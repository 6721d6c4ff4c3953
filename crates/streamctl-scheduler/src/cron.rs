use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;

use crate::error::{Result, SchedulerError};

/// A validated 5-field cron expression
/// (minute hour day-of-month month day-of-week).
///
/// The underlying parser wants a seconds field, which is pinned to `0`
/// internally; callers only ever see the 5-field form.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: cron::Schedule,
    expression: String,
}

impl CronSchedule {
    /// Parse an expression, rejecting anything that is not exactly 5 fields.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }
        let schedule = cron::Schedule::from_str(&format!("0 {}", fields.join(" "))).map_err(
            |e| SchedulerError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            },
        )?;
        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Smallest instant strictly after `now` that satisfies the expression,
    /// evaluated in `tz` and converted back to UTC. `None` when the
    /// schedule never fires again.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&tz))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Resolves the IANA timezone a tenant's cron expressions are evaluated in.
///
/// Injected into the store and the worker so the scheduler never reaches
/// into tenant records itself. The lookup runs on the caller's connection,
/// which inside a worker cycle is the claim transaction. System-level
/// tasks (no org) resolve to UTC.
pub trait TimezoneResolver: Send + Sync {
    fn resolve(&self, conn: &Connection, org_id: Option<i64>) -> Tz;
}

/// Resolver that always answers UTC. Used for hosts without tenant
/// settings and as the test default.
pub struct UtcResolver;

impl TimezoneResolver for UtcResolver {
    fn resolve(&self, _conn: &Connection, _org_id: Option<i64>) -> Tz {
        chrono_tz::UTC
    }
}
