use anyhow::{bail, Context, Error};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Authoritative outcome of the most recent plan or apply attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProvisionState {
    /// Storage matches the plan and is mounted
    Applied,
    /// A plan was rendered but not applied
    PlanOnly,
    /// The apply attempt failed; DETAIL carries the cause
    Failed,
}

/// Well-known DETAIL tokens. Failure details are derived from
/// [`crate::error::ApplyError::detail`] instead.
pub mod detail {
    /// The formatter ran and the plan was materialized.
    pub const AUTO_APPLIED: &str = "auto-applied";

    /// Live storage already matched the plan; nothing destructive ran.
    pub const EXISTING_STORAGE: &str = "existing-storage";

    /// A plan was rendered without applying it.
    pub const PLAN_RENDERED: &str = "plan-rendered";
}

/// The key=value record persisted under the runtime state directory. Written
/// atomically; always present after an apply attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: ProvisionState,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(state: ProvisionState, detail: impl Into<String>) -> Self {
        StatusRecord {
            state,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    /// Renders the record in key=value form, one key per line.
    pub fn render(&self) -> String {
        format!(
            "STATE={}\nDETAIL={}\nTIMESTAMP={}\n",
            self.state,
            self.detail,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Parses a rendered record. Unknown keys are ignored so the format can
    /// grow without breaking older readers.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut state = None;
        let mut detail = None;
        let mut timestamp = None;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("Malformed status line: '{line}'");
            };
            match key {
                "STATE" => {
                    state = Some(
                        value
                            .parse::<ProvisionState>()
                            .with_context(|| format!("Unknown status state '{value}'"))?,
                    )
                }
                "DETAIL" => detail = Some(value.to_string()),
                "TIMESTAMP" => {
                    timestamp = Some(
                        DateTime::parse_from_rfc3339(value)
                            .context("Malformed status timestamp")?
                            .with_timezone(&Utc),
                    )
                }
                _ => {}
            }
        }

        Ok(StatusRecord {
            state: state.context("Status record is missing STATE")?,
            detail: detail.context("Status record is missing DETAIL")?,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// What an apply attempt produced, as returned to the caller (CLI, TUI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub state: ProvisionState,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse_roundtrip() {
        let record = StatusRecord::new(ProvisionState::Applied, detail::AUTO_APPLIED);
        let rendered = record.render();

        assert!(rendered.starts_with("STATE=applied\nDETAIL=auto-applied\nTIMESTAMP="));
        assert!(rendered.ends_with('\n'));

        let parsed = StatusRecord::parse(&rendered).unwrap();
        assert_eq!(parsed.state, record.state);
        assert_eq!(parsed.detail, record.detail);
        // RFC3339 at second precision
        assert_eq!(
            parsed.timestamp.timestamp(),
            record.timestamp.timestamp()
        );
    }

    #[test]
    fn test_parse_tolerates_unknown_keys() {
        let parsed = StatusRecord::parse(
            "STATE=failed\nDETAIL=formatter-exit-1\nEXTRA=ignored\nTIMESTAMP=2026-01-05T10:00:00Z\n",
        )
        .unwrap();
        assert_eq!(parsed.state, ProvisionState::Failed);
        assert_eq!(parsed.detail, "formatter-exit-1");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        StatusRecord::parse("STATE=applied\nDETAIL").unwrap_err();
        StatusRecord::parse("STATE=bogus\nDETAIL=x\n").unwrap_err();
        StatusRecord::parse("DETAIL=x\n").unwrap_err();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ProvisionState::Applied.to_string(), "applied");
        assert_eq!(ProvisionState::PlanOnly.to_string(), "plan-only");
        assert_eq!(ProvisionState::Failed.to_string(), "failed");
    }
}
