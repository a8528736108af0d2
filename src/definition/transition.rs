use serde::{Deserialize, Serialize};

/// Control element attached to a step, flow or decision.
///
/// `on` is an exit-status pattern: `*` matches anything, `?` matches one
/// character, and anything else must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Next {
        on: String,
        to: String,
    },
    End {
        on: String,
        exit_status: Option<String>,
    },
    Fail {
        on: String,
        exit_status: Option<String>,
    },
    Stop {
        on: String,
        exit_status: Option<String>,
        /// Job-level element to resume from on restart
        restart: Option<String>,
    },
}

impl Transition {
    pub fn next(on: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Next {
            on: on.into(),
            to: to.into(),
        }
    }

    pub fn end(on: impl Into<String>, exit_status: Option<&str>) -> Self {
        Self::End {
            on: on.into(),
            exit_status: exit_status.map(str::to_string),
        }
    }

    pub fn fail(on: impl Into<String>, exit_status: Option<&str>) -> Self {
        Self::Fail {
            on: on.into(),
            exit_status: exit_status.map(str::to_string),
        }
    }

    pub fn stop(on: impl Into<String>, exit_status: Option<&str>, restart: Option<&str>) -> Self {
        Self::Stop {
            on: on.into(),
            exit_status: exit_status.map(str::to_string),
            restart: restart.map(str::to_string),
        }
    }

    pub fn on(&self) -> &str {
        match self {
            Self::Next { on, .. }
            | Self::End { on, .. }
            | Self::Fail { on, .. }
            | Self::Stop { on, .. } => on,
        }
    }
}
