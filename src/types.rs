use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identifier as printed by strace
pub type Pid = u32;

/// Pseudo-name of the record synthesized for `+++ exited with N +++`
pub const EXIT_NAME: &str = "EXIT";

/// Pseudo-name of the record synthesized for `+++ killed by SIG... +++`
pub const KILL_NAME: &str = "KILL";

/// Result given to an unfinished call that never saw its resumed half
pub const UNFINISHED_RESULT: &str = "?";

/// One logical syscall or lifecycle event reconstructed from a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub pid: Option<Pid>,
    pub timestamp: String,
    /// Timestamp of the unfinished half, set only for merged records
    pub started: Option<String>,
    pub name: String,
    pub args: Vec<String>,
    pub result: String,
    pub elapsed: Option<String>,
    pub split: bool,
}

impl Record {
    pub fn category(&self) -> Category {
        Category::classify(&self.name, &self.result)
    }

    /// Identifier of the process created by this record, if it is a
    /// successful process-creation call
    pub fn created_pid(&self) -> Option<Pid> {
        if self.category() != Category::ProcessCreation {
            return None;
        }
        // `-Y` decorates the pid as `1234<comm>`
        let digits_end = self
            .result
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.result.len());
        self.result[..digits_end].parse().ok()
    }
}

/// Rendering category of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    ProcessCreation,
    ProgramReplace,
    NormalExit,
    AbnormalExit,
    Killed,
    Default,
}

impl Category {
    pub fn classify(name: &str, result: &str) -> Self {
        match name {
            "fork" | "vfork" | "clone" | "clone3" => Self::ProcessCreation,
            "execve" | "execveat" => Self::ProgramReplace,
            EXIT_NAME if result.trim() == "0" => Self::NormalExit,
            EXIT_NAME => Self::AbnormalExit,
            KILL_NAME => Self::Killed,
            _ => Self::Default,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessCreation => "process-creation",
            Self::ProgramReplace => "program-replace",
            Self::NormalExit => "normal-exit",
            Self::AbnormalExit => "abnormal-exit",
            Self::Killed => "killed",
            Self::Default => "default",
        }
    }

    /// Presentation attributes for nodes of this category.
    ///
    /// `name` is the record's call name and `detail` the rendered
    /// arguments/result text shown on hover.
    pub fn style(self, name: &str, detail: &str) -> NodeStyle {
        let (label, title) = match self {
            Self::ProcessCreation | Self::ProgramReplace => {
                (name.to_string(), Some(detail.to_string()))
            }
            Self::NormalExit | Self::AbnormalExit => ("EXITED".to_string(), Some(detail.to_string())),
            Self::Killed => (detail.to_string(), None),
            Self::Default => (name.to_string(), None),
        };
        let (size, color, shape) = match self {
            Self::ProcessCreation => (25, None, None),
            Self::ProgramReplace => (25, Some("orange"), Some("diamond")),
            Self::NormalExit => (25, Some("green"), Some("box")),
            Self::AbnormalExit | Self::Killed => (25, Some("red"), Some("box")),
            Self::Default => (10, Some("grey"), None),
        };
        NodeStyle {
            label,
            title,
            size,
            color,
            shape,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual attributes of one graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStyle {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<&'static str>,
}
