use serde::{Deserialize, Serialize};

/// Kind of advice a consultation was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Pension,
    Investment,
    Protection,
    Mortgage,
    Debt,
    Retirement,
    General,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Pension,
        TaskType::Investment,
        TaskType::Protection,
        TaskType::Mortgage,
        TaskType::Debt,
        TaskType::Retirement,
        TaskType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Pension => "pension",
            TaskType::Investment => "investment",
            TaskType::Protection => "protection",
            TaskType::Mortgage => "mortgage",
            TaskType::Debt => "debt",
            TaskType::Retirement => "retirement",
            TaskType::General => "general",
        }
    }

    /// One-line description used in the classification prompt
    pub fn description(&self) -> &'static str {
        match self {
            TaskType::Pension => "pension transfers, consolidation, contributions",
            TaskType::Investment => "ISAs, funds, portfolios, risk appetite",
            TaskType::Protection => "life cover, income protection, critical illness",
            TaskType::Mortgage => "home purchase, remortgage, equity release",
            TaskType::Debt => "debt consolidation, arrears, budgeting",
            TaskType::Retirement => "drawdown, annuities, retirement income planning",
            TaskType::General => "anything else",
        }
    }

    /// Lenient parse of a model's label; `None` if nothing matches.
    pub fn from_label(label: &str) -> Option<Self> {
        let l = label.trim().trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        Self::ALL.iter().copied().find(|t| l == t.as_str() || l.starts_with(t.as_str()))
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Advisor,
    Customer,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Advisor => write!(f, "Advisor"),
            Speaker::Customer => write!(f, "Customer"),
        }
    }
}
