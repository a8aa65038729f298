// Qualification Domain Model

use serde::{Deserialize, Serialize};

/// Lead classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadType {
    Student,
    #[serde(rename = "NGO")]
    Ngo,
    #[serde(rename = "B2B")]
    B2b,
}

impl std::fmt::Display for LeadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadType::Student => write!(f, "Student"),
            LeadType::Ngo => write!(f, "NGO"),
            LeadType::B2b => write!(f, "B2B"),
        }
    }
}

impl std::str::FromStr for LeadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(LeadType::Student),
            "ngo" => Ok(LeadType::Ngo),
            "b2b" => Ok(LeadType::B2b),
            other => Err(format!("unknown lead type: {}", other)),
        }
    }
}

/// Named group of email templates (one per lead type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateSet(String);

impl TemplateSet {
    pub const STUDENT: &'static str = "set_one_student";
    pub const REFERRAL: &'static str = "set_two_referral";
    pub const B2B: &'static str = "set_three_b2b";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Template set assigned to a lead type
    pub fn for_lead_type(lead_type: LeadType) -> Self {
        match lead_type {
            LeadType::Student => Self::new(Self::STUDENT),
            LeadType::Ngo => Self::new(Self::REFERRAL),
            LeadType::B2b => Self::new(Self::B2B),
        }
    }

    /// Fixed number of sequence steps (unknown sets default to 5)
    pub fn step_count(&self) -> u32 {
        match self.0.as_str() {
            Self::STUDENT => 5,
            Self::REFERRAL => 1,
            Self::B2B => 5,
            _ => 5,
        }
    }
}

impl std::fmt::Display for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of qualifying a contact (derived, never persisted by the core)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationResult {
    pub lead_type: LeadType,
    pub template_set: TemplateSet,
    pub score: u32,
    pub indicators: Vec<String>,
    pub qualified: bool,
    /// Why `qualified` is false (only set when rejection is enabled)
    pub rejection: Option<String>,
}

impl QualificationResult {
    /// Number of steps in the assigned template set
    pub fn step_count(&self) -> u32 {
        self.template_set.step_count()
    }
}
