use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    CardiacArrest,
    HeartAttack,
    Choking,
    Drowning,
    AsthmaAttack,
    SevereBleeding,
    Fracture,
    Burn,
    HeadInjury,
    Stroke,
    Seizure,
    DiabeticEmergency,
    AllergicReaction,
    Poisoning,
    Unconscious,
    Shock,
    #[serde(other)]
    Unknown,
}

impl EmergencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyType::CardiacArrest => "cardiac_arrest",
            EmergencyType::HeartAttack => "heart_attack",
            EmergencyType::Choking => "choking",
            EmergencyType::Drowning => "drowning",
            EmergencyType::AsthmaAttack => "asthma_attack",
            EmergencyType::SevereBleeding => "severe_bleeding",
            EmergencyType::Fracture => "fracture",
            EmergencyType::Burn => "burn",
            EmergencyType::HeadInjury => "head_injury",
            EmergencyType::Stroke => "stroke",
            EmergencyType::Seizure => "seizure",
            EmergencyType::DiabeticEmergency => "diabetic_emergency",
            EmergencyType::AllergicReaction => "allergic_reaction",
            EmergencyType::Poisoning => "poisoning",
            EmergencyType::Unconscious => "unconscious",
            EmergencyType::Shock => "shock",
            EmergencyType::Unknown => "unknown",
        }
    }

    /// Severity assumed for this classification before looking at observations.
    pub fn base_severity(&self) -> u8 {
        match self {
            EmergencyType::CardiacArrest | EmergencyType::Stroke | EmergencyType::Drowning => 5,
            EmergencyType::SevereBleeding
            | EmergencyType::Choking
            | EmergencyType::HeadInjury
            | EmergencyType::HeartAttack
            | EmergencyType::Poisoning
            | EmergencyType::AllergicReaction
            | EmergencyType::Unconscious
            | EmergencyType::Shock => 4,
            EmergencyType::Seizure
            | EmergencyType::AsthmaAttack
            | EmergencyType::DiabeticEmergency
            | EmergencyType::Burn
            | EmergencyType::Unknown => 3,
            EmergencyType::Fracture => 2,
        }
    }
}

const CRITICAL_KEYWORDS: &[&str] = &[
    "not breathing",
    "no pulse",
    "unconscious",
    "unresponsive",
    "severe",
    "massive",
    "arterial",
    "profuse",
];

/// Ordinal severity, 1 (low) through 5 (extreme).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MIN: Severity = Severity(1);
    pub const MAX: Severity = Severity(5);

    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(Self(level))
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn is_critical(&self) -> bool {
        self.0 >= 4
    }

    /// Local fallback when the service gives no usable severity.
    ///
    /// Starts from the classification's base level and bumps it by one when
    /// any observation mentions a critical keyword.
    pub fn estimate(emergency_type: EmergencyType, observations: &[String]) -> Self {
        let mut level = emergency_type.base_severity();
        let text = observations.join(" ").to_lowercase();
        if CRITICAL_KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
            level = (level + 1).min(5);
        }
        Self(level)
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Severity::new(value).ok_or_else(|| format!("severity {value} outside 1..=5"))
    }
}

impl From<Severity> for u8 {
    fn from(value: Severity) -> Self {
        value.0
    }
}

/// The latest understanding of the emergency. Always replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub emergency_type: EmergencyType,
    pub severity: Severity,
    pub confidence: f32,
    pub observations: Vec<String>,
    pub recommended_action: String,
    pub escalate: bool,
    pub assessed_at: DateTime<Utc>,
}

impl Assessment {
    pub fn new(
        emergency_type: EmergencyType,
        severity: Option<u8>,
        confidence: f32,
        observations: Vec<String>,
        recommended_action: String,
        escalate: bool,
    ) -> Self {
        let observations: Vec<String> = observations
            .into_iter()
            .map(|obs| obs.trim().to_string())
            .filter(|obs| !obs.is_empty())
            .collect();

        let severity = severity
            .and_then(Severity::new)
            .unwrap_or_else(|| Severity::estimate(emergency_type, &observations));

        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            emergency_type,
            severity,
            confidence,
            observations,
            recommended_action: recommended_action.trim().to_string(),
            escalate,
            assessed_at: Utc::now(),
        }
    }
}
