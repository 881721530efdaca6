use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolutions {
    #[serde(rename = "resolutionsPerAuthority", default)]
    pub resolutions_per_authority: Vec<Resolution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub authority: String,
    pub status: ResolutionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ResolutionValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionStatus {
    pub code: ResolutionCode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionCode {
    ErSuccessMatch,
    ErSuccessNoMatch,
    ErErrorTimeout,
    ErErrorException,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionValue {
    pub value: ResolvedEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub name: String,
    #[serde(default)]
    pub id: String,
}

impl Resolutions {
    /// First entity matched by any authority.
    pub fn first_match(&self) -> Option<&ResolvedEntity> {
        self.resolutions_per_authority
            .iter()
            .filter(|r| r.status.code == ResolutionCode::ErSuccessMatch)
            .find_map(|r| r.values.first())
            .map(|v| &v.value)
    }
}
