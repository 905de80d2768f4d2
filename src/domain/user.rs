use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Valid,
    Invalid,
    Disabled,
}

impl UserStatus {
    pub fn code(&self) -> i64 {
        match self {
            UserStatus::Valid => 1,
            UserStatus::Invalid => 2,
            UserStatus::Disabled => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(UserStatus::Valid),
            2 => Some(UserStatus::Invalid),
            3 => Some(UserStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uid,
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named user reads, one variant per unique key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    ById(Uid),
    ByUsername(String),
    ByEmail(String),
}

impl std::fmt::Display for UserLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserLookup::ById(id) => write!(f, "id={}", id),
            UserLookup::ByUsername(name) => write!(f, "username={}", name),
            UserLookup::ByEmail(email) => write!(f, "email={}", email),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for s in [UserStatus::Valid, UserStatus::Invalid, UserStatus::Disabled] {
            assert_eq!(UserStatus::from_code(s.code()), Some(s));
        }
        assert_eq!(UserStatus::from_code(9), None);
    }

    #[test]
    fn test_lookup_display() {
        assert_eq!(UserLookup::ById(4).to_string(), "id=4");
        assert_eq!(
            UserLookup::ByEmail("a@b.io".into()).to_string(),
            "email=a@b.io"
        );
    }
}
