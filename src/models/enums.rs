use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

// Stored values are the wire/database spellings; they never change once
// written, so renaming a variant must keep the string stable.

str_enum!(TestType {
    Tb => "TB",
    BreastCancer => "BREAST_CANCER",
});

str_enum!(TestStatus {
    Uploaded => "UPLOADED",
    AiDone => "AI_DONE",
    Referred => "REFERRED",
    Closed => "CLOSED",
});

str_enum!(RiskLevel {
    Low => "LOW",
    Moderate => "MODERATE",
    High => "HIGH",
});

str_enum!(Urgency {
    Routine => "ROUTINE",
    High => "HIGH",
});

str_enum!(ReferralStatus {
    Pending => "PENDING",
    Reviewed => "REVIEWED",
    Closed => "CLOSED",
});

str_enum!(ReviewDecision {
    Confirm => "CONFIRM",
    Override => "OVERRIDE",
    MoreTests => "MORE_TESTS",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for (variant, s) in [
            (TestStatus::Uploaded, "UPLOADED"),
            (TestStatus::AiDone, "AI_DONE"),
            (TestStatus::Referred, "REFERRED"),
            (TestStatus::Closed, "CLOSED"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(TestStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn referral_status_round_trip() {
        for (variant, s) in [
            (ReferralStatus::Pending, "PENDING"),
            (ReferralStatus::Reviewed, "REVIEWED"),
            (ReferralStatus::Closed, "CLOSED"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(ReferralStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn risk_level_round_trip() {
        for (variant, s) in [
            (RiskLevel::Low, "LOW"),
            (RiskLevel::Moderate, "MODERATE"),
            (RiskLevel::High, "HIGH"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(RiskLevel::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn review_decision_round_trip() {
        for (variant, s) in [
            (ReviewDecision::Confirm, "CONFIRM"),
            (ReviewDecision::Override, "OVERRIDE"),
            (ReviewDecision::MoreTests, "MORE_TESTS"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(ReviewDecision::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(TestStatus::from_str("invalid").is_err());
        assert!(RiskLevel::from_str("CRITICAL").is_err());
        assert!(Urgency::from_str("").is_err());
    }
}
