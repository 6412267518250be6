//! Integer-or-percentage quantities.
//!
//! Knobs like `maxUnavailable` and `parallelPodManagementConcurrency` accept
//! either an absolute count (`2`) or a percentage of the replica count
//! (`"50%"`).

use serde::{Deserialize, Serialize};

use crate::ReconcileError;

/// An absolute count or a percentage string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrPercent {
    Int(i32),
    Percent(String),
}

impl IntOrPercent {
    /// Returns the percentage value when this is a well-formed `"N%"`.
    pub fn percent(&self) -> Option<Result<i32, ReconcileError>> {
        match self {
            IntOrPercent::Int(_) => None,
            IntOrPercent::Percent(s) => Some(parse_percent(s)),
        }
    }

    /// Scales the value against `total`.
    ///
    /// Integers are returned unchanged. Percentages are multiplied by
    /// `total` and rounded up or down.
    pub fn scaled_value(&self, total: i32, round_up: bool) -> Result<i32, ReconcileError> {
        match self {
            IntOrPercent::Int(v) => Ok(*v),
            IntOrPercent::Percent(s) => {
                let pct = i64::from(parse_percent(s)?);
                let product = pct * i64::from(total);
                let scaled = if round_up {
                    (product + 99).div_euclid(100)
                } else {
                    product.div_euclid(100)
                };
                i32::try_from(scaled)
                    .map_err(|_| ReconcileError::InvalidIntOrPercent(s.clone()))
            }
        }
    }
}

impl From<i32> for IntOrPercent {
    fn from(v: i32) -> Self {
        IntOrPercent::Int(v)
    }
}

impl From<&str> for IntOrPercent {
    fn from(s: &str) -> Self {
        IntOrPercent::Percent(s.to_string())
    }
}

impl std::fmt::Display for IntOrPercent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntOrPercent::Int(v) => write!(f, "{v}"),
            IntOrPercent::Percent(s) => f.write_str(s),
        }
    }
}

fn parse_percent(s: &str) -> Result<i32, ReconcileError> {
    s.strip_suffix('%')
        .and_then(|digits| digits.parse::<i32>().ok())
        .ok_or_else(|| ReconcileError::InvalidIntOrPercent(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(IntOrPercent::Int(3), 10, false, 3)]
    #[case(IntOrPercent::from("50%"), 5, false, 2)]
    #[case(IntOrPercent::from("50%"), 5, true, 3)]
    #[case(IntOrPercent::from("1%"), 3, true, 1)]
    #[case(IntOrPercent::from("1%"), 3, false, 0)]
    #[case(IntOrPercent::from("100%"), 7, true, 7)]
    #[case(IntOrPercent::from("0%"), 7, true, 0)]
    fn test_scaled_value(
        #[case] value: IntOrPercent,
        #[case] total: i32,
        #[case] round_up: bool,
        #[case] expected: i32,
    ) {
        assert_eq!(value.scaled_value(total, round_up).unwrap(), expected);
    }

    #[rstest]
    #[case("50")]
    #[case("abc%")]
    #[case("")]
    fn test_invalid_percent(#[case] raw: &str) {
        let value = IntOrPercent::from(raw);
        assert!(matches!(
            value.scaled_value(10, true),
            Err(ReconcileError::InvalidIntOrPercent(_))
        ));
    }

    #[test]
    fn test_serde_untagged() {
        let int: IntOrPercent = serde_json::from_str("2").unwrap();
        assert_eq!(int, IntOrPercent::Int(2));

        let pct: IntOrPercent = serde_json::from_str("\"25%\"").unwrap();
        assert_eq!(pct.percent(), Some(Ok(25)));
        assert_eq!(serde_json::to_string(&pct).unwrap(), "\"25%\"");
    }
}
