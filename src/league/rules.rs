//! Typed, versioned league rules.

use {
    serde_json::Value,
    smart_default::SmartDefault,
    crate::prelude::*,
};

pub(crate) const CURRENT_VERSION: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)] Json(#[from] serde_json::Error),
    #[error("rules version {0} is newer than this engine supports")]
    FutureVersion(i32),
    #[error("unknown running comparison mode {0:?}")]
    UnknownMode(String),
}

#[derive(Debug, SmartDefault, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "comparison_mode", rename_all = "snake_case")]
pub(crate) enum ComparisonMode {
    #[default]
    AbsolutePerformance,
    PersonalProgress,
}

serde_plain::derive_display_from_serialize!(ComparisonMode);
serde_plain::derive_fromstr_from_deserialize!(ComparisonMode);

#[derive(Debug, SmartDefault, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Rules {
    pub(crate) running_mode: ComparisonMode,
    #[default(3)]
    pub(crate) points_for_win: u8,
    #[default(1)]
    pub(crate) points_for_draw: u8,
    pub(crate) points_for_loss: u8,
    /// When disabled, only owners and admins may confirm results.
    #[default(true)]
    pub(crate) peer_confirmation: bool,
    #[default(5000)]
    pub(crate) default_distance_meters: u32,
}

/// The loosely typed payload written before rules were versioned.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRules {
    comparison: Option<String>,
    win_points: Option<u8>,
    draw_points: Option<u8>,
}

impl Rules {
    /// Reads a stored rules payload of any known version.
    pub(crate) fn migrate(version: i32, payload: Value) -> Result<Self, Error> {
        if version > CURRENT_VERSION {
            return Err(Error::FutureVersion(version))
        }
        if payload.is_null() {
            return Ok(Self::default())
        }
        if version == CURRENT_VERSION {
            return Ok(serde_json::from_value(payload)?)
        }
        let LegacyRules { comparison, win_points, draw_points } = serde_json::from_value(payload)?;
        let defaults = Self::default();
        Ok(Self {
            running_mode: match comparison.as_deref() {
                None => defaults.running_mode,
                Some("absolute") => ComparisonMode::AbsolutePerformance,
                Some("personal") => ComparisonMode::PersonalProgress,
                Some(mode) => return Err(Error::UnknownMode(mode.to_owned())),
            },
            points_for_win: win_points.unwrap_or(defaults.points_for_win),
            points_for_draw: draw_points.unwrap_or(defaults.points_for_draw),
            ..defaults
        })
    }

    pub(crate) fn to_payload(&self) -> Result<Value, Error> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether both rule sets award standings points the same way.
    pub(crate) fn same_scoring(&self, other: &Self) -> bool {
        self.running_mode == other.running_mode
            && self.points_for_win == other.points_for_win
            && self.points_for_draw == other.points_for_draw
            && self.points_for_loss == other.points_for_loss
    }
}

#[cfg(test)]
mod tests {
    use {
        serde_json::json,
        super::*,
    };

    #[test]
    fn legacy_payload_is_migrated() {
        let rules = Rules::migrate(1, json!({ "comparison": "personal", "winPoints": 2 })).unwrap();
        assert_eq!(rules.running_mode, ComparisonMode::PersonalProgress);
        assert_eq!(rules.points_for_win, 2);
        assert_eq!(rules.points_for_draw, 1);
        assert!(rules.peer_confirmation);
    }

    #[test]
    fn missing_payload_uses_defaults() {
        assert_eq!(Rules::migrate(0, Value::Null).unwrap(), Rules::default());
        assert_eq!(Rules::migrate(CURRENT_VERSION, json!({})).unwrap().default_distance_meters, 5000);
    }

    #[test]
    fn future_versions_are_refused() {
        assert!(matches!(Rules::migrate(CURRENT_VERSION + 1, json!({})), Err(Error::FutureVersion(3))));
        assert!(matches!(Rules::migrate(1, json!({ "comparison": "relative" })), Err(Error::UnknownMode(_))));
    }

    #[test]
    fn current_payload_round_trips() {
        let rules = Rules { peer_confirmation: false, ..Rules::default() };
        assert_eq!(Rules::migrate(CURRENT_VERSION, rules.to_payload().unwrap()).unwrap(), rules);
    }
}
