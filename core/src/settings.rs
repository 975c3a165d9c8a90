//! User-level preferences, persisted under the `settings` key.

use crate::types::LocationId;
use serde::{Deserialize, Serialize};

/// How responses should be phrased.
///
/// Stored and handed back to callers; the simulator never formats prose
/// itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    /// Short answers
    #[default]
    Concise,
    /// Full explanations
    Detailed,
    /// Casual tone
    Friendly,
    /// Raw values and identifiers
    Technical,
}

/// Preferences of the (single) user of the simulator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Location used when a request names none
    pub current_location: Option<LocationId>,
    /// Require confirmation before printing on a non-default printer
    pub ask_before_switch: bool,
    /// Response phrasing preference
    pub response_style: ResponseStyle,
    /// Storage version this record was loaded at
    pub version: u64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            current_location: None,
            ask_before_switch: true,
            response_style: ResponseStyle::default(),
            version: 0,
        }
    }
}

/// Partial update of [`UserSettings`].
///
/// `current_location` distinguishes "leave alone" (absent) from "clear"
/// (`null`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettingsPatch {
    /// New current location; `Some(None)` clears it
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub current_location: Option<Option<LocationId>>,
    /// New confirmation preference
    pub ask_before_switch: Option<bool>,
    /// New response style
    pub response_style: Option<ResponseStyle>,
}

impl UserSettingsPatch {
    /// Applies the present fields.
    pub fn apply(self, settings: &mut UserSettings) {
        if let Some(location) = self.current_location {
            settings.current_location = location;
        }
        if let Some(ask) = self.ask_before_switch {
            settings.ask_before_switch = ask;
        }
        if let Some(style) = self.response_style {
            settings.response_style = style;
        }
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;

    #[test]
    fn confirmation_is_on_by_default() {
        let settings: UserSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.ask_before_switch);
        assert_eq!(settings.response_style, ResponseStyle::Concise);
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let mut settings = UserSettings {
            current_location: Some(LocationId::new("home")),
            ..UserSettings::default()
        };

        let untouched: UserSettingsPatch =
            serde_json::from_str(r#"{"response_style": "technical"}"#).unwrap();
        untouched.apply(&mut settings);
        assert_eq!(settings.current_location, Some(LocationId::new("home")));
        assert_eq!(settings.response_style, ResponseStyle::Technical);

        let cleared: UserSettingsPatch =
            serde_json::from_str(r#"{"current_location": null}"#).unwrap();
        cleared.apply(&mut settings);
        assert_eq!(settings.current_location, None);
    }
}
