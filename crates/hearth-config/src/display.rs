use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};

/// Display settings for terminal front-ends
#[derive(Clone, Debug, Default, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct DisplaySettings {
    /// Progress bar style: "classic", "modern", or "minimal"
    /// Default: "modern"
    pub progress_style: Option<ProgressStyle>,

    /// Show unicode icons/symbols in output
    /// Default: true
    pub icons: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStyle {
    /// ASCII bar (`=>`)
    Classic,
    /// Unicode bar with spinner
    #[default]
    Modern,
    /// Percentage only, no bar
    Minimal,
}

impl DisplaySettings {
    pub fn progress_style(&self) -> ProgressStyle {
        self.progress_style.unwrap_or_default()
    }

    pub fn icons(&self) -> bool {
        self.icons.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DisplaySettings::default();
        assert_eq!(settings.progress_style(), ProgressStyle::Modern);
        assert!(settings.icons());
    }

    #[test]
    fn test_progress_style_from_toml() {
        let settings: DisplaySettings =
            toml::from_str("progress_style = \"minimal\"\nicons = false").unwrap();
        assert_eq!(settings.progress_style(), ProgressStyle::Minimal);
        assert!(!settings.icons());
    }
}
