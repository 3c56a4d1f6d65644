use serde::{Deserialize, Serialize};

use crate::error::{AssistantError, Result};

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 10;
pub const DEFAULT_IMPORTANCE: u8 = 5;

/// A research theme with a user-assigned importance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub text: String,
    pub importance: u8,
}

impl Theme {
    pub fn new(text: impl Into<String>, importance: u8) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AssistantError::InvalidArgument(
                "theme text is empty".to_string(),
            ));
        }
        validate_importance(importance)?;
        Ok(Self { text, importance })
    }

    pub fn rate(&mut self, importance: u8) -> Result<()> {
        validate_importance(importance)?;
        self.importance = importance;
        Ok(())
    }
}

fn validate_importance(importance: u8) -> Result<()> {
    if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&importance) {
        return Err(AssistantError::InvalidArgument(format!(
            "importance {} is outside {}..={}",
            importance, MIN_IMPORTANCE, MAX_IMPORTANCE
        )));
    }
    Ok(())
}

/// One theme per non-blank line of `text`, all at `importance`
pub fn themes_from_text(text: &str, importance: u8) -> Result<Vec<Theme>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Theme::new(line, importance))
        .collect()
}

/// Checks every theme in a list received from outside
pub fn validate_themes(themes: &[Theme]) -> Result<()> {
    themes
        .iter()
        .try_for_each(|theme| Theme::new(theme.text.as_str(), theme.importance).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_must_be_in_range() {
        assert!(Theme::new("Sepsis biomarkers", 1).is_ok());
        assert!(Theme::new("Sepsis biomarkers", 10).is_ok());
        assert!(Theme::new("Sepsis biomarkers", 0).is_err());
        assert!(Theme::new("Sepsis biomarkers", 11).is_err());
        assert!(Theme::new("   ", 5).is_err());
    }

    #[test]
    fn rating_keeps_old_value_on_error() {
        let mut theme = Theme::new("Fluid resuscitation", 4).unwrap();
        theme.rate(9).unwrap();
        assert!(theme.rate(12).is_err());
        assert_eq!(theme.importance, 9);
    }

    #[test]
    fn free_text_splits_into_lines() {
        let themes = themes_from_text("  Early lactate\n\nPaediatric sepsis \r\n", DEFAULT_IMPORTANCE).unwrap();
        assert_eq!(
            themes,
            vec![
                Theme::new("Early lactate", 5).unwrap(),
                Theme::new("Paediatric sepsis", 5).unwrap(),
            ]
        );
    }

    #[test]
    fn received_lists_are_validated() {
        let bad = vec![Theme {
            text: "Outcomes".to_string(),
            importance: 0,
        }];
        assert!(validate_themes(&bad).is_err());
        assert!(validate_themes(&[]).is_ok());
    }
}
