//! Fixed quality presets offered on the inline keyboard.

use std::fmt;

use crate::messaging::types::{InlineButton, InlineKeyboard};

/// Prefix shared by every quality callback token.
pub const CALLBACK_PREFIX: &str = "q_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QualityPreset {
    Best,
    P720,
    P1080,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 3] = [QualityPreset::Best, QualityPreset::P720, QualityPreset::P1080];

    /// yt-dlp `-f` selector. These three strings are the only ones ever passed
    /// to the downloader.
    pub fn format_selector(self) -> &'static str {
        match self {
            QualityPreset::Best => "bv*+ba/b",
            QualityPreset::P720 => "bv*[height<=720]+ba/b[height<=720]",
            QualityPreset::P1080 => "bv*[height<=1080]+ba/b[height<=1080]",
        }
    }

    pub fn callback_data(self) -> &'static str {
        match self {
            QualityPreset::Best => "q_best",
            QualityPreset::P720 => "q_720",
            QualityPreset::P1080 => "q_1080",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityPreset::Best => "Best",
            QualityPreset::P720 => "720p",
            QualityPreset::P1080 => "1080p",
        }
    }

    fn button_label(self) -> &'static str {
        match self {
            QualityPreset::Best => "⭐ Best",
            QualityPreset::P720 => "720p",
            QualityPreset::P1080 => "1080p",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.callback_data() == data)
    }

    /// The three quality buttons, on one row.
    pub fn keyboard() -> InlineKeyboard {
        InlineKeyboard::single_row(
            Self::ALL
                .into_iter()
                .map(|p| InlineButton::new(p.button_label(), p.callback_data()))
                .collect(),
        )
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_fixed_table() {
        assert_eq!(QualityPreset::Best.format_selector(), "bv*+ba/b");
        assert_eq!(
            QualityPreset::P720.format_selector(),
            "bv*[height<=720]+ba/b[height<=720]"
        );
        assert_eq!(
            QualityPreset::P1080.format_selector(),
            "bv*[height<=1080]+ba/b[height<=1080]"
        );
    }

    #[test]
    fn callback_tokens_parse_back() {
        for p in QualityPreset::ALL {
            assert!(p.callback_data().starts_with(CALLBACK_PREFIX));
            assert_eq!(QualityPreset::from_callback_data(p.callback_data()), Some(p));
        }
        assert_eq!(QualityPreset::from_callback_data("q_4k"), None);
        assert_eq!(QualityPreset::from_callback_data("best"), None);
    }

    #[test]
    fn keyboard_has_three_buttons_on_one_row() {
        let kb = QualityPreset::keyboard();
        assert_eq!(kb.rows.len(), 1);
        let data: Vec<&str> = kb.buttons().map(|b| b.callback_data.as_str()).collect();
        assert_eq!(data, vec!["q_best", "q_720", "q_1080"]);
        let labels: Vec<&str> = kb.buttons().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["⭐ Best", "720p", "1080p"]);
    }
}
