use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::model::Household;

/// At most this many households share one machine.
pub const MAX_HOUSEHOLDS: usize = 4;

/// The colors a household can pick to mark its bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HouseholdColor {
    Red,
    Blue,
    Green,
    Purple,
    Orange,
    Pink,
    Yellow,
    Cyan,
    Lime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextColor {
    Black,
    White,
}

impl TextColor {
    pub fn as_str(self) -> &'static str {
        match self {
            TextColor::Black => "black",
            TextColor::White => "white",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    pub color: HouseholdColor,
    pub name: &'static str,
    pub hex: &'static str,
    pub text: TextColor,
}

/// Palette order is presentation order.
pub const PALETTE: [PaletteEntry; 9] = [
    entry(HouseholdColor::Red, "red", "#EF4444", TextColor::White),
    entry(HouseholdColor::Blue, "blue", "#3B82F6", TextColor::White),
    entry(HouseholdColor::Green, "green", "#10B981", TextColor::White),
    entry(HouseholdColor::Purple, "purple", "#8B5CF6", TextColor::White),
    entry(HouseholdColor::Orange, "orange", "#F97316", TextColor::White),
    entry(HouseholdColor::Pink, "pink", "#EC4899", TextColor::White),
    entry(HouseholdColor::Yellow, "yellow", "#EAB308", TextColor::Black),
    entry(HouseholdColor::Cyan, "cyan", "#06B6D4", TextColor::White),
    entry(HouseholdColor::Lime, "lime", "#84CC16", TextColor::Black),
];

const fn entry(color: HouseholdColor, name: &'static str, hex: &'static str, text: TextColor) -> PaletteEntry {
    PaletteEntry { color, name, hex, text }
}

impl HouseholdColor {
    pub fn entry(self) -> &'static PaletteEntry {
        // PALETTE lists every variant exactly once, in declaration order.
        &PALETTE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn hex(self) -> &'static str {
        self.entry().hex
    }

    /// Text color that stays readable on this background.
    pub fn text_color(self) -> TextColor {
        self.entry().text
    }

    /// Accepts a palette name (`"lime"`) or hex value (`"#84CC16"`), case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        PALETTE
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(s) || e.hex.eq_ignore_ascii_case(s))
            .map(|e| e.color)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HouseholdError {
    #[error("all {MAX_HOUSEHOLDS} household slots are taken")]
    HouseholdsFull,
    #[error("household name must not be empty")]
    EmptyName,
    #[error("color {0} is already used by another household")]
    ColorTaken(&'static str),
    #[error("unknown color: {0}")]
    UnknownColor(String),
}

/// Palette entries no household has claimed yet.
pub fn available_colors<'a>(used: impl IntoIterator<Item = &'a HouseholdColor>) -> Vec<HouseholdColor> {
    let used: Vec<HouseholdColor> = used.into_iter().copied().collect();
    PALETTE
        .iter()
        .map(|e| e.color)
        .filter(|c| !used.contains(c))
        .collect()
}

/// Checks a new household against the existing ones. Returns the trimmed name.
pub fn validate_registration(
    existing: &[Household],
    name: &str,
    color: HouseholdColor,
) -> Result<String, HouseholdError> {
    if existing.len() >= MAX_HOUSEHOLDS {
        return Err(HouseholdError::HouseholdsFull);
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(HouseholdError::EmptyName);
    }
    if existing.iter().any(|h| h.color == color) {
        return Err(HouseholdError::ColorTaken(color.name()));
    }
    Ok(name.to_string())
}

/// A household may keep its own color or move to any unclaimed one.
pub fn validate_profile_update(
    existing: &[Household],
    id: Ulid,
    name: &str,
    color: HouseholdColor,
) -> Result<String, HouseholdError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HouseholdError::EmptyName);
    }
    if existing.iter().any(|h| h.id != id && h.color == color) {
        return Err(HouseholdError::ColorTaken(color.name()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn household(color: HouseholdColor) -> Household {
        Household {
            id: Ulid::new(),
            name: "h".into(),
            color,
            created_at: 0,
        }
    }

    #[test]
    fn palette_matches_declaration_order() {
        for (i, e) in PALETTE.iter().enumerate() {
            assert_eq!(e.color as usize, i);
            assert_eq!(e.color.entry(), e);
        }
    }

    #[test]
    fn only_yellow_and_lime_use_black_text() {
        let black: Vec<HouseholdColor> = PALETTE
            .iter()
            .filter(|e| e.text == TextColor::Black)
            .map(|e| e.color)
            .collect();
        assert_eq!(black, vec![HouseholdColor::Yellow, HouseholdColor::Lime]);
    }

    #[test]
    fn parse_by_name_or_hex() {
        assert_eq!(HouseholdColor::parse("Lime"), Some(HouseholdColor::Lime));
        assert_eq!(HouseholdColor::parse("#eab308"), Some(HouseholdColor::Yellow));
        assert_eq!(HouseholdColor::parse("magenta"), None);
    }

    #[test]
    fn available_colors_excludes_used() {
        let used = [HouseholdColor::Red, HouseholdColor::Lime];
        let free = available_colors(&used);
        assert_eq!(free.len(), 7);
        assert!(!free.contains(&HouseholdColor::Red));
        assert!(!free.contains(&HouseholdColor::Lime));
        assert_eq!(free[0], HouseholdColor::Blue);
    }

    #[test]
    fn registration_capacity() {
        let existing: Vec<Household> = [
            HouseholdColor::Red,
            HouseholdColor::Blue,
            HouseholdColor::Green,
            HouseholdColor::Purple,
        ]
        .into_iter()
        .map(household)
        .collect();
        assert_eq!(
            validate_registration(&existing, "fifth", HouseholdColor::Cyan),
            Err(HouseholdError::HouseholdsFull)
        );
        assert!(validate_registration(&existing[..3], "fourth", HouseholdColor::Cyan).is_ok());
    }

    #[test]
    fn registration_rejects_taken_color_and_blank_name() {
        let existing = vec![household(HouseholdColor::Pink)];
        assert_eq!(
            validate_registration(&existing, "x", HouseholdColor::Pink),
            Err(HouseholdError::ColorTaken("pink"))
        );
        assert_eq!(
            validate_registration(&existing, "   ", HouseholdColor::Cyan),
            Err(HouseholdError::EmptyName)
        );
        assert_eq!(
            validate_registration(&existing, "  2. sal  ", HouseholdColor::Cyan),
            Ok("2. sal".to_string())
        );
    }

    #[test]
    fn profile_update_may_keep_own_color() {
        let me = household(HouseholdColor::Orange);
        let other = household(HouseholdColor::Green);
        let existing = vec![me.clone(), other];
        assert!(validate_profile_update(&existing, me.id, "me", HouseholdColor::Orange).is_ok());
        assert_eq!(
            validate_profile_update(&existing, me.id, "me", HouseholdColor::Green),
            Err(HouseholdError::ColorTaken("green"))
        );
        assert!(validate_profile_update(&existing, me.id, "me", HouseholdColor::Lime).is_ok());
    }
}
