//! Game engine names

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engines a game folder can be classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Engine {
    RenPy,
    Unity,
    Unreal,
    RPGM,
    WolfRPG,
    VisualNovelMaker,
    TyranoBuilder,
    Java,
    Flash,
    RAGS,
    KiriKiri,
    NScripter,
    NVList,
    Sukai2,
    HTML,
    #[default]
    Unknown,
}

impl Engine {
    /// Every known engine, excluding `Unknown`
    pub const KNOWN: [Engine; 15] = [
        Self::RenPy,
        Self::Unity,
        Self::Unreal,
        Self::RPGM,
        Self::WolfRPG,
        Self::VisualNovelMaker,
        Self::TyranoBuilder,
        Self::Java,
        Self::Flash,
        Self::RAGS,
        Self::KiriKiri,
        Self::NScripter,
        Self::NVList,
        Self::Sukai2,
        Self::HTML,
    ];

    /// Name stored in the catalog
    pub fn name(self) -> &'static str {
        match self {
            Self::RenPy => "RenPy",
            Self::Unity => "Unity",
            Self::Unreal => "Unreal",
            Self::RPGM => "RPGM",
            Self::WolfRPG => "WolfRPG",
            Self::VisualNovelMaker => "VisualNovelMaker",
            Self::TyranoBuilder => "TyranoBuilder",
            Self::Java => "Java",
            Self::Flash => "Flash",
            Self::RAGS => "RAGS",
            Self::KiriKiri => "KiriKiri",
            Self::NScripter => "NScripter",
            Self::NVList => "NVList",
            Self::Sukai2 => "Sukai2",
            Self::HTML => "HTML",
            Self::Unknown => "Unknown",
        }
    }

    /// Case-insensitive lookup; anything unrecognized is `Unknown`
    pub fn from_name(name: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|engine| engine.name().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for engine in Engine::KNOWN {
            assert_eq!(Engine::from_name(engine.name()), engine);
        }
        assert_eq!(Engine::from_name("renpy"), Engine::RenPy);
        assert_eq!(Engine::from_name(" Unity "), Engine::Unity);
        assert_eq!(Engine::from_name("Godot"), Engine::Unknown);
        assert_eq!(Engine::default().to_string(), "Unknown");
    }
}
