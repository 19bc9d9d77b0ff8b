use serde::{Deserialize, Serialize};
use std::fmt;

/// Event types driven by the scheduler, each on its own timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Flash,
    Subliminal,
    Startle,
    Bubble,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Flash,
        EventType::Subliminal,
        EventType::Startle,
        EventType::Bubble,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Flash => "flash",
            EventType::Subliminal => "subliminal",
            EventType::Startle => "startle",
            EventType::Bubble => "bubble",
        }
    }

    /// Everything except the startle video re-arms itself after firing.
    pub fn self_rearming(self) -> bool {
        !matches!(self, EventType::Startle)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flash" => Ok(EventType::Flash),
            "subliminal" => Ok(EventType::Subliminal),
            "startle" | "video" => Ok(EventType::Startle),
            "bubble" | "bubbles" => Ok(EventType::Bubble),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Effects whose concurrent presence the arbiter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Flash,
    Bubble,
    Overlay,
    Video,
}

/// Media categories served by the media library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    FlashImage,
    FlashSound,
    StartleVideo,
    SubliminalAudio,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_event_type_aliases() {
        assert_eq!("Flash".parse::<EventType>(), Ok(EventType::Flash));
        assert_eq!("video".parse::<EventType>(), Ok(EventType::Startle));
        assert_eq!("bubbles".parse::<EventType>(), Ok(EventType::Bubble));
        assert!("spiral".parse::<EventType>().is_err());
    }

    #[test]
    fn test_only_startle_is_not_self_rearming() {
        let non: Vec<_> = EventType::ALL
            .iter()
            .filter(|t| !t.self_rearming())
            .collect();
        assert_eq!(non, vec![&EventType::Startle]);
    }
}
