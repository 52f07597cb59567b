//! Static per-map obstruction lists
//!
//! Only walls that fully separate rooms are listed; thin props are ignored.

use super::Segment;

/// Known maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapId {
    TheSkeld,
    MiraHq,
    Polus,
    Airship,
}

impl MapId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MapId::TheSkeld),
            1 => Some(MapId::MiraHq),
            2 => Some(MapId::Polus),
            3 => Some(MapId::Airship),
            _ => None,
        }
    }

    pub fn walls(self) -> &'static [Segment] {
        match self {
            MapId::MiraHq => MIRA_HQ_WALLS,
            MapId::Polus => POLUS_WALLS,
            MapId::TheSkeld | MapId::Airship => &[],
        }
    }
}

pub const MIRA_HQ_WALLS: &[Segment] = &[
    Segment::new(17.5, -5.0, 17.5, 6.2),
    Segment::new(7.558, 3.206, 7.558, 9.148),
    Segment::new(7.558, 9.148, 12.432, 9.148),
    Segment::new(12.432, 9.148, 12.432, 15.773),
    Segment::new(12.432, 15.773, 5.058, 15.773),
];

pub const POLUS_WALLS: &[Segment] = &[
    Segment::new(25.967, -23.244, 26.6, -23.244),
    Segment::new(26.6, -23.244, 26.6, -19.24),
    Segment::new(26.6, -19.24, 33.5, -19.24),
];

/// Walls for a raw map id; unknown maps have none
pub fn walls_for_map(map: u8) -> &'static [Segment] {
    MapId::from_u8(map).map(MapId::walls).unwrap_or(&[])
}
