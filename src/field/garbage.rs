use serde::{Deserialize, Serialize};

/// Identifier unique across a match's combined hanging + waiting registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GbId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GbType {
    Combo,
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GbPos {
    pub x: u8,
    pub y: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GbSize {
    pub x: u8,
    pub y: u8,
}

/// A garbage block, tracked by the match's arena and referenced by `GbId`
/// from on-field blocks rather than by pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Garbage {
    pub gbid: GbId,
    pub from_field: Option<u32>,
    pub to_field: u32,
    pub gb_type: GbType,
    pub pos: GbPos,
    pub size: GbSize,
}

impl Garbage {
    pub fn width(&self, field_width: u8) -> u8 {
        match self.gb_type {
            GbType::Combo => self.size.x,
            GbType::Chain => field_width,
        }
    }
}
