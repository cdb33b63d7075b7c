use serde::{Deserialize, Serialize};

use crate::field::garbage::GbId;

/// Width of every field's grid, in columns.
pub const WIDTH: usize = 6;
/// Height of every field's grid, in rows. Row 0 is the raise-preview row.
pub const HEIGHT: usize = 13;
/// Index of the top playable row.
pub const TOP: usize = HEIGHT - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorState {
    Rest,
    Fall,
    Laid,
    Levitate,
    Flash,
    Mutate,
    Cleared,
    Transformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GarbageBlockState {
    Rest,
    Fall,
    Flash,
    Mutate,
    Transformed,
}

/// Bookkeeping shared by colour and garbage blocks alike.
///
/// `swapped` is only ever set on colour blocks (garbage never participates
/// in a swap), but it lives here rather than on a colour-only variant so a
/// block's transition logic can flip it without re-matching the outer enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockMeta {
    pub swapped: bool,
    pub chaining: bool,
    pub ntick: u64,
    pub group_pos: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    None,
    Color {
        state: ColorState,
        color_index: u8,
        meta: BlockMeta,
    },
    Garbage {
        state: GarbageBlockState,
        garbage_ref: GbId,
        meta: BlockMeta,
    },
}

impl Default for Block {
    fn default() -> Self {
        Block::None
    }
}

impl Block {
    pub fn color(color_index: u8, state: ColorState) -> Self {
        Block::Color {
            state,
            color_index,
            meta: BlockMeta::default(),
        }
    }

    pub fn garbage(garbage_ref: GbId, state: GarbageBlockState) -> Self {
        Block::Garbage {
            state,
            garbage_ref,
            meta: BlockMeta::default(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Block::None)
    }

    pub fn meta(&self) -> Option<&BlockMeta> {
        match self {
            Block::None => None,
            Block::Color { meta, .. } | Block::Garbage { meta, .. } => Some(meta),
        }
    }

    pub fn meta_mut(&mut self) -> Option<&mut BlockMeta> {
        match self {
            Block::None => None,
            Block::Color { meta, .. } | Block::Garbage { meta, .. } => Some(meta),
        }
    }

    pub fn is_chaining(&self) -> bool {
        self.meta().map(|m| m.chaining).unwrap_or(false)
    }

    /// A block this field's cursor could swap: empty, or a resting/falling colour block.
    pub fn is_swappable(&self) -> bool {
        match self {
            Block::None => true,
            Block::Color { state, meta, .. } => {
                !meta.swapped && matches!(state, ColorState::Rest | ColorState::Fall)
            }
            Block::Garbage { .. } => false,
        }
    }
}
