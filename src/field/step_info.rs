/// Observable record of everything a single `Field::step` call did. External
/// consumers (the distributor, the netplay layer) read only this structure
/// and the field's public queries; they never poke the grid directly.
#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    pub combo: u32,
    pub chain: u32,
    pub raised: bool,
    pub swap: bool,
    pub moved: bool,
    pub blocks: BlocksInfo,
}

#[derive(Debug, Clone, Default)]
pub struct BlocksInfo {
    pub laid_count: u32,
    pub popped: Vec<PoppedBlock>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoppedBlock {
    pub chain: u32,
    pub pos: (u8, u8),
    pub group_end: bool,
}
