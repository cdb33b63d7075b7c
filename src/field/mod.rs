//! One player's grid and the deterministic, per-tick state machine that
//! advances it: matching, chains, garbage evolution, raising, and the
//! cursor/swap/raise input handling. See `step` for the fixed phase order.

pub mod block;
pub mod conf;
pub mod garbage;
pub mod grid;
pub mod rng;
pub mod step_info;

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use block::{Block, BlockMeta, ColorState, GarbageBlockState, HEIGHT, TOP, WIDTH};
use conf::FieldConf;
use garbage::{GbId, Garbage, GbType};
use grid::{detect_matches, Grid};
use rng::Rng;
use step_info::{BlocksInfo, PoppedBlock, StepInfo};

/// One rising-row's worth of raise-progress ticks before `raise()` fires.
pub const RAISE_PROGRESS_MAX: u32 = 65536;
const MOVE_REPEAT_PERIOD: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub swap: bool,
    pub raise: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyRepeat {
    ticks_held: u64,
}

impl KeyRepeat {
    /// Rising-edge-then-every-`period`-ticks repeat, used for cursor moves.
    fn poll_repeating(&mut self, held: bool, period: u64) -> bool {
        if !held {
            self.ticks_held = 0;
            return false;
        }
        let fires = self.ticks_held == 0 || self.ticks_held % period == 0;
        self.ticks_held += 1;
        fires
    }

    /// Rising-edge-only, used for swap.
    fn poll_edge(&mut self, held: bool) -> bool {
        if !held {
            self.ticks_held = 0;
            return false;
        }
        let fires = self.ticks_held == 0;
        self.ticks_held += 1;
        fires
    }
}

fn orthogonal_neighbors(x: usize, y: usize, height: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(4);
    if x > 0 {
        out.push((x - 1, y));
    }
    if x + 1 < WIDTH {
        out.push((x + 1, y));
    }
    if y > 0 {
        out.push((x, y - 1));
    }
    if y + 1 < height {
        out.push((x, y + 1));
    }
    out
}

fn color_of(block: Block) -> Option<u8> {
    match block {
        Block::Color { color_index, .. } => Some(color_index),
        _ => None,
    }
}

/// A single player's simulated grid and everything required to advance it
/// one tick at a time without consulting anything outside its own state and
/// the inputs it's handed.
pub struct Field {
    pub fldid: u32,
    conf: FieldConf,
    rng: Rng,
    grid: Grid,
    tick: u64,
    chain: u32,
    rank: u32,
    cursor: (u8, u8),
    swap_pos: Option<(u8, u8)>,
    swap_dt: u64,
    lost: bool,
    lost_dt: u64,
    raise_progress: u32,
    raise_speed_index: usize,
    manual_raise: bool,
    stop_dt: u64,
    transformed_nb: u32,
    raised_lines: u64,
    gb_drop_pos: [u8; WIDTH + 1],
    enable_swap: bool,
    enable_raise: bool,
    step_info: StepInfo,
    gbs_hang: VecDeque<GbId>,
    gbs_wait: VecDeque<GbId>,
    gbs_drop: VecDeque<Garbage>,
    gbs_on_field: HashMap<GbId, Garbage>,
    key_left: KeyRepeat,
    key_right: KeyRepeat,
    key_up: KeyRepeat,
    key_down: KeyRepeat,
    key_swap: KeyRepeat,
}

impl Field {
    pub fn new(fldid: u32, conf: FieldConf, seed: u32) -> Self {
        Self {
            fldid,
            conf,
            rng: Rng::new(seed),
            grid: Grid::new(HEIGHT),
            tick: 0,
            chain: 1,
            rank: 0,
            cursor: (WIDTH as u8 / 2 - 1, HEIGHT as u8 / 2),
            swap_pos: None,
            swap_dt: 0,
            lost: false,
            lost_dt: 0,
            raise_progress: 0,
            raise_speed_index: 0,
            manual_raise: false,
            stop_dt: 0,
            transformed_nb: 0,
            raised_lines: 0,
            gb_drop_pos: [0; WIDTH + 1],
            enable_swap: true,
            enable_raise: true,
            step_info: StepInfo::default(),
            gbs_hang: VecDeque::new(),
            gbs_wait: VecDeque::new(),
            gbs_drop: VecDeque::new(),
            gbs_on_field: HashMap::new(),
            key_left: KeyRepeat::default(),
            key_right: KeyRepeat::default(),
            key_up: KeyRepeat::default(),
            key_down: KeyRepeat::default(),
            key_swap: KeyRepeat::default(),
        }
    }

    /// Fills the bottom play rows with a deterministic random starting
    /// layout drawn from this field's own RNG, avoiding any immediate match.
    pub fn init_match(&mut self) {
        for y in 1..=6usize {
            for x in 0..WIDTH {
                let left = if x > 0 { color_of(self.grid.get(x - 1, y)) } else { None };
                let below = if y > 1 { color_of(self.grid.get(x, y - 1)) } else { None };
                let color = self.draw_color_avoiding([left, below]);
                self.grid.set(x, y, Block::color(color, ColorState::Rest));
            }
        }
    }

    pub fn conf(&self) -> &FieldConf {
        &self.conf
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn set_rank(&mut self, rank: u32) {
        self.rank = rank;
    }

    pub fn chain(&self) -> u32 {
        self.chain
    }

    pub fn lost(&self) -> bool {
        self.lost
    }

    pub fn cursor(&self) -> (u8, u8) {
        self.cursor
    }

    pub fn raise_progress(&self) -> u32 {
        self.raise_progress
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Exposed so a client mirroring a match can seed the initial random
    /// fill shipped once in `PlayerField`; the simulation itself never needs
    /// unchecked write access to its own grid from outside `step`.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    pub fn seed(&self) -> u32 {
        self.rng.seed()
    }

    pub fn set_enable_swap(&mut self, enabled: bool) {
        self.enable_swap = enabled;
    }

    pub fn set_enable_raise(&mut self, enabled: bool) {
        self.enable_raise = enabled;
    }

    pub fn abort(&mut self) {
        self.lost = true;
    }

    pub fn hanging_len(&self) -> usize {
        self.gbs_hang.len()
    }

    pub fn hanging_front(&self) -> Option<GbId> {
        self.gbs_hang.front().copied()
    }

    pub fn hanging_leading_chain_count(&self, hanging_by_gbid: &HashMap<GbId, Garbage>) -> usize {
        self.gbs_hang
            .iter()
            .take_while(|id| {
                hanging_by_gbid
                    .get(id)
                    .map(|g| g.gb_type == GbType::Chain)
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn insert_hanging_front(&mut self, gbid: GbId) {
        self.gbs_hang.push_front(gbid);
    }

    pub fn insert_hanging_back(&mut self, gbid: GbId) {
        self.gbs_hang.push_back(gbid);
    }

    pub fn remove_hanging(&mut self, gbid: GbId) {
        self.gbs_hang.retain(|id| *id != gbid);
    }

    /// Moves a garbage id from this field's hanging ordering into its
    /// waiting ordering. The garbage *record* lives in the match's arena;
    /// the field only tracks per-registry order.
    pub fn wait_garbage_drop(&mut self, gbid: GbId) {
        self.gbs_hang.retain(|id| *id != gbid);
        self.gbs_wait.push_back(gbid);
    }

    /// Acknowledges a drop: the garbage leaves the waiting registry
    /// entirely and is queued to materialise on the next eligible tick.
    pub fn drop_next_garbage(&mut self, garbage: Garbage) {
        self.gbs_wait.retain(|id| *id != garbage.gbid);
        self.gbs_drop.push_back(garbage);
    }

    pub fn on_field_garbages(&self) -> impl Iterator<Item = &Garbage> {
        self.gbs_on_field.values()
    }

    fn draw_color_avoiding<I: IntoIterator<Item = Option<u8>>>(&mut self, forbidden: I) -> u8 {
        let forbidden: HashSet<u8> = forbidden.into_iter().flatten().collect();
        loop {
            let candidate = self.rng.next_range(self.conf.color_count as u16) as u8;
            if !forbidden.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// One tick. Sub-phases run in the fixed order described by the field
    /// simulator's step algorithm; each reads the grid left by the previous.
    pub fn step(&mut self, keys: KeyState) -> StepInfo {
        self.tick += 1;
        self.step_info = StepInfo::default();
        if self.lost {
            return self.step_info.clone_empty();
        }

        let full = (0..WIDTH).any(|x| !self.grid.get(x, TOP).is_none());
        let swapping = self.swap_pos.is_some();
        let mut raise = self.enable_raise && !swapping;
        let mut stop_dec = true;

        self.evolve_blocks(&mut raise, &mut stop_dec);
        self.apply_matches();
        self.drop_from_hanging(full, &mut raise);
        self.tick_swap();
        self.process_input(keys);
        self.assign_pop_ticks();
        self.terminate_chain_if_done();
        self.update_stop_and_raise(full, raise, stop_dec);
        self.advance_speed_curve();

        self.step_info.clone_empty_keep()
    }

    fn evolve_blocks(&mut self, raise: &mut bool, stop_dec: &mut bool) {
        let tick = self.tick;
        let height = self.grid.height();
        for y in 1..height {
            for x in 0..WIDTH {
                let block = self.grid.get(x, y);
                let above = if y + 1 < height { self.grid.get(x, y + 1) } else { Block::None };
                match block {
                    Block::None => {}
                    Block::Color { state, color_index, mut meta } => {
                        if meta.swapped {
                            continue;
                        }
                        let above_exists = y + 1 < height;
                        let new = self.evolve_color(
                            x, y, state, color_index, &mut meta, above, above_exists, tick, raise, stop_dec,
                        );
                        self.grid.set(x, y, new);
                    }
                    Block::Garbage { state, garbage_ref, mut meta } => {
                        let new = self.evolve_garbage(
                            x, y, state, garbage_ref, &mut meta, above, tick, raise, stop_dec,
                        );
                        self.grid.set(x, y, new);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evolve_color(
        &mut self,
        x: usize,
        y: usize,
        state: ColorState,
        color_index: u8,
        meta: &mut BlockMeta,
        above: Block,
        above_exists: bool,
        tick: u64,
        raise: &mut bool,
        stop_dec: &mut bool,
    ) -> Block {
        let above_open = above_exists && above.is_none();
        match state {
            ColorState::Rest | ColorState::Laid => {
                if above_open {
                    meta.ntick = tick + self.conf.levitate_ticks;
                    meta.chaining = false;
                    Block::Color { state: ColorState::Levitate, color_index, meta: *meta }
                } else if let Block::Color { state: ColorState::Levitate, meta: above_meta, .. } = above {
                    meta.ntick = above_meta.ntick;
                    meta.chaining = above_meta.chaining;
                    Block::Color { state: ColorState::Levitate, color_index, meta: *meta }
                } else {
                    meta.chaining = false;
                    Block::Color { state: ColorState::Rest, color_index, meta: *meta }
                }
            }
            ColorState::Levitate => {
                if let Block::Color { state: ColorState::Levitate, meta: above_meta, .. } = above {
                    meta.chaining |= above_meta.chaining;
                }
                if tick >= meta.ntick {
                    if above_open {
                        Block::Color { state: ColorState::Fall, color_index, meta: *meta }
                    } else {
                        Block::Color { state: ColorState::Laid, color_index, meta: *meta }
                    }
                } else {
                    Block::Color { state: ColorState::Levitate, color_index, meta: *meta }
                }
            }
            ColorState::Fall => {
                if above_open {
                    self.grid.set(x, y + 1, Block::Color { state: ColorState::Fall, color_index, meta: *meta });
                    Block::None
                } else if let Block::Color { state: ColorState::Levitate, meta: above_meta, .. } = above {
                    meta.ntick = above_meta.ntick;
                    meta.chaining = above_meta.chaining;
                    Block::Color { state: ColorState::Levitate, color_index, meta: *meta }
                } else {
                    self.step_info.blocks.laid_count += 1;
                    Block::Color { state: ColorState::Laid, color_index, meta: *meta }
                }
            }
            ColorState::Flash | ColorState::Mutate | ColorState::Cleared | ColorState::Transformed => {
                *raise = false;
                if state == ColorState::Flash {
                    *stop_dec = false;
                }
                if tick < meta.ntick {
                    return Block::Color { state, color_index, meta: *meta };
                }
                match state {
                    ColorState::Flash => {
                        meta.ntick = 0;
                        Block::Color { state: ColorState::Mutate, color_index, meta: *meta }
                    }
                    ColorState::Mutate => {
                        meta.ntick = tick + meta.group_pos as u64 * self.conf.pop_ticks + 1;
                        Block::Color { state: ColorState::Cleared, color_index, meta: *meta }
                    }
                    ColorState::Cleared => {
                        self.propagate_chain_above(x, y);
                        Block::None
                    }
                    ColorState::Transformed => {
                        meta.chaining = true;
                        meta.ntick = 0;
                        Block::Color { state: ColorState::Levitate, color_index, meta: *meta }
                    }
                    _ => unreachable!(),
                }
            }
        }
    }

    /// Any contiguous column of Rest/Laid above a cell that just cleared
    /// becomes Levitate and carries `chaining=true` forward — the mechanism
    /// chains propagate through.
    fn propagate_chain_above(&mut self, x: usize, y: usize) {
        let tick = self.tick;
        let levitate_ticks = self.conf.levitate_ticks;
        let mut yy = y + 1;
        while yy < self.grid.height() {
            match self.grid.get(x, yy) {
                Block::Color { state: ColorState::Rest, color_index, mut meta }
                | Block::Color { state: ColorState::Laid, color_index, mut meta } => {
                    meta.chaining = true;
                    meta.ntick = tick + levitate_ticks;
                    self.grid.set(
                        x,
                        yy,
                        Block::Color { state: ColorState::Levitate, color_index, meta },
                    );
                    break;
                }
                _ => break,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evolve_garbage(
        &mut self,
        x: usize,
        y: usize,
        state: GarbageBlockState,
        gbid: GbId,
        meta: &mut BlockMeta,
        above: Block,
        tick: u64,
        raise: &mut bool,
        stop_dec: &mut bool,
    ) -> Block {
        match state {
            GarbageBlockState::Rest => {
                let below_ok = y > 0
                    && (0..WIDTH).all(|cx| {
                        let cell = self.grid.get(cx, y - 1);
                        matches!(cell, Block::None)
                            || matches!(cell, Block::Garbage { garbage_ref, .. } if garbage_ref == gbid)
                    });
                if y > 0 && below_ok {
                    Block::Garbage { state: GarbageBlockState::Fall, garbage_ref: gbid, meta: *meta }
                } else {
                    Block::Garbage { state: GarbageBlockState::Rest, garbage_ref: gbid, meta: *meta }
                }
            }
            GarbageBlockState::Fall => {
                let below_clear = y > 0
                    && (0..WIDTH).all(|cx| matches!(self.grid.get(cx, y - 1), Block::None));
                if below_clear {
                    self.grid
                        .set(x, y - 1, Block::Garbage { state: GarbageBlockState::Fall, garbage_ref: gbid, meta: *meta });
                    Block::None
                } else {
                    Block::Garbage { state: GarbageBlockState::Rest, garbage_ref: gbid, meta: *meta }
                }
            }
            GarbageBlockState::Flash | GarbageBlockState::Mutate | GarbageBlockState::Transformed => {
                *raise = false;
                if state == GarbageBlockState::Flash {
                    *stop_dec = false;
                }
                if tick < meta.ntick {
                    return Block::Garbage { state, garbage_ref: gbid, meta: *meta };
                }
                match state {
                    GarbageBlockState::Flash => {
                        meta.ntick = 0;
                        Block::Garbage { state: GarbageBlockState::Mutate, garbage_ref: gbid, meta: *meta }
                    }
                    GarbageBlockState::Mutate => {
                        let color = self.transform_garbage_color(x, y);
                        meta.ntick = tick + self.conf.transform_ticks;
                        if let Some(garbage) = self.gbs_on_field.get(&gbid) {
                            let last = garbage.size.x as usize * garbage.size.y.max(1) as usize <= 1;
                            if last {
                                self.gbs_on_field.remove(&gbid);
                            }
                        }
                        let _ = above;
                        Block::Color { state: ColorState::Transformed, color_index: color, meta: *meta }
                    }
                    _ => unreachable!(),
                }
            }
        }
    }

    fn transform_garbage_color(&mut self, x: usize, y: usize) -> u8 {
        if self.transformed_nb >= WIDTH as u32 - 1 {
            self.transformed_nb = 0;
            for yy in (0..y).rev() {
                if let Block::Color { state, color_index, .. } = self.grid.get(x, yy) {
                    if state != ColorState::Mutate {
                        return color_index;
                    }
                }
            }
        } else {
            self.transformed_nb += 1;
        }
        let right = if x + 1 < WIDTH { color_of(self.grid.get(x + 1, y)) } else { None };
        let below = if y > 0 { color_of(self.grid.get(x, y - 1)) } else { None };
        self.draw_color_avoiding([right, below])
    }

    fn apply_matches(&mut self) {
        let overlay = detect_matches(&self.grid);
        let tick = self.tick;
        let flash_ticks = self.conf.flash_ticks;

        let mut matched_cells = Vec::new();
        let mut combo = 0u32;
        let mut chained = false;
        for (y, row) in overlay.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                if cell.is_some() {
                    matched_cells.push((x, y));
                    combo += 1;
                    if self.grid.get(x, y).is_chaining() {
                        chained = true;
                    }
                }
            }
        }

        for &(x, y) in &matched_cells {
            if let Block::Color { color_index, mut meta, .. } = self.grid.get(x, y) {
                meta.chaining = chained;
                meta.ntick = tick + flash_ticks;
                self.grid
                    .set(x, y, Block::Color { state: ColorState::Flash, color_index, meta });
            }
        }

        self.match_garbage_neighbors(&matched_cells);

        self.step_info.combo = combo;
        if chained {
            self.chain += 1;
            self.step_info.chain = self.chain;
        }
    }

    fn match_garbage_neighbors(&mut self, matched_cells: &[(usize, usize)]) {
        let height = self.grid.height();
        let mut to_flash: HashSet<GbId> = HashSet::new();
        for &(x, y) in matched_cells {
            for (nx, ny) in orthogonal_neighbors(x, y, height) {
                if let Block::Garbage { state: GarbageBlockState::Rest, garbage_ref, .. } =
                    self.grid.get(nx, ny)
                {
                    to_flash.insert(garbage_ref);
                }
            }
        }
        for gbid in to_flash {
            self.flash_garbage_bottom_row(gbid);
        }
    }

    /// Flashes the garbage's current bottom row and shrinks its footprint
    /// one row from the top, per the matching rules.
    fn flash_garbage_bottom_row(&mut self, gbid: GbId) {
        let tick = self.tick;
        let flash_ticks = self.conf.flash_ticks;
        let Some(garbage) = self.gbs_on_field.get_mut(&gbid) else { return };
        let row_y = garbage.pos.y as usize;
        let width = garbage.width(WIDTH as u8);
        let x0 = garbage.pos.x as usize;
        for x in x0..(x0 + width as usize).min(WIDTH) {
            if let Block::Garbage { garbage_ref, mut meta, .. } = self.grid.get(x, row_y) {
                if garbage_ref == gbid {
                    meta.ntick = tick + flash_ticks;
                    self.grid.set(
                        x,
                        row_y,
                        Block::Garbage { state: GarbageBlockState::Flash, garbage_ref: gbid, meta },
                    );
                }
            }
        }
        garbage.size.y = garbage.size.y.saturating_sub(1);
        garbage.pos.y += 1;
        if garbage.size.y == 0 {
            self.gbs_on_field.remove(&gbid);
        }
    }

    fn drop_from_hanging(&mut self, full: bool, raise: &mut bool) {
        if self.gbs_drop.is_empty() || full || !*raise {
            return;
        }
        let garbage = self.gbs_drop.pop_front().unwrap();
        self.materialize_garbage(garbage);
        *raise = false;
    }

    fn materialize_garbage(&mut self, mut garbage: Garbage) {
        let width = garbage.width(WIDTH as u8);
        let x = if garbage.gb_type == GbType::Chain {
            0
        } else {
            let cursor = self.gb_drop_pos[width as usize % (WIDTH + 1)];
            let advance = if width as usize > WIDTH / 2 { 1 } else { width };
            let next = cursor as usize + advance as usize;
            self.gb_drop_pos[width as usize % (WIDTH + 1)] =
                if next + width as usize > WIDTH { 0 } else { next as u8 };
            cursor.min((WIDTH - width as usize) as u8)
        };
        garbage.pos.x = x;
        garbage.pos.y = TOP as u8;
        garbage.size.y = 1;
        garbage.size.x = width;
        for dx in 0..width as usize {
            self.grid.set(
                x as usize + dx,
                TOP,
                Block::garbage(garbage.gbid, GarbageBlockState::Rest),
            );
        }
        self.gbs_on_field.insert(garbage.gbid, garbage);
    }

    fn tick_swap(&mut self) {
        if self.swap_pos.is_none() {
            return;
        }
        self.swap_dt = self.swap_dt.saturating_sub(1);
        if self.swap_dt == 0 {
            let (x, y) = self.swap_pos.take().unwrap();
            for bx in [x as usize, x as usize + 1] {
                if let Some(meta) = self.grid_meta_mut(bx, y as usize) {
                    meta.swapped = false;
                }
            }
        }
    }

    fn grid_meta_mut(&mut self, x: usize, y: usize) -> Option<&mut BlockMeta> {
        let block = self.grid.row_mut(y).get_mut(x)?;
        block.meta_mut()
    }

    fn process_input(&mut self, keys: KeyState) {
        let move_left = self.key_left.poll_repeating(keys.left, MOVE_REPEAT_PERIOD);
        let move_right = self.key_right.poll_repeating(keys.right, MOVE_REPEAT_PERIOD);
        let move_up = self.key_up.poll_repeating(keys.up, MOVE_REPEAT_PERIOD);
        let move_down = self.key_down.poll_repeating(keys.down, MOVE_REPEAT_PERIOD);
        let swap_fired = self.enable_swap && self.key_swap.poll_edge(keys.swap);
        let raise_fired = self.enable_raise && keys.raise;

        let (mut cx, mut cy) = self.cursor;
        let mut moved = false;
        if move_left && cx > 0 {
            cx -= 1;
            moved = true;
        }
        if move_right && (cx as usize) < WIDTH - 2 {
            cx += 1;
            moved = true;
        }
        if move_up && (cy as usize) < TOP - 1 {
            cy += 1;
            moved = true;
        }
        if move_down && cy > 1 {
            cy -= 1;
            moved = true;
        }
        self.cursor = (cx, cy);
        self.step_info.moved = moved;

        if swap_fired {
            self.try_swap(cx, cy);
        }
        if raise_fired {
            self.manual_raise = true;
            self.stop_dt = 0;
        }
    }

    fn try_swap(&mut self, x: u8, y: u8) {
        if self.swap_pos.is_some() {
            return;
        }
        let left = self.grid.get(x as usize, y as usize);
        let right = self.grid.get(x as usize + 1, y as usize);
        if left.is_none() && right.is_none() {
            return;
        }
        if !left.is_swappable() || !right.is_swappable() {
            return;
        }
        self.grid.set(x as usize, y as usize, right);
        self.grid.set(x as usize + 1, y as usize, left);
        for bx in [x as usize, x as usize + 1] {
            if let Some(meta) = self.grid_meta_mut(bx, y as usize) {
                meta.swapped = true;
            }
        }
        self.swap_pos = Some((x, y));
        self.swap_dt = self.conf.swap_ticks;
        self.step_info.swap = true;
    }

    fn assign_pop_ticks(&mut self) {
        let tick = self.tick;
        let pop0 = self.conf.pop0_ticks;
        let pop_step = self.conf.pop_ticks;

        let mut color_cells: Vec<(usize, usize)> = Vec::new();
        let mut garbage_cells: Vec<(usize, usize)> = Vec::new();
        for y in 0..self.grid.height() {
            for x in 0..WIDTH {
                match self.grid.get(x, y) {
                    Block::Color { state: ColorState::Mutate, meta, .. } if meta.ntick == 0 => {
                        color_cells.push((x, y));
                    }
                    Block::Garbage { state: GarbageBlockState::Mutate, meta, .. } if meta.ntick == 0 => {
                        garbage_cells.push((x, y));
                    }
                    _ => {}
                }
            }
        }
        // top-left -> bottom-right
        color_cells.sort_by_key(|&(x, y)| (usize::MAX - y, x));
        for (i, &(x, y)) in color_cells.iter().enumerate() {
            if let Block::Color { state, color_index, mut meta } = self.grid.get(x, y) {
                meta.ntick = tick + pop0 + pop_step * i as u64;
                meta.group_pos = i as u32;
                self.grid
                    .set(x, y, Block::Color { state, color_index, meta });
                self.step_info.blocks.popped.push(PoppedBlock {
                    chain: self.chain,
                    pos: (x as u8, y as u8),
                    group_end: i + 1 == color_cells.len(),
                });
            }
        }
        // bottom-right -> top-left, separate pool
        garbage_cells.sort_by_key(|&(x, y)| (y, usize::MAX - x));
        for (i, &(x, y)) in garbage_cells.iter().enumerate() {
            if let Block::Garbage { state, garbage_ref, mut meta } = self.grid.get(x, y) {
                meta.ntick = tick + pop0 + pop_step * i as u64;
                meta.group_pos = i as u32;
                self.grid
                    .set(x, y, Block::Garbage { state, garbage_ref, meta });
            }
        }
    }

    fn terminate_chain_if_done(&mut self) {
        if self.chain <= 1 {
            return;
        }
        if self.step_info.combo != 0 {
            return;
        }
        let any_chaining = (0..self.grid.height())
            .any(|y| (0..WIDTH).any(|x| self.grid.get(x, y).is_chaining()));
        if !any_chaining {
            self.chain = 1;
        }
    }

    fn update_stop_and_raise(&mut self, full: bool, raise: bool, stop_dec: bool) {
        let combo = self.step_info.combo;
        let chain = self.chain;
        if combo > 0 {
            self.manual_raise = false;
            if combo > 3 {
                let candidate = self.conf.stop_combo_0 + self.conf.stop_combo_k * (combo as u64 - 4);
                self.stop_dt = self.stop_dt.max(candidate);
            }
            if chain > 1 {
                let candidate = self.conf.stop_chain_0 + self.conf.stop_chain_k * (chain as u64 - 2);
                self.stop_dt = self.stop_dt.max(candidate);
            }
        } else if stop_dec && self.stop_dt > 0 {
            self.stop_dt -= 1;
        } else if stop_dec && full && raise {
            self.lost_dt += 1;
            if self.lost_dt >= self.conf.lost_ticks {
                self.lost = true;
            }
        } else if !full && raise && self.stop_dt == 0 {
            let speed = if self.manual_raise {
                self.conf.manual_raise_speed
            } else {
                self.conf.raise_speeds[self.raise_speed_index]
            };
            self.raise_progress += speed;
            while self.raise_progress > RAISE_PROGRESS_MAX {
                self.raise_progress -= RAISE_PROGRESS_MAX;
                self.raise();
                self.step_info.raised = true;
            }
        }
    }

    fn advance_speed_curve(&mut self) {
        if self.raise_speed_index < self.conf.raise_speed_changes.len()
            && self.tick >= self.conf.raise_speed_changes[self.raise_speed_index]
        {
            self.raise_speed_index += 1;
        }
    }

    fn raise(&mut self) {
        self.grid.shift_up();
        let row = self.generate_raise_row();
        for (x, block) in row.into_iter().enumerate() {
            self.grid.set(x, 0, block);
        }
        for garbage in self.gbs_on_field.values_mut() {
            garbage.pos.y = garbage.pos.y.saturating_add(1).min(TOP as u8);
        }
        self.raise_progress = 0;
        self.manual_raise = false;
        self.raised_lines += 1;
    }

    fn generate_raise_row(&mut self) -> [Block; WIDTH] {
        use conf::RaiseAdjacent;
        let mut row = [Block::None; WIDTH];
        let left_reach = match self.conf.raise_adjacent {
            RaiseAdjacent::Never => 0,
            RaiseAdjacent::Always => 1,
            RaiseAdjacent::Alternate => {
                if self.raised_lines % 2 == 0 {
                    1
                } else {
                    2
                }
            }
        };
        for x in 0..WIDTH {
            let mut forbidden: Vec<Option<u8>> = Vec::new();
            for d in 1..=left_reach {
                if x >= d {
                    forbidden.push(color_of(row[x - d]));
                }
            }
            forbidden.push(color_of(self.grid.get(x, 1)));
            let color = self.draw_color_avoiding(forbidden);
            row[x] = Block::color(color, ColorState::Rest);
        }
        row
    }
}

impl StepInfo {
    fn clone_empty(&self) -> StepInfo {
        StepInfo::default()
    }

    fn clone_empty_keep(&self) -> StepInfo {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::conf::test_conf;

    fn fresh_field() -> Field {
        let mut field = Field::new(1, test_conf(), 1);
        field.enable_swap = true;
        field.enable_raise = false;
        field
    }

    #[test]
    fn three_in_a_row_pops_with_combo_three() {
        let mut field = fresh_field();
        for x in 0..3 {
            field.grid.set(x, 1, Block::color(0, ColorState::Rest));
        }
        let info = field.step(KeyState::default());
        assert_eq!(info.combo, 3);
        assert_eq!(info.chain, 0);
        for x in 0..3 {
            match field.grid.get(x, 1) {
                Block::Color { state, meta, .. } => {
                    assert_eq!(state, ColorState::Flash);
                    assert_eq!(meta.ntick, field.tick + field.conf.flash_ticks);
                }
                other => panic!("expected a flashing colour block, got {other:?}"),
            }
        }
    }

    #[test]
    fn determinism_same_seed_same_conf_same_inputs() {
        let mut a = Field::new(1, test_conf(), 7);
        let mut b = Field::new(1, test_conf(), 7);
        a.init_match();
        b.init_match();
        let inputs = [KeyState::default(), KeyState { raise: true, ..Default::default() }, KeyState::default()];
        for keys in inputs {
            let ia = a.step(keys);
            let ib = b.step(keys);
            assert_eq!(ia.combo, ib.combo);
            assert_eq!(ia.chain, ib.chain);
            assert_eq!(a.tick, b.tick);
        }
        for y in 0..a.grid.height() {
            for x in 0..WIDTH {
                assert_eq!(a.grid.get(x, y), b.grid.get(x, y));
            }
        }
    }

    #[test]
    fn swap_moves_blocks_and_reports_swap() {
        let mut field = fresh_field();
        field.grid.set(0, 1, Block::color(0, ColorState::Rest));
        field.cursor = (0, 1);
        let info = field.step(KeyState { swap: true, ..Default::default() });
        assert!(info.swap);
    }

    #[test]
    fn chain_resets_to_one_once_quiescent() {
        let mut field = fresh_field();
        field.chain = 3;
        let info = field.step(KeyState::default());
        assert_eq!(info.combo, 0);
        assert_eq!(field.chain, 1);
    }
}
