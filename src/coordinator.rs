//! Owns every field in a match plus the garbage arena shared between them,
//! and derives the match-wide tick and rankings from field state.

use std::collections::HashMap;

use crate::field::conf::FieldConf;
use crate::field::garbage::{GbId, Garbage};
use crate::field::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedField {
    pub fldid: u32,
    pub rank: u32,
}

/// Owner of all fields in a match, the garbage lifecycle registries, and
/// the match-wide tick. A single owner (the server instance, or a client
/// instance mirroring it) holds one of these at a time.
pub struct Match {
    fields: Vec<Field>,
    hanging_by_gbid: HashMap<GbId, Garbage>,
    waiting_by_gbid: HashMap<GbId, Garbage>,
    started: bool,
    tick: u64,
    next_gbid: u32,
}

impl Default for Match {
    fn default() -> Self {
        Self::new()
    }
}

impl Match {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            hanging_by_gbid: HashMap::new(),
            waiting_by_gbid: HashMap::new(),
            started: false,
            tick: 0,
            next_gbid: 1,
        }
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn stop(&mut self) {
        self.started = false;
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.hanging_by_gbid.clear();
        self.waiting_by_gbid.clear();
        self.started = false;
        self.tick = 0;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn field(&self, fldid: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.fldid == fldid)
    }

    pub fn field_mut(&mut self, fldid: u32) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.fldid == fldid)
    }

    /// Creates and registers a new field. `fldid` is a contiguous 1-based
    /// index within the match.
    pub fn add_field(&mut self, conf: FieldConf, seed: u32) -> u32 {
        let fldid = self.fields.len() as u32 + 1;
        let mut field = Field::new(fldid, conf, seed);
        field.init_match();
        self.fields.push(field);
        fldid
    }

    pub fn fresh_gbid(&mut self) -> GbId {
        let id = GbId(self.next_gbid);
        self.next_gbid += 1;
        id
    }

    pub fn hanging(&self, gbid: GbId) -> Option<&Garbage> {
        self.hanging_by_gbid.get(&gbid)
    }

    pub fn hanging_mut(&mut self, gbid: GbId) -> Option<&mut Garbage> {
        self.hanging_by_gbid.get_mut(&gbid)
    }

    pub fn hanging_by_gbid(&self) -> &HashMap<GbId, Garbage> {
        &self.hanging_by_gbid
    }

    pub fn waiting_by_gbid(&self) -> &HashMap<GbId, Garbage> {
        &self.waiting_by_gbid
    }

    /// Adds a freshly-created garbage to the target field's hanging queue.
    /// `front` is used for chain garbages (ahead of any existing combo
    /// hangings), `false` for combo garbages (appended at the end).
    pub fn add_garbage(&mut self, garbage: Garbage, front: bool) {
        let gbid = garbage.gbid;
        let to_field = garbage.to_field;
        self.hanging_by_gbid.insert(gbid, garbage);
        if let Some(field) = self.field_mut(to_field) {
            if front {
                field.insert_hanging_front(gbid);
            } else {
                field.insert_hanging_back(gbid);
            }
        }
    }

    /// Moves a garbage from `hanging` to `waiting` once its drop tick has
    /// elapsed and it isn't blocked by an active chain.
    pub fn wait_garbage_drop(&mut self, gbid: GbId) -> Option<&Garbage> {
        let garbage = self.hanging_by_gbid.remove(&gbid)?;
        let to_field = garbage.to_field;
        self.waiting_by_gbid.insert(gbid, garbage);
        if let Some(field) = self.field_mut(to_field) {
            field.wait_garbage_drop(gbid);
        }
        self.waiting_by_gbid.get(&gbid)
    }

    /// Acknowledges a drop: the garbage leaves `waiting` for good and is
    /// handed to the target field's drop queue.
    pub fn acknowledge_drop(&mut self, gbid: GbId) -> Option<()> {
        let garbage = self.waiting_by_gbid.remove(&gbid)?;
        let to_field = garbage.to_field;
        if let Some(field) = self.field_mut(to_field) {
            field.drop_next_garbage(garbage);
        }
        Some(())
    }

    /// The match tick is the lowest tick among still-playing fields, or the
    /// highest tick once everyone has lost (so draws remain resolvable).
    pub fn update_tick(&mut self) -> u64 {
        let playing: Vec<u64> = self.fields.iter().filter(|f| !f.lost()).map(|f| f.tick()).collect();
        self.tick = if playing.is_empty() {
            self.fields.iter().map(|f| f.tick()).max().unwrap_or(0)
        } else {
            playing.into_iter().min().unwrap_or(0)
        };
        self.tick
    }

    /// Ranks every unranked field that has lost at or before the match
    /// tick. Ties share a rank. Returns the newly ranked fields and whether
    /// the match just ended (exactly one unranked field remains, which
    /// wins outright).
    pub fn update_ranks(&mut self) -> (Vec<RankedField>, bool) {
        let match_tick = self.tick;
        let unranked_count = self.fields.iter().filter(|f| f.rank() == 0).count();

        if unranked_count == 1 {
            if let Some(winner) = self.fields.iter_mut().find(|f| f.rank() == 0) {
                winner.set_rank(1);
                return (
                    vec![RankedField { fldid: winner.fldid, rank: 1 }],
                    true,
                );
            }
        }

        let mut newly_lost: Vec<(u32, u64)> = self
            .fields
            .iter()
            .filter(|f| f.rank() == 0 && f.lost() && f.tick() <= match_tick)
            .map(|f| (f.fldid, f.tick()))
            .collect();
        newly_lost.sort_by_key(|&(_, tick)| tick);

        let already_ranked = self.fields.iter().filter(|f| f.rank() > 0).count();
        let mut ranked = Vec::new();
        let mut i = 0;
        while i < newly_lost.len() {
            let tick = newly_lost[i].1;
            let mut group_end = i;
            while group_end + 1 < newly_lost.len() && newly_lost[group_end + 1].1 == tick {
                group_end += 1;
            }
            let remaining_before_group = self.fields.len() - already_ranked - i;
            let rank = remaining_before_group as u32;
            for (fldid, _) in &newly_lost[i..=group_end] {
                if let Some(field) = self.field_mut(*fldid) {
                    field.set_rank(rank);
                }
                ranked.push(RankedField { fldid: *fldid, rank });
            }
            i = group_end + 1;
        }

        let remaining_unranked = self.fields.iter().filter(|f| f.rank() == 0).count();
        let match_ended = remaining_unranked == 0;
        (ranked, match_ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::conf::test_conf;

    fn two_player_match() -> Match {
        let mut m = Match::new();
        m.add_field(test_conf(), 1);
        m.add_field(test_conf(), 2);
        m.start();
        m
    }

    #[test]
    fn tick_is_min_of_non_lost_fields() {
        let mut m = two_player_match();
        m.fields_mut()[0].abort();
        m.field_mut(1).unwrap().set_rank(0);
        // field 1 lost, field 2 still playing at tick 0
        assert_eq!(m.update_tick(), 0);
    }

    #[test]
    fn last_survivor_wins_rank_one_and_ends_match() {
        let mut m = two_player_match();
        m.fields_mut()[0].abort();
        m.update_tick();
        let (ranked, ended) = m.update_ranks();
        assert!(ended);
        assert!(ranked.iter().any(|r| r.fldid == 2 && r.rank == 1));
    }

    #[test]
    fn unique_gbid_allocation() {
        let mut m = Match::new();
        let a = m.fresh_gbid();
        let b = m.fresh_gbid();
        assert_ne!(a, b);
    }
}
