//! Server-only policy that turns combo/chain events into garbage, decides
//! who receives it, and schedules when it becomes eligible to drop.

use std::collections::HashMap;

use crate::coordinator::Match;
use crate::field::block::WIDTH;
use crate::field::garbage::{GbId, GbPos, GbSize, GbType, Garbage};
use crate::field::step_info::StepInfo;

#[derive(Debug, Clone, Copy)]
pub enum DistributorEvent {
    NewGarbage {
        gbid: GbId,
        to_field: u32,
        from_field: Option<u32>,
        gb_type: GbType,
        size: GbSize,
    },
    UpdateGarbage {
        gbid: GbId,
        size: GbSize,
    },
    WaitGarbage {
        gbid: GbId,
    },
}

/// Sizing table from the spec: given combo size `c` and field width `w`,
/// how many garbage blocks are created and how big each is.
fn combo_block_sizes(c: u32, w: u32) -> Vec<u32> {
    if c.saturating_sub(1) <= w {
        vec![c - 1]
    } else if c <= 2 * w {
        let n = if c > 3 * w / 2 { c } else { c - 1 };
        let half = n / 2;
        vec![half, half + n % 2]
    } else if c == 2 * w + 1 {
        vec![w; 3]
    } else if c <= 3 * w + 1 {
        vec![w; 4]
    } else if c <= 4 * w + 2 {
        vec![w; 6]
    } else {
        vec![w; 8]
    }
}

/// Active chain garbage per attacker, round-robin opponent cursors, and the
/// drop-eligibility tick of every garbage this distributor has created.
#[derive(Default)]
pub struct GarbageDistributor {
    gbs_chain: HashMap<u32, GbId>,
    targets_chain: HashMap<u32, usize>,
    targets_combo: HashMap<u32, usize>,
    drop_ticks: HashMap<GbId, u64>,
}

impl GarbageDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.gbs_chain.clear();
        self.targets_chain.clear();
        self.targets_combo.clear();
        self.drop_ticks.clear();
    }

    fn opponents(m: &Match, attacker: u32) -> Vec<u32> {
        m.fields()
            .iter()
            .filter(|f| f.fldid != attacker && !f.lost())
            .map(|f| f.fldid)
            .collect()
    }

    fn next_target(cursor_table: &mut HashMap<u32, usize>, attacker: u32, opponents: &[u32]) -> u32 {
        if opponents.len() == 1 {
            return opponents[0];
        }
        let cursor = cursor_table.entry(attacker).or_insert(0);
        let target = opponents[*cursor % opponents.len()];
        *cursor = (*cursor + 1) % opponents.len();
        target
    }

    fn insert_garbage(&mut self, m: &mut Match, garbage: Garbage, front: bool) -> GbId {
        let gbid = garbage.gbid;
        let to_field = garbage.to_field;
        let hang_ticks = m
            .field(to_field)
            .map(|f| f.conf().gb_hang_ticks)
            .unwrap_or(0);
        let target_tick = m.field(to_field).map(|f| f.tick()).unwrap_or(m.tick());
        self.drop_ticks.insert(gbid, target_tick + hang_ticks);
        m.add_garbage(garbage, front);
        gbid
    }

    /// Invoked once per server-driven field step with that field's tick
    /// result. Emits the events the caller should broadcast.
    pub fn update_garbages(
        &mut self,
        m: &mut Match,
        fldid: u32,
        step_info: &StepInfo,
    ) -> Vec<DistributorEvent> {
        let mut events = Vec::new();
        let chain = m.field(fldid).map(|f| f.chain()).unwrap_or(1);

        if chain < 2 {
            self.gbs_chain.remove(&fldid);
        }

        self.schedule_eligible_drop(m, fldid, &mut events);

        if step_info.combo == 0 {
            return events;
        }

        let opponents = Self::opponents(m, fldid);
        if opponents.is_empty() {
            return events;
        }

        if step_info.chain == 2 {
            let target = opponents
                .iter()
                .copied()
                .min_by_key(|&opp| {
                    m.field(opp)
                        .map(|f| f.hanging_leading_chain_count(m.hanging_by_gbid()))
                        .unwrap_or(0)
                })
                .unwrap_or_else(|| Self::next_target(&mut self.targets_chain, fldid, &opponents));

            let size = GbSize { x: 0, y: 1 };
            let gbid = m.fresh_gbid();
            let garbage = Garbage {
                gbid,
                from_field: Some(fldid),
                to_field: target,
                gb_type: GbType::Chain,
                pos: GbPos { x: 0, y: 0 },
                size,
            };
            self.insert_garbage(m, garbage, true);
            self.gbs_chain.insert(fldid, gbid);
            events.push(DistributorEvent::NewGarbage {
                gbid,
                to_field: target,
                from_field: Some(fldid),
                gb_type: GbType::Chain,
                size,
            });
        } else if step_info.chain > 2 {
            if let Some(&gbid) = self.gbs_chain.get(&fldid) {
                if let Some(new_size) = m.hanging_mut(gbid).map(|g| {
                    g.size.y += 1;
                    g.size
                }) {
                    if let Some(hang_ticks) = m.hanging(gbid).and_then(|g| m.field(g.to_field)).map(|f| f.conf().gb_hang_ticks) {
                        let field_tick = m.field(fldid).map(|f| f.tick()).unwrap_or(m.tick());
                        self.drop_ticks.insert(gbid, field_tick + hang_ticks);
                    }
                    events.push(DistributorEvent::UpdateGarbage { gbid, size: new_size });
                }
            }
        }

        if step_info.combo > 3 {
            let target = Self::next_target(&mut self.targets_combo, fldid, &opponents);
            let sizes = combo_block_sizes(step_info.combo, WIDTH as u32);
            for size in sizes {
                let gbid = m.fresh_gbid();
                let gsize = GbSize { x: size as u8, y: 1 };
                let garbage = Garbage {
                    gbid,
                    from_field: Some(fldid),
                    to_field: target,
                    gb_type: GbType::Combo,
                    pos: GbPos { x: 0, y: 0 },
                    size: gsize,
                };
                self.insert_garbage(m, garbage, false);
                events.push(DistributorEvent::NewGarbage {
                    gbid,
                    to_field: target,
                    from_field: Some(fldid),
                    gb_type: GbType::Combo,
                    size: gsize,
                });
            }
        }

        events
    }

    fn schedule_eligible_drop(&mut self, m: &mut Match, fldid: u32, events: &mut Vec<DistributorEvent>) {
        let Some(field) = m.field(fldid) else { return };
        let Some(head) = field.hanging_front() else { return };
        let creator = m.hanging(head).and_then(|g| g.from_field);
        if let Some(creator) = creator {
            if self.gbs_chain.get(&creator) == Some(&head) {
                return;
            }
        }
        let field_tick = field.tick();
        let Some(&drop_tick) = self.drop_ticks.get(&head) else { return };
        if drop_tick <= field_tick {
            m.wait_garbage_drop(head);
            self.drop_ticks.remove(&head);
            events.push(DistributorEvent::WaitGarbage { gbid: head });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combo_eight_on_width_six_makes_blocks_of_three_and_four() {
        let sizes = combo_block_sizes(8, 6);
        assert_eq!(sizes, vec![3, 4]);
    }

    #[test]
    fn combo_of_four_on_width_six_is_one_block() {
        assert_eq!(combo_block_sizes(4, 6), vec![3]);
    }

    #[test]
    fn very_large_combo_caps_at_eight_full_width_blocks() {
        assert_eq!(combo_block_sizes(100, 6), vec![6; 8]);
    }

    #[test]
    fn combo_growth_table_never_empty() {
        for c in 1..40 {
            assert!(!combo_block_sizes(c, 6).is_empty());
        }
    }
}
