//! Reference branch predictor: 2-bit counters, a small BTB for indirect
//! targets, and a return address stack with snapshot-based annulment.

use crate::ports::{BranchPredictorPort, PredictorUpdate};

const COUNTER_BITS: usize = 12;
const BTB_BITS: usize = 10;
const RAS_SIZE: usize = 16;

fn counter_index(key: u64) -> usize {
    (key >> 2) as usize & ((1 << COUNTER_BITS) - 1)
}

fn btb_index(key: u64) -> usize {
    (key >> 2) as usize & ((1 << BTB_BITS) - 1)
}

/// Saturating 2-bit counters + BTB + RAS.
pub struct SimplePredictor {
    counters: Vec<u8>,
    btb: Vec<u64>,
    ras: Vec<u64>,
    ras_top: usize,
}

impl SimplePredictor {
    /// Creates a predictor with weakly-taken counters and an empty RAS.
    pub fn new() -> Self {
        SimplePredictor {
            counters: vec![2; 1 << COUNTER_BITS],
            btb: vec![0; 1 << BTB_BITS],
            ras: vec![0; RAS_SIZE],
            ras_top: 0,
        }
    }

    /// Current RAS depth (test inspection).
    pub fn ras_depth(&self) -> usize {
        self.ras_top
    }
}

impl Default for SimplePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchPredictorPort for SimplePredictor {
    fn predict(
        &mut self,
        info: &mut PredictorUpdate,
        fallthrough_rip: u64,
        taken_rip: u64,
    ) -> u64 {
        if info.ret {
            // Peek the RAS; update_ras pops at rename.
            if self.ras_top > 0 {
                return self.ras[self.ras_top - 1];
            }
            return fallthrough_rip;
        }
        if info.indirect {
            let target = self.btb[btb_index(fallthrough_rip)];
            return if target != 0 { target } else { fallthrough_rip };
        }
        if info.cond {
            let taken = self.counters[counter_index(fallthrough_rip)] >= 2;
            return if taken { taken_rip } else { fallthrough_rip };
        }
        taken_rip
    }

    fn update(
        &mut self,
        info: &PredictorUpdate,
        fallthrough_rip: u64,
        actual_rip: u64,
        taken: bool,
        _pred_taken: bool,
        _correct: bool,
    ) {
        if info.cond {
            let counter = &mut self.counters[counter_index(fallthrough_rip)];
            if taken {
                *counter = (*counter + 1).min(3);
            } else {
                *counter = counter.saturating_sub(1);
            }
        }
        if info.indirect {
            self.btb[btb_index(fallthrough_rip)] = actual_rip;
        }
    }

    fn update_ras(&mut self, info: &mut PredictorUpdate, fallthrough_rip: u64) {
        info.stack_recover_idx = self.ras_top;
        if info.call {
            if self.ras_top < RAS_SIZE {
                self.ras[self.ras_top] = fallthrough_rip;
                self.ras_top += 1;
            }
        } else if info.ret && self.ras_top > 0 {
            self.ras_top -= 1;
        }
    }

    fn annul_ras(&mut self, info: &PredictorUpdate) {
        // Annulment runs in reverse program order, so restoring each
        // branch's snapshot unwinds pushes and pops exactly.
        self.ras_top = info.stack_recover_idx;
    }

    fn flush(&mut self) {
        self.ras_top = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond_info() -> PredictorUpdate {
        PredictorUpdate {
            cond: true,
            ..PredictorUpdate::default()
        }
    }

    #[test]
    fn test_cond_counters_learn() {
        let mut bp = SimplePredictor::new();
        let mut info = cond_info();
        // Weakly taken by default.
        assert_eq!(bp.predict(&mut info, 0x1004, 0x2000), 0x2000);
        // Train not-taken twice.
        bp.update(&info, 0x1004, 0x1004, false, true, false);
        bp.update(&info, 0x1004, 0x1004, false, true, false);
        assert_eq!(bp.predict(&mut info, 0x1004, 0x2000), 0x1004);
    }

    #[test]
    fn test_ras_push_pop_annul() {
        let mut bp = SimplePredictor::new();
        let mut call = PredictorUpdate {
            call: true,
            ..PredictorUpdate::default()
        };
        bp.update_ras(&mut call, 0x1008);
        assert_eq!(bp.ras_depth(), 1);

        let mut ret = PredictorUpdate {
            ret: true,
            ..PredictorUpdate::default()
        };
        assert_eq!(bp.predict(&mut ret, 0x3000, 0), 0x1008);
        bp.update_ras(&mut ret, 0x3000);
        assert_eq!(bp.ras_depth(), 0);

        // Annulling the return restores the pre-pop depth.
        bp.annul_ras(&ret);
        assert_eq!(bp.ras_depth(), 1);
        // Annulling the call unwinds the push too.
        bp.annul_ras(&call);
        assert_eq!(bp.ras_depth(), 0);
    }

    #[test]
    fn test_indirect_btb() {
        let mut bp = SimplePredictor::new();
        let mut info = PredictorUpdate {
            indirect: true,
            ..PredictorUpdate::default()
        };
        assert_eq!(bp.predict(&mut info, 0x1004, 0), 0x1004);
        bp.update(&info, 0x1004, 0x4000, true, false, false);
        assert_eq!(bp.predict(&mut info, 0x1004, 0), 0x4000);
    }
}
