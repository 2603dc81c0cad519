//! Mock implementations of the core's port traits.

use mockall::mock;
use x64_core::ports::{BranchPredictorPort, PredictorUpdate};

mock! {
    pub Predictor {}
    impl BranchPredictorPort for Predictor {
        fn predict(
            &mut self,
            info: &mut PredictorUpdate,
            fallthrough_rip: u64,
            taken_rip: u64,
        ) -> u64;
        fn update(
            &mut self,
            info: &PredictorUpdate,
            fallthrough_rip: u64,
            actual_rip: u64,
            taken: bool,
            pred_taken: bool,
            correct: bool,
        );
        fn update_ras(&mut self, info: &mut PredictorUpdate, fallthrough_rip: u64);
        fn annul_ras(&mut self, info: &PredictorUpdate);
        fn flush(&mut self);
    }
}
