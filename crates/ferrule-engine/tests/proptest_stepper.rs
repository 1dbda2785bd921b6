//! Property tests for the fixed-timestep accumulator.

use ferrule_engine::physics::FixedStepper;
use proptest::prelude::*;

fn frame_dt_strategy() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => 0.0f32..0.1,
        1 => 0.1f32..2.0,
        1 => Just(-0.5f32),
        1 => Just(f32::NAN),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn accumulator_stays_bounded(
        fixed_ms in 5u32..50,
        max_substeps in 1u32..10,
        frames in prop::collection::vec(frame_dt_strategy(), 1..200),
    ) {
        let fixed_dt = fixed_ms as f32 / 1000.0;
        let mut stepper = FixedStepper::new(fixed_dt, max_substeps);

        for dt in frames {
            let steps = stepper.advance(dt);
            prop_assert!(steps <= max_substeps);
            prop_assert!(stepper.accumulator() >= 0.0);
            prop_assert!(stepper.accumulator() < fixed_dt);
            let alpha = stepper.alpha();
            prop_assert!((0.0..=1.0).contains(&alpha));
        }
    }

    #[test]
    fn uncapped_time_is_conserved(
        fixed_ms in 5u32..50,
        frames in prop::collection::vec(0.0f32..0.05, 1..200),
    ) {
        let fixed_dt = fixed_ms as f32 / 1000.0;
        // Each frame is shorter than 50ms, so 16 substeps never cap.
        let mut stepper = FixedStepper::new(fixed_dt, 16);
        let mut total_steps = 0u64;
        let mut total_time = 0.0f64;

        for dt in frames {
            total_steps += u64::from(stepper.advance(dt));
            total_time += f64::from(dt);
        }

        let accounted = total_steps as f64 * f64::from(fixed_dt) + f64::from(stepper.accumulator());
        prop_assert!((accounted - total_time).abs() < 1e-3, "{accounted} vs {total_time}");
    }
}
