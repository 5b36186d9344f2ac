use proptest::prelude::*;
use std::time::{Duration, Instant};

use waiting::process_state::{BlockedState, ProcessInspector};
use waiting::{DetectorConfig, DetectorState, WaitDetector};

struct Fixed(BlockedState);

impl ProcessInspector for Fixed {
    fn is_supported(&self) -> bool {
        true
    }

    fn any_blocked_on_tty(&self, _pid: u32) -> BlockedState {
        self.0
    }
}

fn arb_blocked() -> impl Strategy<Value = BlockedState> {
    prop_oneof![
        Just(BlockedState::Unknown),
        Just(BlockedState::NotBlocked),
        Just(BlockedState::BlockedTtyRead),
        Just(BlockedState::BlockedSelect),
    ]
}

fn detector(state: BlockedState, start: Instant) -> WaitDetector {
    let mut detector =
        WaitDetector::started_at(DetectorConfig::default(), Box::new(Fixed(state)), start);
    detector.set_child_pid(1);
    detector
}

// --- Last visible line ---

proptest! {
    #[test]
    fn last_visible_line_is_last_substantial_line(
        lines in prop::collection::vec("[a-z ?:]{0,8}", 0..8)
    ) {
        let mut detector = detector(BlockedState::Unknown, Instant::now());
        detector.record_output(lines.join("\n").as_bytes());

        let expected = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| l.chars().count() > 1)
            .next_back()
            .unwrap_or("");
        prop_assert_eq!(detector.last_visible_line(), expected);
    }

    #[test]
    fn styling_does_not_change_visible_line(word in "[a-z]{2,12}") {
        let mut plain = detector(BlockedState::Unknown, Instant::now());
        let mut styled = detector(BlockedState::Unknown, Instant::now());
        plain.record_output(word.as_bytes());
        styled.record_output(format!("\x1b[1;32m{word}\x1b[0m\x1b[?25h").as_bytes());
        prop_assert_eq!(plain.last_visible_line(), styled.last_visible_line());
    }
}

// --- State machine ---

proptest! {
    #[test]
    fn never_waiting_during_startup_grace(
        state in arb_blocked(),
        offsets in prop::collection::vec(0u64..3_000, 1..20)
    ) {
        let t0 = Instant::now();
        let mut detector = detector(state, t0);
        detector.record_output_at(b"Continue? [y/N]", t0);

        let mut offsets = offsets;
        offsets.sort_unstable();
        for ms in offsets {
            prop_assert!(!detector.check_at(t0 + Duration::from_millis(ms)));
            prop_assert_eq!(detector.state(), DetectorState::Running);
        }
    }

    #[test]
    fn not_blocked_never_waits(offsets in prop::collection::vec(0u64..1_000_000, 1..20)) {
        let t0 = Instant::now();
        let mut detector = detector(BlockedState::NotBlocked, t0);
        detector.record_output_at(b"Password:", t0);

        let mut offsets = offsets;
        offsets.sort_unstable();
        for ms in offsets {
            prop_assert!(!detector.check_at(t0 + Duration::from_millis(ms)));
        }
    }

    #[test]
    fn alerts_respect_min_gap(
        steps in prop::collection::vec(1u64..1_500, 1..60),
        nag_ms in 0u64..5_000
    ) {
        let config = DetectorConfig {
            nag_interval: Duration::from_millis(nag_ms),
            ..Default::default()
        };
        let t0 = Instant::now();
        let mut detector =
            WaitDetector::started_at(config.clone(), Box::new(Fixed(BlockedState::BlockedTtyRead)), t0);
        detector.set_child_pid(1);

        let mut now = t0 + config.startup_grace;
        let mut last_alert: Option<Instant> = None;
        for step in steps {
            now += Duration::from_millis(step);
            if detector.check_at(now) {
                if let Some(prev) = last_alert {
                    prop_assert!(now - prev >= config.min_alert_gap);
                }
                last_alert = Some(now);
            }
        }
    }

    #[test]
    fn input_always_leaves_waiting(extra_ms in 0u64..10_000) {
        let t0 = Instant::now();
        let mut detector = detector(BlockedState::BlockedTtyRead, t0);
        let entered = t0 + Duration::from_secs(3);
        prop_assert!(detector.check_at(entered));

        detector.record_input_at(entered + Duration::from_millis(extra_ms));
        prop_assert_eq!(detector.state(), DetectorState::Running);
        prop_assert!(detector.waiting_since().is_none());
    }
}
