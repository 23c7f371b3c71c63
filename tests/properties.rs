//! Property-based tests for resolved timestamp tracking.
//!
//! Random interleavings of intent operations and closed timestamp updates
//! must keep the resolved timestamp monotonic and bounded by the closed
//! timestamp.

use proptest::prelude::*;

use rangefeed::{LogicalOp, ResolvedTimestamp, Timestamp, TxnId};
use uuid::Uuid;

const TXNS: usize = 4;

#[derive(Clone, Debug)]
enum Step {
    Write(usize, i64),
    Update(usize, i64),
    Commit(usize, i64),
    Abort(usize),
    Close(i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..TXNS, 1i64..100).prop_map(|(t, w)| Step::Write(t, w)),
        (0..TXNS, 1i64..100).prop_map(|(t, w)| Step::Update(t, w)),
        (0..TXNS, 1i64..100).prop_map(|(t, w)| Step::Commit(t, w)),
        (0..TXNS).prop_map(Step::Abort),
        (0i64..120).prop_map(Step::Close),
    ]
}

fn txn(i: usize) -> TxnId {
    TxnId(Uuid::from_u128(i as u128 + 1))
}

/// Apply a step, returning the advanced resolved timestamp if any.
fn apply(rts: &mut ResolvedTimestamp, step: &Step) -> Option<Timestamp> {
    match *step {
        Step::Write(t, w) => rts.consume_logical_op(&LogicalOp::write_intent(txn(t), Timestamp::wall(w))),
        Step::Update(t, w) => rts.consume_logical_op(&LogicalOp::update_intent(txn(t), Timestamp::wall(w))),
        Step::Commit(t, w) => rts.consume_logical_op(&LogicalOp::commit_intent(
            txn(t),
            "k",
            Timestamp::wall(w),
            b"v".to_vec(),
        )),
        Step::Abort(t) => rts.consume_logical_op(&LogicalOp::abort_intent(txn(t))),
        Step::Close(w) => rts.forward_closed_ts(Timestamp::wall(w)),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn resolved_is_monotonic_and_bounded(steps in prop::collection::vec(step(), 0..64)) {
        let mut rts = ResolvedTimestamp::new();
        let mut last_resolved = Timestamp::ZERO;
        let mut last_closed = Timestamp::ZERO;

        for step in &steps {
            let advanced = apply(&mut rts, step);

            prop_assert!(rts.get() >= last_resolved);
            prop_assert!(rts.closed_ts() >= last_closed);
            prop_assert!(rts.get() <= rts.closed_ts());
            match advanced {
                Some(ts) => {
                    prop_assert!(ts > last_resolved);
                    prop_assert_eq!(ts, rts.get());
                }
                None => {
                    prop_assert_eq!(rts.get(), last_resolved);
                }
            }
            if rts.intent_queue().is_empty() {
                prop_assert_eq!(rts.get(), rts.closed_ts());
            }

            last_resolved = rts.get();
            last_closed = rts.closed_ts();
        }
    }

    #[test]
    fn aborting_everything_releases_closed_ts(
        steps in prop::collection::vec(step(), 0..64),
        closed in 0i64..120,
    ) {
        let mut rts = ResolvedTimestamp::new();
        for step in &steps {
            apply(&mut rts, step);
        }

        // Every write can add at most one reference per transaction.
        for t in 0..TXNS {
            for _ in 0..=steps.len() {
                rts.consume_logical_op(&LogicalOp::abort_intent(txn(t)));
            }
        }
        rts.forward_closed_ts(Timestamp::wall(closed));

        prop_assert!(rts.intent_queue().is_empty());
        prop_assert_eq!(rts.get(), rts.closed_ts());
    }

    #[test]
    fn oldest_intent_holds_back_resolved(
        intent in 1i64..100,
        closed in 1i64..200,
    ) {
        let mut rts = ResolvedTimestamp::new();
        rts.consume_logical_op(&LogicalOp::write_intent(txn(0), Timestamp::wall(intent)));
        rts.forward_closed_ts(Timestamp::wall(closed));

        let expected = Timestamp::wall(closed).min(Timestamp::wall(intent).prev());
        prop_assert_eq!(rts.get(), expected);
        prop_assert!(rts.get() < Timestamp::wall(intent));
    }

    #[test]
    fn prev_and_next_bracket_timestamp(wall in 1i64..i64::MAX / 2, logical in 0i32..1000) {
        let ts = Timestamp::new(wall, logical);
        prop_assert!(ts.prev() < ts);
        prop_assert!(ts < ts.next());
    }
}
