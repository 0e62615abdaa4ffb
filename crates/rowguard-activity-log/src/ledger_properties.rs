//! Property-based tests for ledger ordering and retention

#[cfg(test)]
mod tests {
    use crate::events::{LedgerEvent, LedgerEventKind};
    use crate::ledger::Ledger;
    use proptest::prelude::*;

    fn arb_kind() -> impl Strategy<Value = LedgerEventKind> {
        prop::sample::select(LedgerEventKind::ALL.to_vec())
    }

    proptest! {
        /// The timeline is sorted by timestamp, then sequence, and loses nothing
        #[test]
        fn prop_timeline_is_chronological(
            events in prop::collection::vec((arb_kind(), prop::option::of("[a-z]{1,6}")), 0..40)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let ledger = Ledger::new(10);
                ledger.begin_workflow("wf", "modify", "intent").await;
                for (kind, step) in &events {
                    let mut event = LedgerEvent::new("wf", *kind, "detail");
                    if let Some(step) = step {
                        event = event.with_step(step.clone());
                    }
                    ledger.append(event).await;
                }

                let timeline = ledger.timeline("wf").await;
                prop_assert_eq!(timeline.len(), events.len() + 1);
                for pair in timeline.windows(2) {
                    prop_assert!(
                        (pair[0].timestamp, pair[0].sequence) <= (pair[1].timestamp, pair[1].sequence)
                    );
                }
                Ok(())
            })?;
        }

        /// In-memory retention never exceeds the configured workflow count
        #[test]
        fn prop_retention_is_bounded(max in 1usize..8, workflows in 0usize..20) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let ledger = Ledger::new(max);
                for i in 0..workflows {
                    ledger.begin_workflow(&format!("wf-{}", i), "query", "x").await;
                }
                prop_assert_eq!(ledger.workflow_count(), workflows.min(max));
                Ok(())
            })?;
        }
    }
}
