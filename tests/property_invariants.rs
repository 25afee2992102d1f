// Property-based tests for the guarded move and id allocation invariants

use chrono::Utc;
use lanekeeper::board::{BoardLayout, BoardStateMachine, ColumnId, IdAllocator, ItemId, NewWorkItem};
use lanekeeper::config::SignalConfig;
use lanekeeper::signals::{BoardSignal, SignalConsumer, SignalTargets};
use lanekeeper::store::{MemoryStore, SharedStore, WorkItemStore};
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
enum SignalKind {
    Started,
    Completed,
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

/// Where the item should be after `signals`, and how many moves that takes.
fn expected(signals: &[SignalKind]) -> (&'static str, usize) {
    let mut column = "ToDo";
    let mut moves = 0;
    for signal in signals {
        column = match (column, signal) {
            ("ToDo", SignalKind::Started) => {
                moves += 1;
                "Doing"
            }
            ("Doing", SignalKind::Completed) => {
                moves += 1;
                "QA"
            }
            (current, _) => current,
        };
    }
    (column, moves)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_repeated_signals_move_at_most_once_per_transition(
        signals in prop::collection::vec(any::<SignalKind>(), 1..24)
    ) {
        let (moves, column) = runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let item = NewWorkItem::new("t", "", ColumnId::from("ToDo"))
                .into_item(ItemId::from("0001"), "", Utc::now());
            store.insert_item(item).await.unwrap();

            let shared: SharedStore = store.clone();
            let layout = Arc::new(BoardLayout::standard().unwrap());
            let targets = SignalTargets::from_config(&SignalConfig::default(), &layout).unwrap();
            let consumer = SignalConsumer::new(BoardStateMachine::new(layout, shared), targets);

            let mut moves = 0;
            for kind in &signals {
                let item_id = ItemId::from("0001");
                let signal = match kind {
                    SignalKind::Started => BoardSignal::WorkStarted { item_id },
                    SignalKind::Completed => BoardSignal::WorkCompleted { item_id },
                };
                if consumer.apply(&signal).await.unwrap().is_moved() {
                    moves += 1;
                }
            }
            let item = store.get_item(&ItemId::from("0001")).await.unwrap().unwrap();
            (moves, item.column)
        });

        let (expected_column, expected_moves) = expected(&signals);
        prop_assert!(moves <= 2);
        prop_assert_eq!(moves, expected_moves);
        prop_assert_eq!(column, ColumnId::from(expected_column));
    }

    #[test]
    fn prop_concurrent_allocation_never_duplicates(existing in 0usize..5, callers in 2usize..9) {
        let ids = runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let shared: SharedStore = store.clone();
            let layout = Arc::new(BoardLayout::standard().unwrap());
            let board = BoardStateMachine::new(layout, shared).with_ids(IdAllocator::new(4), "LK");
            for n in 0..existing {
                board
                    .create_item(NewWorkItem::new(format!("seed {n}"), "", ColumnId::from("ToDo")))
                    .await
                    .unwrap();
            }

            let tasks: Vec<_> = (0..callers)
                .map(|n| {
                    let board = board.clone();
                    tokio::spawn(async move {
                        board
                            .create_item(NewWorkItem::new(format!("new {n}"), "", ColumnId::from("ToDo")))
                            .await
                    })
                })
                .collect();

            let mut ids = Vec::new();
            for task in tasks {
                ids.push(task.await.unwrap().unwrap().id);
            }
            ids
        });

        let unique: HashSet<&ItemId> = ids.iter().collect();
        prop_assert_eq!(unique.len(), callers);
        let mut numbers: Vec<u64> = ids.iter().filter_map(|id| id.number()).collect();
        numbers.sort_unstable();
        let first = existing as u64 + 1;
        prop_assert_eq!(numbers, (first..first + callers as u64).collect::<Vec<u64>>());
    }
}
