//! Pure state machine behind the sync scheduler.
//!
//! [`reduce`] maps `(state, action)` to `(new state, optional effect)` and
//! never performs I/O. The scheduler owns the state and executes effects on
//! its single-worker job queue.
//!
//! ## Block range convention
//!
//! The pending range's `end` is the number of the newest known block and is
//! exclusive, so the chain head itself is held back until its successor
//! arrives. A sync of `[101, 150)` therefore leaves the cursor at 149.
//!
//! ## Single in-flight invariant
//!
//! An effect is only emitted from [`SyncState::Idle`], and emitting one moves
//! the machine to [`SyncState::Processing`]. Only the completion actions
//! (`SyncSucceeded`, `SyncFailed`, `DiscardAfterSucceeded`,
//! `DiscardAfterFailed`) leave `Processing`, so at most one effect exists at
//! any time.

use crate::model::{BlockRange, BlockRecord};

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Startup: the persisted cursor and the blocks the source already knows.
    Initialized {
        /// Last block fully synced
        last_synced: u64,
        /// Known blocks after `last_synced`
        known_blocks: Vec<BlockRecord>,
    },
    /// A new canonical block was observed.
    NewBlockFound(BlockRecord),
    /// The chain reorganized; carries the new canonical blocks, starting
    /// right after the common ancestor.
    ReorgOccurred(Vec<BlockRecord>),
    /// The in-flight sync committed.
    SyncSucceeded,
    /// The in-flight sync failed; its range is re-queued.
    SyncFailed(BlockRange),
    /// The in-flight discard committed.
    DiscardAfterSucceeded(u64),
    /// The in-flight discard failed.
    DiscardAfterFailed,
    /// Manual redispatch after a failure. Emits the next effect if idle.
    Retry,
}

impl SyncAction {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::NewBlockFound(_) => "newBlockFound",
            Self::ReorgOccurred(_) => "reorgOccurred",
            Self::SyncSucceeded => "syncSucceeded",
            Self::SyncFailed(_) => "syncFailed",
            Self::DiscardAfterSucceeded(_) => "discardAfterSucceeded",
            Self::DiscardAfterFailed => "discardAfterFailed",
            Self::Retry => "retry",
        }
    }
}

/// Work requested by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEffect {
    /// Collect and commit a block range.
    Sync(BlockRange),
    /// Roll every derived table back to the given block (inclusive).
    DiscardAfter(u64),
}

impl SyncEffect {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sync(_) => "sync",
            Self::DiscardAfter(_) => "discardAfter",
        }
    }
}

/// Work not yet handed to the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    /// Blocks still to be synced
    pub remaining: BlockRange,
    /// Lowest common ancestor of reorgs not yet applied
    pub discard_after: Option<u64>,
}

impl Pending {
    const fn new(remaining: BlockRange) -> Self {
        Self {
            remaining,
            discard_after: None,
        }
    }
}

/// State of the sync machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Before the cursor has been read.
    #[default]
    Uninitialized,
    /// Nothing in flight. `remaining` may be non-empty after a failure.
    Idle(Pending),
    /// Exactly one effect in flight.
    Processing(Pending, SyncEffect),
}

impl SyncState {
    /// Pending work, if initialized.
    #[must_use]
    pub const fn pending(&self) -> Option<&Pending> {
        match self {
            Self::Uninitialized => None,
            Self::Idle(pending) | Self::Processing(pending, _) => Some(pending),
        }
    }

    /// The effect currently in flight.
    #[must_use]
    pub const fn in_flight(&self) -> Option<SyncEffect> {
        match self {
            Self::Processing(_, effect) => Some(*effect),
            _ => None,
        }
    }

    /// Whether a sync ending at `block_number` reaches the chain head.
    #[must_use]
    pub fn is_tip(&self, block_number: u64) -> bool {
        self.pending()
            .is_some_and(|pending| pending.remaining.end() == block_number)
    }
}

/// Total transition function of the sync machine.
#[must_use]
pub fn reduce(state: SyncState, action: SyncAction) -> (SyncState, Option<SyncEffect>) {
    match (state, action) {
        (
            SyncState::Uninitialized,
            SyncAction::Initialized {
                last_synced,
                known_blocks,
            },
        ) => {
            let start = last_synced.saturating_add(1);
            let tip = known_blocks
                .iter()
                .map(|block| block.number)
                .max()
                .unwrap_or(start);
            process(Pending::new(BlockRange::new(start, tip)))
        }
        (SyncState::Uninitialized, _) | (_, SyncAction::Initialized { .. }) => (state, None),

        (SyncState::Idle(mut pending), SyncAction::NewBlockFound(block)) => {
            pending.remaining = extend_to(pending.remaining, block.number);
            process(pending)
        }
        (SyncState::Processing(mut pending, effect), SyncAction::NewBlockFound(block)) => {
            pending.remaining = extend_to(pending.remaining, block.number);
            (SyncState::Processing(pending, effect), None)
        }

        (SyncState::Idle(pending), SyncAction::ReorgOccurred(blocks)) => {
            match apply_reorg(pending, &blocks) {
                Some(pending) => process(pending),
                None => (SyncState::Idle(pending), None),
            }
        }
        (SyncState::Processing(pending, effect), SyncAction::ReorgOccurred(blocks)) => {
            // The in-flight effect cannot be cancelled; the discard is picked
            // up as soon as it completes.
            let pending = apply_reorg(pending, &blocks).unwrap_or(pending);
            (SyncState::Processing(pending, effect), None)
        }

        (SyncState::Processing(pending, SyncEffect::Sync(_)), SyncAction::SyncSucceeded) => {
            process(pending)
        }
        (SyncState::Processing(mut pending, SyncEffect::Sync(_)), SyncAction::SyncFailed(blocks)) => {
            pending.remaining = blocks.merge(&pending.remaining);
            (SyncState::Idle(pending), None)
        }

        (
            SyncState::Processing(mut pending, SyncEffect::DiscardAfter(in_flight)),
            SyncAction::DiscardAfterSucceeded(block_number),
        ) if in_flight == block_number => {
            if pending.discard_after == Some(block_number) {
                pending.discard_after = None;
            }
            process(pending)
        }
        (
            SyncState::Processing(pending, SyncEffect::DiscardAfter(_)),
            SyncAction::DiscardAfterFailed,
        ) => (SyncState::Idle(pending), None),

        (SyncState::Idle(pending), SyncAction::Retry) => process(pending),

        // Completion actions that do not match the in-flight effect, and
        // retries while busy, are ignored.
        (state, _) => (state, None),
    }
}

/// Emits the next effect from an idle machine. Discards always go first.
fn process(mut pending: Pending) -> (SyncState, Option<SyncEffect>) {
    if let Some(block_number) = pending.discard_after {
        let effect = SyncEffect::DiscardAfter(block_number);
        return (SyncState::Processing(pending, effect), Some(effect));
    }
    if pending.remaining.is_empty() {
        return (SyncState::Idle(pending), None);
    }
    let effect = SyncEffect::Sync(pending.remaining);
    pending.remaining = BlockRange::empty(pending.remaining.end());
    (SyncState::Processing(pending, effect), Some(effect))
}

fn extend_to(remaining: BlockRange, block_number: u64) -> BlockRange {
    if block_number <= remaining.end() {
        return remaining;
    }
    BlockRange::new(remaining.start(), block_number)
}

/// Records a reorg: the discard target drops to the common ancestor and the
/// remaining range is rewound to it and truncated at the new canonical tip.
fn apply_reorg(mut pending: Pending, blocks: &[BlockRecord]) -> Option<Pending> {
    let first = blocks.iter().map(|block| block.number).min()?;
    let tip = blocks.iter().map(|block| block.number).max()?;
    let common_ancestor = first.saturating_sub(1);

    pending.discard_after = Some(
        pending
            .discard_after
            .map_or(common_ancestor, |existing| existing.min(common_ancestor)),
    );
    let start = pending.remaining.start().min(first);
    pending.remaining = BlockRange::new(start, tip.max(start));
    Some(pending)
}
