//! Peer classification
//!
//! Pure state machine: a probe snapshot plus the local view goes in, one
//! `PeerState` comes out. All ledger reads happen before this is called.

use crate::types::{ChainReference, PeerSnapshot, PeerState};

/// Classify a peer that answered this sweep.
///
/// - Ahead of the reference: `Online` if its chain contains the reference
///   block, `Forked` otherwise.
/// - At or below the reference with the height it had last time: `Stuck`.
/// - Otherwise `Sync` when its cumulative difficulty equals the local one at
///   the same height, `Forked` when it differs or no local block exists there.
///
/// `previous_height` is the height stored for this peer before the sweep and
/// `local_difficulty` the local cumulative difficulty at `snapshot.height`.
pub fn classify(
    reference: &ChainReference,
    snapshot: &PeerSnapshot,
    previous_height: Option<u64>,
    local_difficulty: Option<&str>,
) -> PeerState {
    if snapshot.height > reference.height {
        if snapshot.next_block_ids.iter().any(|id| *id == reference.id) {
            return PeerState::Online;
        }
        return PeerState::Forked;
    }

    if previous_height == Some(snapshot.height) {
        return PeerState::Stuck;
    }

    match local_difficulty {
        Some(local) if local == snapshot.cumulative_difficulty => PeerState::Sync,
        _ => PeerState::Forked,
    }
}
