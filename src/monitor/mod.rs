//! Peer Monitor Module
//!
//! Crawls the P2P network from the bootstrap and known peers, classifies
//! every peer against the local chain and reconciles the results into the
//! peer store.

pub mod classifier;
pub mod explorer;
pub mod guard;
pub mod prober;
pub mod reconciler;

pub use classifier::classify;
pub use explorer::{NodeExplorer, SweepResults};
pub use guard::{LeaseLock, StoreLeaseLock, SweepGuard};
pub use prober::PeerProber;
pub use reconciler::{PeerMonitor, SweepOutcome, SweepReport};
