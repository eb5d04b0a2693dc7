//! Core services for the ingestion pipeline

pub mod extractor;
pub mod grouper;
pub mod identifier;
pub mod ledger;
pub mod organizer;
pub mod providers;
pub mod queue;
pub mod rescan;
pub mod stability;

pub use extractor::Extractor;
pub use grouper::{BookGroup, Grouper};
pub use identifier::{Identification, Identifier};
pub use ledger::{content_hash, Ledger, LedgerStatus};
pub use organizer::{Organizer, TransferMode};
pub use providers::Aggregator;
pub use queue::{QueueStatus, ReviewQueue};
pub use rescan::RescanNotifier;
pub use stability::StabilityTracker;
