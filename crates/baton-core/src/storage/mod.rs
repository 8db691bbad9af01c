pub mod backend;
pub mod file;
pub mod gate;
pub mod ledger;
pub mod read;

pub use backend::{LedgerBackend, MemoryBackend, SessionLoad};
pub use file::FileBackend;
pub use gate::SessionGate;
pub use ledger::EventLedger;
pub use read::{
    verify_contiguity, ContiguityReport, ReplayPage, ReplayQuery, SessionSummary,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
