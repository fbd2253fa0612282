pub mod event_log;
pub mod ledger;

pub use event_log::{LedgerEvent, LedgerLog, LedgerRecord};
pub use ledger::{CompactionSummary, DeliveryRecord, PushLedger};
