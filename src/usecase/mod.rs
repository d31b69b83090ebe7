//! Application operations. Each one owns its transaction boundary; the
//! `stage`/`execute_in` forms let a caller join the work to a transaction
//! it already holds.

mod create_order;
mod get_order;
mod list_dlq;
mod process_order;
mod reprocess_dlq;

pub use create_order::CreateOrder;
pub use get_order::GetOrder;
pub use list_dlq::ListDlqEntries;
pub use process_order::{ProcessOrder, ProcessOutcome};
pub use reprocess_dlq::{ReprocessDlqEntry, REPROCESS_REASON};
