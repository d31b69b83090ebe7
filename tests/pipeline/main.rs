//! Order pipeline integration tests.

mod support;
mod in_memory;
mod outbox;
mod reprocess;
mod transport;
