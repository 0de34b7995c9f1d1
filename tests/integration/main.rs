//! Integration tests: ledger properties and the payout workflow, run against
//! both the in-memory and the SQLite store.

mod fixtures;
mod ledger_properties;
mod mock_store;
mod payout_workflow;
