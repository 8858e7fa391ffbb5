//! Wallet ledger for Motorads: atomic charges against a campaign's funding
//! wallet, exactly-once refunds, top-ups and the balance reconstruction
//! check. Backed by any [`motorads_store::AdStore`].

pub mod ledger;

pub use ledger::{ChargeError, ChargeReceipt, ChargeRequest, LedgerError, WalletLedger};
