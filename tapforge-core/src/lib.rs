//! Build, commit, and spend Taproot script trees.
//!
//! A [`TapTreeBuilder`] collects labelled spending conditions and freezes
//! them into an immutable [`TaprootProgram`]: a tweaked output key, an
//! address, and a reproducible inclusion proof for every leaf. A
//! [`SpendBuilder`] then assembles and signs transactions spending the
//! program's outputs, through the key path or through any labelled leaf.
//!
//! Private keys never enter this crate. Everything that needs a signature
//! takes a closure which is handed the signing digest and returns a
//! signature together with the key it verifies under.

use bitcoin::Amount;
use bitcoin::OutPoint;

pub mod sighash;

mod error;
mod leaf;
mod program;
mod script;
mod spend;
mod tree;

pub use error::Error;
pub use error::ErrorContext;
pub use error::ErrorKind;
pub use error::IntoError;
pub use leaf::LeafDescriptor;
pub use leaf::SpendCondition;
pub use program::TaprootProgram;
pub use script::checksig_script;
pub use script::csv_sig_script;
pub use script::extract_sequence_from_csv_sig_script;
pub use script::hashlock_script;
pub use script::multisig_script;
pub use spend::SpendBuilder;
pub use tree::TapTreeBuilder;

/// Information about a UTXO that may be extracted from an on-chain explorer.
#[derive(Clone, Copy, Debug)]
pub struct ExplorerUtxo {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub confirmation_blocktime: Option<u64>,
    pub is_spent: bool,
}
