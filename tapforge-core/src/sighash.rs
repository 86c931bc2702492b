//! BIP341 signature-hash computation.
//!
//! Both digests commit to all spent outputs ([`Prevouts::All`]) with the
//! default sighash type, so a signature over them is invalidated by any
//! change to the transaction's inputs or outputs.

use crate::Error;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::Prevouts;
use bitcoin::sighash::SighashCache;
use bitcoin::taproot::TapLeafHash;
use bitcoin::TapSighashType;
use bitcoin::Transaction;
use bitcoin::TxOut;

/// The digest signed by a key-path spend of `tx`'s input at `input_index`.
pub fn key_spend_digest(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
) -> Result<Message, Error> {
    let sighash = SighashCache::new(tx)
        .taproot_key_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            TapSighashType::Default,
        )
        .map_err(Error::crypto)?;

    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// The digest signed by a script-path spend of `tx`'s input at
/// `input_index`, additionally committed to the revealed leaf.
pub fn script_spend_digest(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
    leaf_hash: TapLeafHash,
) -> Result<Message, Error> {
    let sighash = SighashCache::new(tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(Error::crypto)?;

    Ok(Message::from_digest(sighash.to_byte_array()))
}
