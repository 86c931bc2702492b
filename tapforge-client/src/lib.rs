//! Chain-data plumbing for spending taproot programs.
//!
//! [`Blockchain`] abstracts the explorer queries a spend needs; the
//! [`EsploraBlockchain`] implementation talks to any Esplora-compatible
//! backend. [`find_outpoints_fn`] adapts a [`Blockchain`] into the closure
//! shape `tapforge_core::SpendBuilder::from_balance` expects.

use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::Transaction;
use bitcoin::Txid;
use tapforge_core::ExplorerUtxo;

mod esplora;

pub use esplora::EsploraBlockchain;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("explorer request failed")]
    Explorer(#[from] esplora_client::Error),
    #[error("failed to broadcast transaction")]
    Broadcast(#[source] esplora_client::Error),
}

/// The chain queries a spend needs, backend-agnostic.
pub trait Blockchain {
    /// All outputs ever paid to `address`, spent ones included.
    fn find_outpoints(&self, address: &Address) -> Result<Vec<ExplorerUtxo>, Error>;

    fn find_tx(&self, txid: &Txid) -> Result<Option<Transaction>, Error>;

    fn broadcast(&self, tx: &Transaction) -> Result<(), Error>;
}

/// Adapt a [`Blockchain`] into the closure consumed by
/// `tapforge_core::SpendBuilder::from_balance`.
pub fn find_outpoints_fn<B>(
    blockchain: &B,
) -> impl Fn(&Address) -> Result<Vec<ExplorerUtxo>, tapforge_core::Error> + '_
where
    B: Blockchain,
{
    move |address| {
        blockchain
            .find_outpoints(address)
            .map_err(tapforge_core::Error::explorer)
    }
}

/// The confirmed, unspent balance of `address`.
pub fn spendable_balance<B>(blockchain: &B, address: &Address) -> Result<Amount, Error>
where
    B: Blockchain,
{
    let balance = blockchain
        .find_outpoints(address)?
        .into_iter()
        .filter(|utxo| !utxo.is_spent && utxo.confirmation_blocktime.is_some())
        .map(|utxo| utxo.amount)
        .sum();

    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::OutPoint;

    struct StubBlockchain {
        utxos: Vec<ExplorerUtxo>,
    }

    impl Blockchain for StubBlockchain {
        fn find_outpoints(&self, _address: &Address) -> Result<Vec<ExplorerUtxo>, Error> {
            Ok(self.utxos.clone())
        }

        fn find_tx(&self, _txid: &Txid) -> Result<Option<Transaction>, Error> {
            Ok(None)
        }

        fn broadcast(&self, _tx: &Transaction) -> Result<(), Error> {
            Ok(())
        }
    }

    fn address() -> Address {
        let secp = bitcoin::key::Secp256k1::new();
        let internal_key = "93c7378d96518a75448821c4f7c8f4bae7ce60f804d03d1f0628dd5dd0f5de51"
            .parse::<bitcoin::XOnlyPublicKey>()
            .unwrap();

        Address::p2tr(&secp, internal_key, None, bitcoin::Network::Signet)
    }

    fn utxo(vout: u32, amount: u64, is_spent: bool) -> ExplorerUtxo {
        ExplorerUtxo {
            outpoint: OutPoint {
                txid: Txid::all_zeros(),
                vout,
            },
            amount: Amount::from_sat(amount),
            confirmation_blocktime: Some(1_700_000_000),
            is_spent,
        }
    }

    #[test]
    fn balance_skips_spent_outputs() {
        let blockchain = StubBlockchain {
            utxos: vec![utxo(0, 10_000, false), utxo(1, 5_000, true), utxo(2, 700, false)],
        };

        let balance = spendable_balance(&blockchain, &address()).unwrap();

        assert_eq!(balance, Amount::from_sat(10_700));
    }

    #[test]
    fn adapter_surfaces_utxos_to_the_core_closure_shape() {
        let blockchain = StubBlockchain {
            utxos: vec![utxo(0, 10_000, false)],
        };

        let find_outpoints = find_outpoints_fn(&blockchain);
        let utxos = find_outpoints(&address()).unwrap();

        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].amount, Amount::from_sat(10_000));
    }
}
