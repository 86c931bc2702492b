use crate::Blockchain;
use crate::Error;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::OutPoint;
use bitcoin::Transaction;
use bitcoin::Txid;
use tapforge_core::ExplorerUtxo;

/// A [`Blockchain`] backed by an Esplora-compatible HTTP API.
pub struct EsploraBlockchain {
    client: esplora_client::BlockingClient,
}

impl EsploraBlockchain {
    pub fn new(url: &str) -> Self {
        let client = esplora_client::Builder::new(url).build_blocking();

        Self { client }
    }
}

impl Blockchain for EsploraBlockchain {
    fn find_outpoints(&self, address: &Address) -> Result<Vec<ExplorerUtxo>, Error> {
        let script_pubkey = address.script_pubkey();
        let txs = self.client.scripthash_txs(&script_pubkey, None)?;

        let outputs = txs
            .into_iter()
            .flat_map(|tx| {
                let txid = tx.txid;
                let confirmation_blocktime = tx.status.block_time;
                tx.vout
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.scriptpubkey == script_pubkey)
                    .map(|(i, v)| {
                        (
                            OutPoint {
                                txid,
                                vout: i as u32,
                            },
                            Amount::from_sat(v.value),
                            confirmation_blocktime,
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut utxos = Vec::with_capacity(outputs.len());
        for (outpoint, amount, confirmation_blocktime) in outputs {
            let status = self
                .client
                .get_output_status(&outpoint.txid, outpoint.vout as u64)?;

            let is_spent = matches!(
                status,
                Some(esplora_client::OutputStatus { spent: true, .. })
            );

            utxos.push(ExplorerUtxo {
                outpoint,
                amount,
                confirmation_blocktime,
                is_spent,
            });
        }

        tracing::debug!(
            %address,
            num_utxos = utxos.len(),
            "Fetched program outputs from explorer"
        );

        Ok(utxos)
    }

    fn find_tx(&self, txid: &Txid) -> Result<Option<Transaction>, Error> {
        let tx = self.client.get_tx(txid)?;

        Ok(tx)
    }

    fn broadcast(&self, tx: &Transaction) -> Result<(), Error> {
        self.client.broadcast(tx).map_err(Error::Broadcast)?;

        tracing::debug!(txid = %tx.compute_txid(), "Broadcast transaction");

        Ok(())
    }
}
