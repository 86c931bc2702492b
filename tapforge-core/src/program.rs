use crate::leaf::LeafDescriptor;
use crate::script;
use crate::spend::SpendBuilder;
use crate::Error;
use bitcoin::key::Parity;
use bitcoin::key::TweakedPublicKey;
use bitcoin::taproot::ControlBlock;
use bitcoin::taproot::TapNodeHash;
use bitcoin::taproot::TaprootMerkleBranch;
use bitcoin::Address;
use bitcoin::Network;
use bitcoin::ScriptBuf;
use bitcoin::XOnlyPublicKey;
use std::collections::HashMap;

/// A frozen Taproot script tree.
///
/// Produced by [`crate::TapTreeBuilder::finalize`]. Immutable and safe to
/// share across threads; every accessor is side-effect-free and
/// deterministic, so control-block material for any leaf can be reproduced
/// byte-identically at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootProgram {
    internal_key: XOnlyPublicKey,
    output_key: TweakedPublicKey,
    parity: Parity,
    merkle_root: Option<TapNodeHash>,
    network: Network,
    address: Address,
    leaves: Vec<LeafDescriptor>,
    labels: HashMap<String, usize>,
    paths: Vec<TaprootMerkleBranch>,
}

impl TaprootProgram {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        internal_key: XOnlyPublicKey,
        output_key: TweakedPublicKey,
        parity: Parity,
        merkle_root: Option<TapNodeHash>,
        network: Network,
        leaves: Vec<LeafDescriptor>,
        labels: HashMap<String, usize>,
        paths: Vec<Vec<TapNodeHash>>,
    ) -> Result<Self, Error> {
        let script_pubkey = script::tr_script_pubkey(output_key);
        let address = Address::from_script(&script_pubkey, network).map_err(Error::transaction)?;

        let paths = paths
            .into_iter()
            .map(TaprootMerkleBranch::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::transaction)?;

        Ok(Self {
            internal_key,
            output_key,
            parity,
            merkle_root,
            network,
            address,
            leaves,
            labels,
            paths,
        })
    }

    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.internal_key
    }

    /// The tweaked x-only key committed in the output.
    pub fn output_key(&self) -> TweakedPublicKey {
        self.output_key
    }

    pub fn output_key_parity(&self) -> Parity {
        self.parity
    }

    /// `None` for a key-path-only program built from zero leaves.
    pub fn merkle_root(&self) -> Option<TapNodeHash> {
        self.merkle_root
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// Leaves in insertion order.
    pub fn leaves(&self) -> &[LeafDescriptor] {
        &self.leaves
    }

    pub fn leaf(&self, label: &str) -> Result<&LeafDescriptor, Error> {
        Ok(&self.leaves[self.index_of(label)?])
    }

    /// Build the control block proving that the labelled leaf is committed
    /// in this program's output.
    ///
    /// The Merkle path is returned in leaf-to-root order, which is the
    /// order witness verification consumes it in.
    pub fn control_block(&self, label: &str) -> Result<ControlBlock, Error> {
        let index = self.index_of(label)?;
        let leaf = &self.leaves[index];

        Ok(ControlBlock {
            leaf_version: leaf.leaf_version(),
            output_key_parity: self.parity,
            internal_key: self.internal_key,
            merkle_branch: self.paths[index].clone(),
        })
    }

    /// Open a script-path spend of the labelled leaf.
    pub fn spend(&self, label: &str) -> Result<SpendBuilder, Error> {
        let index = self.index_of(label)?;

        Ok(SpendBuilder::script_path(self.clone(), index))
    }

    /// Open a key-path spend against the tweaked output key.
    pub fn key_spend(&self) -> SpendBuilder {
        SpendBuilder::key_path(self.clone())
    }

    fn index_of(&self, label: &str) -> Result<usize, Error> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::unknown_leaf(label))
    }
}
