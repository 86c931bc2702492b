use crate::leaf::LeafDescriptor;
use crate::leaf::SpendCondition;
use crate::program::TaprootProgram;
use crate::Error;
use bitcoin::hashes::sha256;
use bitcoin::key::Secp256k1;
use bitcoin::key::TapTweak;
use bitcoin::key::Verification;
use bitcoin::taproot::TapNodeHash;
use bitcoin::Network;
use bitcoin::ScriptBuf;
use bitcoin::XOnlyPublicKey;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;

/// Mutable accumulator of [`LeafDescriptor`]s.
///
/// Leaves are collected in insertion order and frozen into an immutable
/// [`TaprootProgram`] by [`TapTreeBuilder::finalize`], which consumes the
/// builder. Further mutation after finalizing is therefore impossible by
/// construction.
#[derive(Debug)]
pub struct TapTreeBuilder {
    internal_key: XOnlyPublicKey,
    network: Network,
    leaves: Vec<LeafDescriptor>,
    labels: HashMap<String, usize>,
}

impl TapTreeBuilder {
    pub fn new(internal_key: XOnlyPublicKey, network: Network) -> Self {
        Self {
            internal_key,
            network,
            leaves: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Append a leaf. Insertion order is significant: it shapes the
    /// commitment tree and thereby the Merkle root.
    pub fn add_leaf(mut self, leaf: LeafDescriptor) -> Result<Self, Error> {
        if self.labels.contains_key(leaf.label()) {
            return Err(Error::duplicate_label(leaf.label()));
        }

        self.labels.insert(leaf.label().to_owned(), self.leaves.len());
        self.leaves.push(leaf);

        Ok(self)
    }

    /// Add a SHA256 hashlock leaf: revealing the preimage of `target` and a
    /// signature by `key` spends it.
    pub fn hashlock(
        self,
        label: &str,
        target: sha256::Hash,
        key: XOnlyPublicKey,
    ) -> Result<Self, Error> {
        self.add_leaf(LeafDescriptor::new(
            label,
            SpendCondition::HashLock { target, key },
        )?)
    }

    /// Add a single-signature leaf.
    pub fn checksig(self, label: &str, key: XOnlyPublicKey) -> Result<Self, Error> {
        self.add_leaf(LeafDescriptor::new(label, SpendCondition::CheckSig { key })?)
    }

    /// Add a `threshold`-of-`keys.len()` CHECKSIGADD multisig leaf.
    pub fn multisig(
        self,
        label: &str,
        threshold: u8,
        keys: Vec<XOnlyPublicKey>,
    ) -> Result<Self, Error> {
        self.add_leaf(LeafDescriptor::new(
            label,
            SpendCondition::MultiSig { threshold, keys },
        )?)
    }

    /// Add a relative-timelock leaf: `key` can spend `blocks` blocks after
    /// the output confirmed.
    pub fn timelock(self, label: &str, blocks: u16, key: XOnlyPublicKey) -> Result<Self, Error> {
        self.add_leaf(LeafDescriptor::new(
            label,
            SpendCondition::CsvTimelock {
                lock: bitcoin::Sequence::from_height(blocks),
                key,
            },
        )?)
    }

    /// Add a time-based relative-timelock leaf: `key` can spend
    /// `intervals` times 512 seconds after the output confirmed.
    pub fn timelock_512s(
        self,
        label: &str,
        intervals: u16,
        key: XOnlyPublicKey,
    ) -> Result<Self, Error> {
        self.add_leaf(LeafDescriptor::new(
            label,
            SpendCondition::CsvTimelock {
                lock: bitcoin::Sequence::from_512_second_intervals(intervals),
                key,
            },
        )?)
    }

    /// Add a caller-supplied script leaf.
    pub fn custom(self, label: &str, script: ScriptBuf) -> Result<Self, Error> {
        self.add_leaf(LeafDescriptor::new(label, SpendCondition::Custom { script })?)
    }

    /// Freeze the accumulated leaves into an immutable [`TaprootProgram`].
    ///
    /// With zero leaves the program commits to no script tree and supports
    /// key-path spending only. Otherwise the commitment tree is built by
    /// repeatedly pairing the two lowest-depth partial trees (ties broken by
    /// insertion order), which keeps the depth logarithmic in the number of
    /// leaves, and every leaf's sibling path is recorded for later control
    /// block construction.
    pub fn finalize<C: Verification>(
        self,
        secp: &Secp256k1<C>,
    ) -> Result<TaprootProgram, Error> {
        let (merkle_root, paths) = if self.leaves.is_empty() {
            (None, Vec::new())
        } else {
            let (root, paths) = commit_tree(&self.leaves);
            (Some(root), paths)
        };

        let (output_key, parity) = self.internal_key.tap_tweak(secp, merkle_root);

        // Any recorded path that fails to reproduce the root would yield a
        // plausible-looking but unverifiable control block later. That is a
        // programming fault, so construction aborts.
        if let Some(root) = merkle_root {
            for (leaf, path) in self.leaves.iter().zip(paths.iter()) {
                let mut node = TapNodeHash::from(leaf.leaf_hash());
                for sibling in path {
                    node = TapNodeHash::from_node_hashes(node, *sibling);
                }
                assert_eq!(
                    node, root,
                    "recorded inclusion path for leaf \"{}\" does not reproduce the merkle root",
                    leaf.label()
                );
            }
        }

        let program = TaprootProgram::new(
            self.internal_key,
            output_key,
            parity,
            merkle_root,
            self.network,
            self.leaves,
            self.labels,
            paths,
        )?;

        tracing::debug!(
            address = %program.address(),
            merkle_root = ?program.merkle_root(),
            num_leaves = program.leaves().len(),
            "Finalized taproot program"
        );

        Ok(program)
    }
}

/// A partial commitment tree tracked during pairing.
struct Partial {
    hash: TapNodeHash,
    depth: usize,
    /// Creation order; pre-seeded with leaf insertion order so that depth
    /// ties resolve deterministically.
    seq: usize,
    leaf_indices: Vec<usize>,
}

impl PartialEq for Partial {
    fn eq(&self, other: &Self) -> bool {
        (self.depth, self.seq) == (other.depth, other.seq)
    }
}

impl Eq for Partial {}

impl PartialOrd for Partial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Partial {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; the order is reversed so the
        // lowest-depth partial tree surfaces first.
        (other.depth, other.seq).cmp(&(self.depth, self.seq))
    }
}

/// Build the commitment tree over `leaves`, returning the Merkle root and
/// the leaf-to-root sibling path of every leaf (indexed like `leaves`).
fn commit_tree(leaves: &[LeafDescriptor]) -> (TapNodeHash, Vec<Vec<TapNodeHash>>) {
    let mut paths = vec![Vec::new(); leaves.len()];

    let mut heap = leaves
        .iter()
        .enumerate()
        .map(|(i, leaf)| Partial {
            hash: TapNodeHash::from(leaf.leaf_hash()),
            depth: 0,
            seq: i,
            leaf_indices: vec![i],
        })
        .collect::<BinaryHeap<_>>();

    let mut seq = leaves.len();
    while heap.len() > 1 {
        let a = heap.pop().expect("two entries");
        let b = heap.pop().expect("two entries");

        for i in &a.leaf_indices {
            paths[*i].push(b.hash);
        }
        for i in &b.leaf_indices {
            paths[*i].push(a.hash);
        }

        let mut leaf_indices = a.leaf_indices;
        leaf_indices.extend(b.leaf_indices);

        heap.push(Partial {
            // Branch hashing sorts the two children lexicographically,
            // making the sibling order within a proof irrelevant.
            hash: TapNodeHash::from_node_hashes(a.hash, b.hash),
            depth: a.depth.max(b.depth) + 1,
            seq,
            leaf_indices,
        });
        seq += 1;
    }

    let root = heap.pop().expect("at least one leaf");

    (root.hash, paths)
}
