use crate::script;
use crate::Error;
use bitcoin::hashes::sha256;
use bitcoin::taproot::LeafVersion;
use bitcoin::taproot::TapLeafHash;
use bitcoin::ScriptBuf;
use bitcoin::XOnlyPublicKey;

/// One alternative spending condition committed into a Taproot tree.
///
/// The witness for each variant is assembled by the spend builder; the
/// serialized script is derived deterministically by the [`crate::script`]
/// helpers and never hand-edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendCondition {
    /// Reveal the SHA256 preimage of `target` and sign with `key`.
    HashLock {
        target: sha256::Hash,
        key: XOnlyPublicKey,
    },
    /// A single signature by `key`.
    CheckSig { key: XOnlyPublicKey },
    /// `threshold`-of-`keys.len()` CHECKSIGADD multisig.
    ///
    /// Keys are committed in the declared order; callers wanting
    /// cross-implementation determinism must canonicalize the order
    /// themselves before declaring it.
    MultiSig {
        threshold: u8,
        keys: Vec<XOnlyPublicKey>,
    },
    /// A signature by `key`, valid only once the relative lock encoded in
    /// `lock` has passed since the spent output confirmed. The sequence may
    /// express the delay in blocks or in 512-second intervals.
    CsvTimelock {
        lock: bitcoin::Sequence,
        key: XOnlyPublicKey,
    },
    /// A caller-supplied script, unlocked with a caller-supplied witness.
    Custom { script: ScriptBuf },
}

impl SpendCondition {
    fn script(&self) -> ScriptBuf {
        match self {
            SpendCondition::HashLock { target, key } => script::hashlock_script(*target, *key),
            SpendCondition::CheckSig { key } => script::checksig_script(*key),
            SpendCondition::MultiSig { threshold, keys } => {
                script::multisig_script(*threshold, keys)
            }
            SpendCondition::CsvTimelock { lock, key } => script::csv_sig_script(*lock, *key),
            SpendCondition::Custom { script } => script.clone(),
        }
    }
}

/// Immutable description of one tree leaf: a stable label, the spending
/// condition, and the script serialized from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafDescriptor {
    label: String,
    condition: SpendCondition,
    script: ScriptBuf,
    leaf_version: LeafVersion,
}

impl LeafDescriptor {
    pub fn new(label: impl Into<String>, condition: SpendCondition) -> Result<Self, Error> {
        match &condition {
            SpendCondition::CsvTimelock { lock, .. } => match lock.to_relative_lock_time() {
                Some(bitcoin::relative::LockTime::Blocks(height)) if height.value() > 0 => {}
                Some(bitcoin::relative::LockTime::Time(time)) if time.value() > 0 => {}
                _ => return Err(Error::invalid_timelock(*lock)),
            },
            SpendCondition::MultiSig { threshold, keys } => {
                if *threshold == 0 || *threshold as usize > keys.len() {
                    return Err(Error::transaction(format!(
                        "multisig threshold {threshold} out of range for {} keys",
                        keys.len()
                    )));
                }
            }
            SpendCondition::Custom { script } if script.is_empty() => {
                return Err(Error::transaction("custom leaf script is empty"));
            }
            _ => {}
        }

        let script = condition.script();

        Ok(Self {
            label: label.into(),
            condition,
            script,
            leaf_version: LeafVersion::TapScript,
        })
    }

    /// Override the leaf version.
    ///
    /// Consensus tapscript leaves use [`LeafVersion::TapScript`]; other
    /// versions are only useful for forward-compatibility testing.
    pub fn with_leaf_version(mut self, leaf_version: LeafVersion) -> Self {
        self.leaf_version = leaf_version;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn condition(&self) -> &SpendCondition {
        &self.condition
    }

    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    pub fn leaf_version(&self) -> LeafVersion {
        self.leaf_version
    }

    /// The BIP341 tagged leaf hash committing to this leaf.
    pub fn leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.script, self.leaf_version)
    }
}
