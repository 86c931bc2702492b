use crate::leaf::SpendCondition;
use crate::program::TaprootProgram;
use crate::script;
use crate::sighash;
use crate::Error;
use crate::ErrorContext;
use crate::ExplorerUtxo;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::hex::DisplayHex;
use bitcoin::key::Secp256k1;
use bitcoin::key::Verification;
use bitcoin::secp256k1::schnorr;
use bitcoin::secp256k1::Message;
use bitcoin::taproot;
use bitcoin::transaction;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::OutPoint;
use bitcoin::ScriptBuf;
use bitcoin::Sequence;
use bitcoin::TapSighashType;
use bitcoin::Transaction;
use bitcoin::TxIn;
use bitcoin::TxOut;
use bitcoin::Witness;
use bitcoin::XOnlyPublicKey;

/// Consensus limit on the size of a single witness stack element.
const MAX_WITNESS_ELEMENT_SIZE: usize = 520;

/// Which path of the program a [`SpendBuilder`] spends through.
#[derive(Debug, Clone, Copy)]
enum Mode {
    KeyPath,
    ScriptPath { leaf_index: usize },
}

/// The builder walks these states strictly forward. Operations called in
/// the wrong state fail instead of silently reordering the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CollectingInputs,
    CollectingOutputs,
    Signed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::CollectingInputs => "collecting inputs",
            State::CollectingOutputs => "collecting outputs",
            State::Signed => "signed",
        }
    }
}

#[derive(Debug, Clone)]
struct SpendInput {
    outpoint: OutPoint,
    amount: Amount,
    script_pubkey: ScriptBuf,
}

/// Assembles and signs one transaction spending outputs of a
/// [`TaprootProgram`].
///
/// Obtained from [`TaprootProgram::key_spend`] or [`TaprootProgram::spend`].
/// Inputs are collected first, then outputs, then signatures; each fluent
/// method consumes the builder, and [`SpendBuilder::build`] consumes it for
/// good.
///
/// Signatures are produced by caller-supplied closures so that private keys
/// never pass through this crate, and every returned signature is verified
/// against the signing digest before it is accepted.
#[derive(Debug)]
pub struct SpendBuilder {
    program: TaprootProgram,
    mode: Mode,
    state: State,
    inputs: Vec<SpendInput>,
    outputs: Vec<TxOut>,
    sequence_override: Option<Sequence>,
    preimage: Option<Vec<u8>>,
    custom_witness: Option<Vec<Vec<u8>>>,
    /// One entry per signer; the inner vector holds that signer's signature
    /// for each input, in input order.
    signatures: Vec<(XOnlyPublicKey, Vec<schnorr::Signature>)>,
}

impl SpendBuilder {
    pub(crate) fn key_path(program: TaprootProgram) -> Self {
        Self::new(program, Mode::KeyPath)
    }

    pub(crate) fn script_path(program: TaprootProgram, leaf_index: usize) -> Self {
        Self::new(program, Mode::ScriptPath { leaf_index })
    }

    fn new(program: TaprootProgram, mode: Mode) -> Self {
        Self {
            program,
            mode,
            state: State::CollectingInputs,
            inputs: Vec::new(),
            outputs: Vec::new(),
            sequence_override: None,
            preimage: None,
            custom_witness: None,
            signatures: Vec::new(),
        }
    }

    /// Spend a known outpoint paying to this program's address.
    pub fn from_utxo(self, outpoint: OutPoint, amount: Amount) -> Result<Self, Error> {
        let script_pubkey = self.program.script_pubkey();
        self.add_input(outpoint, amount, script_pubkey)
    }

    /// Spend a known outpoint whose script pubkey differs from the program's
    /// current address, e.g. an output of an earlier revision of the same
    /// program. The witness is still assembled for this builder's path, so
    /// the output must commit to the same tree.
    pub fn from_utxo_with_script_pubkey(
        self,
        outpoint: OutPoint,
        amount: Amount,
        script_pubkey: ScriptBuf,
    ) -> Result<Self, Error> {
        self.add_input(outpoint, amount, script_pubkey)
    }

    /// Select an input from the program's on-chain balance.
    ///
    /// `find_outpoints` reports the unspent outputs of an address. The
    /// smallest single UTXO covering `target + fee` is chosen; spends across
    /// multiple UTXOs are composed by calling this (or `from_utxo`) more than
    /// once.
    pub fn from_balance(
        self,
        find_outpoints: impl Fn(&Address) -> Result<Vec<ExplorerUtxo>, Error>,
        target: Amount,
        fee: Amount,
    ) -> Result<Self, Error> {
        self.check_state("select inputs", State::CollectingInputs)?;

        let needed = target
            .checked_add(fee)
            .ok_or_else(|| Error::transaction("target plus fee overflows"))?;

        let candidates = find_outpoints(self.program.address())
            .context("failed to look up program balance")?
            .into_iter()
            .filter(|utxo| !utxo.is_spent)
            .collect::<Vec<_>>();

        let largest = candidates
            .iter()
            .map(|utxo| utxo.amount)
            .max()
            .unwrap_or(Amount::ZERO);

        let selected = candidates
            .into_iter()
            .filter(|utxo| utxo.amount >= needed)
            .min_by_key(|utxo| utxo.amount)
            .ok_or_else(|| Error::insufficient_funds(needed, largest))?;

        tracing::debug!(
            outpoint = %selected.outpoint,
            amount = %selected.amount,
            %needed,
            "Selected input from program balance"
        );

        self.from_utxo(selected.outpoint, selected.amount)
    }

    fn add_input(
        mut self,
        outpoint: OutPoint,
        amount: Amount,
        script_pubkey: ScriptBuf,
    ) -> Result<Self, Error> {
        self.check_state("add an input", State::CollectingInputs)?;

        self.inputs.push(SpendInput {
            outpoint,
            amount,
            script_pubkey,
        });

        Ok(self)
    }

    /// Pay `amount` to `address`. The first output moves the builder out of
    /// input collection.
    pub fn to(self, address: &Address, amount: Amount) -> Result<Self, Error> {
        self.to_script_pubkey(address.script_pubkey(), amount)
    }

    /// Pay `amount` to an arbitrary script pubkey.
    pub fn to_script_pubkey(
        mut self,
        script_pubkey: ScriptBuf,
        amount: Amount,
    ) -> Result<Self, Error> {
        match self.state {
            State::CollectingInputs if self.inputs.is_empty() => {
                return Err(Error::invalid_builder_state(
                    "add an output before any input",
                    self.state.name(),
                ));
            }
            State::CollectingInputs => {
                self.state = State::CollectingOutputs;
            }
            State::CollectingOutputs => {}
            State::Signed => {
                return Err(Error::invalid_builder_state(
                    "add an output",
                    self.state.name(),
                ));
            }
        }

        self.outputs.push(TxOut {
            value: amount,
            script_pubkey,
        });

        Ok(self)
    }

    /// Override the sequence applied to every input.
    ///
    /// For a timelocked leaf the override must still encode a relative lock
    /// in the committed unit at least as long as the committed one,
    /// otherwise the transaction could never satisfy the script.
    pub fn sequence(mut self, sequence: Sequence) -> Result<Self, Error> {
        if self.state == State::Signed {
            return Err(Error::invalid_builder_state(
                "override the sequence",
                self.state.name(),
            ));
        }

        if let Some(required) = self.csv_sequence() {
            let satisfied = match (
                required.to_relative_lock_time(),
                sequence.to_relative_lock_time(),
            ) {
                (
                    Some(bitcoin::relative::LockTime::Blocks(need)),
                    Some(bitcoin::relative::LockTime::Blocks(have)),
                ) => have.value() >= need.value(),
                (
                    Some(bitcoin::relative::LockTime::Time(need)),
                    Some(bitcoin::relative::LockTime::Time(have)),
                ) => have.value() >= need.value(),
                _ => false,
            };

            if !satisfied {
                return Err(Error::transaction(format!(
                    "sequence {sequence} does not satisfy the committed relative \
                     timelock (sequence {required})"
                )));
            }
        }

        self.sequence_override = Some(sequence);

        Ok(self)
    }

    /// Provide the SHA256 preimage for a hashlock leaf. Valid once all
    /// inputs and at least one output are declared.
    ///
    /// The preimage is checked against the committed target immediately, so
    /// a wrong secret fails here rather than at broadcast.
    pub fn unlock_preimage(mut self, preimage: impl Into<Vec<u8>>) -> Result<Self, Error> {
        self.check_state("provide a preimage", State::CollectingOutputs)?;

        let target = match self.condition() {
            Some(SpendCondition::HashLock { target, .. }) => *target,
            _ => {
                return Err(Error::transaction(
                    "only hashlock leaves take a preimage",
                ));
            }
        };

        let preimage = preimage.into();
        if sha256::Hash::hash(&preimage) != target {
            return Err(Error::preimage_mismatch());
        }

        self.preimage = Some(preimage);

        Ok(self)
    }

    /// Provide the witness stack elements for a custom leaf, in
    /// serialization order. Valid once all inputs and at least one output
    /// are declared; the script and control block are appended by
    /// [`SpendBuilder::build`].
    pub fn unlock_with(mut self, elements: Vec<Vec<u8>>) -> Result<Self, Error> {
        self.check_state("provide a witness", State::CollectingOutputs)?;

        if !matches!(self.condition(), Some(SpendCondition::Custom { .. })) {
            return Err(Error::transaction(
                "only custom leaves take a caller-supplied witness",
            ));
        }

        if let Some(element) = elements
            .iter()
            .find(|element| element.len() > MAX_WITNESS_ELEMENT_SIZE)
        {
            return Err(Error::transaction(format!(
                "witness element of {} bytes exceeds the {MAX_WITNESS_ELEMENT_SIZE}-byte limit",
                element.len()
            )));
        }

        self.custom_witness = Some(elements);

        Ok(self)
    }

    /// Sign every input with a caller-supplied signer.
    ///
    /// `sign_fn` receives the BIP341 digest of each input and returns a
    /// Schnorr signature together with the public key it verifies under. The
    /// key must be authorized for this builder's path: the tweaked output
    /// key for a key-path spend, the leaf's key otherwise, or any
    /// not-yet-signed member of a multisig key set. Multisig leaves call
    /// this once per signer.
    ///
    /// Signing freezes the transaction shape; inputs, outputs, and witness
    /// data can no longer change afterwards.
    pub fn sign<C, F>(mut self, secp: &Secp256k1<C>, sign_fn: F) -> Result<Self, Error>
    where
        C: Verification,
        F: Fn(Message) -> Result<(schnorr::Signature, XOnlyPublicKey), Error>,
    {
        if self.state == State::CollectingInputs {
            return Err(Error::invalid_builder_state("sign", self.state.name()));
        }

        let tx = self.unsigned_tx();
        let prevouts = self.prevouts();

        let mut signer = None;
        let mut signatures = Vec::with_capacity(self.inputs.len());
        for index in 0..self.inputs.len() {
            let digest = match self.mode {
                Mode::KeyPath => sighash::key_spend_digest(&tx, &prevouts, index)?,
                Mode::ScriptPath { leaf_index } => {
                    let leaf_hash = self.program.leaves()[leaf_index].leaf_hash();
                    sighash::script_spend_digest(&tx, &prevouts, index, leaf_hash)?
                }
            };

            let (sig, pk) = sign_fn(digest)?;

            secp.verify_schnorr(&sig, &digest, &pk)
                .map_err(Error::crypto)
                .with_context(|| format!("signature for input {index} does not verify"))?;

            match signer {
                None => {
                    self.check_signer(pk)?;
                    signer = Some(pk);
                }
                Some(signer) if signer == pk => {}
                Some(_) => {
                    return Err(Error::transaction(
                        "one sign call must use a single key for all inputs",
                    ));
                }
            }

            signatures.push(sig);
        }

        let pk = signer.ok_or_else(|| {
            Error::invalid_builder_state("sign without any input", self.state.name())
        })?;

        self.signatures.push((pk, signatures));
        self.state = State::Signed;

        Ok(self)
    }

    /// Assemble the fully-signed transaction.
    ///
    /// The implicit fee is the difference between input and output sums; a
    /// transaction paying out more than it spends is rejected.
    pub fn build(self) -> Result<Transaction, Error> {
        match (self.state, self.condition()) {
            (State::Signed, _) => {}
            // Custom leaves are unlocked entirely by the caller-supplied
            // witness; no sign step is involved.
            (State::CollectingOutputs, Some(SpendCondition::Custom { .. }))
                if self.custom_witness.is_some() => {}
            (state, _) => {
                return Err(Error::invalid_builder_state("build", state.name()));
            }
        }

        let total_in = self
            .inputs
            .iter()
            .map(|input| input.amount)
            .sum::<Amount>();
        let total_out = self.outputs.iter().map(|output| output.value).sum::<Amount>();
        let fee = total_in
            .checked_sub(total_out)
            .ok_or_else(|| Error::transaction("outputs exceed inputs"))?;

        let mut tx = self.unsigned_tx();
        for index in 0..tx.input.len() {
            tx.input[index].witness = self.input_witness(index)?;
        }

        tracing::debug!(
            txid = %tx.compute_txid(),
            %fee,
            raw_tx = %bitcoin::consensus::serialize(&tx).as_hex(),
            "Built spend transaction"
        );

        Ok(tx)
    }

    fn input_witness(&self, index: usize) -> Result<Witness, Error> {
        match self.mode {
            Mode::KeyPath => {
                let (_, sigs) = self.signatures.first().ok_or_else(|| {
                    Error::transaction("key-path spend is missing its signature")
                })?;
                let sig = taproot::Signature {
                    signature: sigs[index],
                    sighash_type: TapSighashType::Default,
                };

                Ok(Witness::p2tr_key_spend(&sig))
            }
            Mode::ScriptPath { leaf_index } => {
                let leaf = &self.program.leaves()[leaf_index];
                let mut elements = self.script_path_elements(index, leaf.condition())?;

                elements.push(leaf.script().to_bytes());
                elements.push(self.program.control_block(leaf.label())?.serialize());

                Ok(Witness::from_slice(&elements))
            }
        }
    }

    /// The witness elements preceding the script and control block, in
    /// serialization order.
    fn script_path_elements(
        &self,
        index: usize,
        condition: &SpendCondition,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let single_signature = |label: &str| {
            let (_, sigs) = self.signatures.first().ok_or_else(|| {
                Error::transaction(format!("{label} spend is missing its signature"))
            })?;

            Ok::<_, Error>(
                taproot::Signature {
                    signature: sigs[index],
                    sighash_type: TapSighashType::Default,
                }
                .to_vec(),
            )
        };

        match condition {
            SpendCondition::HashLock { .. } => {
                let preimage = self.preimage.clone().ok_or_else(|| {
                    Error::transaction("hashlock spend is missing its preimage")
                })?;

                Ok(vec![preimage, single_signature("hashlock")?])
            }
            SpendCondition::CheckSig { .. } => Ok(vec![single_signature("checksig")?]),
            SpendCondition::CsvTimelock { .. } => Ok(vec![single_signature("timelock")?]),
            SpendCondition::MultiSig { threshold, keys } => {
                if self.signatures.len() != *threshold as usize {
                    return Err(Error::transaction(format!(
                        "have {} of the {threshold} required signatures",
                        self.signatures.len()
                    )));
                }

                // The script checks keys first-to-last, consuming the
                // witness top-down, so the first declared key's signature
                // is serialized last.
                let mut elements = Vec::with_capacity(keys.len());
                for key in keys.iter().rev() {
                    match self.signatures.iter().find(|(pk, _)| pk == key) {
                        Some((_, sigs)) => elements.push(
                            taproot::Signature {
                                signature: sigs[index],
                                sighash_type: TapSighashType::Default,
                            }
                            .to_vec(),
                        ),
                        None => elements.push(Vec::new()),
                    }
                }

                Ok(elements)
            }
            SpendCondition::Custom { .. } => self.custom_witness.clone().ok_or_else(|| {
                Error::transaction("custom spend is missing its witness elements")
            }),
        }
    }

    fn check_signer(&self, pk: XOnlyPublicKey) -> Result<(), Error> {
        match self.mode {
            Mode::KeyPath => {
                if pk != self.program.output_key().to_inner() {
                    return Err(Error::transaction(
                        "key-path signer is not the tweaked output key",
                    ));
                }
                if !self.signatures.is_empty() {
                    return Err(Error::transaction("key-path spend is already signed"));
                }
            }
            Mode::ScriptPath { leaf_index } => {
                match self.program.leaves()[leaf_index].condition() {
                    SpendCondition::HashLock { key, .. }
                    | SpendCondition::CheckSig { key }
                    | SpendCondition::CsvTimelock { key, .. } => {
                        if pk != *key {
                            return Err(Error::transaction(
                                "signer is not the key committed in the leaf",
                            ));
                        }
                        if !self.signatures.is_empty() {
                            return Err(Error::transaction("leaf is already signed"));
                        }
                    }
                    SpendCondition::MultiSig { keys, .. } => {
                        if !keys.contains(&pk) {
                            return Err(Error::transaction(
                                "signer is not a member of the multisig key set",
                            ));
                        }
                        if self.signatures.iter().any(|(signed, _)| *signed == pk) {
                            return Err(Error::transaction("signer has already signed"));
                        }
                    }
                    SpendCondition::Custom { .. } => {
                        return Err(Error::transaction(
                            "custom leaves are unlocked with a caller-supplied witness",
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    fn unsigned_tx(&self) -> Transaction {
        let sequence = self.effective_sequence();

        Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: input.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::default(),
                })
                .collect(),
            output: self.outputs.clone(),
        }
    }

    fn prevouts(&self) -> Vec<TxOut> {
        self.inputs
            .iter()
            .map(|input| TxOut {
                value: input.amount,
                script_pubkey: input.script_pubkey.clone(),
            })
            .collect()
    }

    fn effective_sequence(&self) -> Sequence {
        if let Some(sequence) = self.sequence_override {
            return sequence;
        }

        match self.csv_sequence() {
            Some(sequence) => sequence,
            None => Sequence::ENABLE_RBF_NO_LOCKTIME,
        }
    }

    /// The relative lock committed in the spent leaf, if any.
    fn csv_sequence(&self) -> Option<Sequence> {
        match self.condition() {
            Some(SpendCondition::CsvTimelock { lock, .. }) => Some(*lock),
            Some(SpendCondition::Custom { script }) => {
                script::extract_sequence_from_csv_sig_script(script)
                    .ok()
                    .filter(|sequence| sequence.is_relative_lock_time())
            }
            _ => None,
        }
    }

    fn condition(&self) -> Option<&SpendCondition> {
        match self.mode {
            Mode::KeyPath => None,
            Mode::ScriptPath { leaf_index } => {
                Some(self.program.leaves()[leaf_index].condition())
            }
        }
    }

    fn check_state(&self, operation: &'static str, expected: State) -> Result<(), Error> {
        if self.state != expected {
            return Err(Error::invalid_builder_state(operation, self.state.name()));
        }

        Ok(())
    }
}
