use crate::Error;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::key::TweakedPublicKey;
use bitcoin::opcodes::all::*;
use bitcoin::script::Instruction;
use bitcoin::ScriptBuf;
use bitcoin::XOnlyPublicKey;

/// A [`ScriptBuf`] revealing the SHA256 preimage of `target` and a signature
/// by `pk`.
///
/// Satisfied by the witness `[preimage, signature]` (in serialization
/// order): the signature is consumed by `OP_CHECKSIGVERIFY` first, then the
/// preimage is hashed and compared against the committed target.
pub fn hashlock_script(target: sha256::Hash, pk: XOnlyPublicKey) -> ScriptBuf {
    ScriptBuf::builder()
        .push_x_only_key(&pk)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_opcode(OP_SHA256)
        .push_slice(target.to_byte_array())
        .push_opcode(OP_EQUAL)
        .into_script()
}

/// A single-signature [`ScriptBuf`].
pub fn checksig_script(pk: XOnlyPublicKey) -> ScriptBuf {
    ScriptBuf::builder()
        .push_x_only_key(&pk)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// A `threshold`-of-`pks.len()` tapscript multisignature [`ScriptBuf`].
///
/// Serializes the CHECKSIGADD accumulation circuit in the caller's key
/// order. Evaluation order is security-critical: witness signatures must be
/// supplied to match this exact order, which spenders derive from the same
/// declared key sequence.
pub fn multisig_script(threshold: u8, pks: &[XOnlyPublicKey]) -> ScriptBuf {
    let mut builder = ScriptBuf::builder().push_int(0);

    for pk in pks {
        builder = builder.push_x_only_key(pk).push_opcode(OP_CHECKSIGADD);
    }

    builder
        .push_int(threshold as i64)
        .push_opcode(OP_EQUAL)
        .into_script()
}

/// A [`ScriptBuf`] allowing the owner of `pk` to spend after the relative
/// lock expressed by `locktime` has passed since the spent output confirmed.
pub fn csv_sig_script(locktime: bitcoin::Sequence, pk: XOnlyPublicKey) -> ScriptBuf {
    ScriptBuf::builder()
        .push_int(locktime.to_consensus_u32() as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_x_only_key(&pk)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// The script pubkey for the Taproot output committing to `output_key`.
pub fn tr_script_pubkey(output_key: TweakedPublicKey) -> ScriptBuf {
    ScriptBuf::builder()
        .push_opcode(OP_PUSHNUM_1)
        .push_slice(output_key.serialize())
        .into_script()
}

/// Recover the [`bitcoin::Sequence`] committed in a CSV-sig script.
pub fn extract_sequence_from_csv_sig_script(
    script: &ScriptBuf,
) -> Result<bitcoin::Sequence, Error> {
    let mut previous = None;
    for instruction in script.instructions() {
        let instruction = instruction.map_err(Error::transaction)?;

        if matches!(instruction, Instruction::Op(op) if op == OP_CSV) {
            let sequence = match previous {
                // Script numbers are minimally-encoded little-endian.
                Some(Instruction::PushBytes(bytes)) => {
                    let bytes = bytes.as_bytes();
                    if bytes.len() > 4 {
                        return Err(Error::transaction(
                            "CSV sequence push longer than four bytes",
                        ));
                    }
                    let mut buffer = [0u8; 4];
                    buffer[..bytes.len()].copy_from_slice(bytes);
                    u32::from_le_bytes(buffer)
                }
                Some(Instruction::Op(op))
                    if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op.to_u8()) =>
                {
                    (op.to_u8() - OP_PUSHNUM_1.to_u8()) as u32 + 1
                }
                _ => return Err(Error::transaction("no sequence push before OP_CSV")),
            };

            return Ok(bitcoin::Sequence::from_consensus(sequence));
        }

        previous = Some(instruction);
    }

    Err(Error::transaction("script contains no OP_CSV"))
}
