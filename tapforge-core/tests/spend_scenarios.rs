use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::key::Keypair;
use bitcoin::key::Secp256k1;
use bitcoin::key::TapTweak;
use bitcoin::secp256k1::schnorr;
use bitcoin::secp256k1::SecretKey;
use bitcoin::Amount;
use bitcoin::Network;
use bitcoin::OutPoint;
use bitcoin::Sequence;
use bitcoin::Transaction;
use bitcoin::TxOut;
use bitcoin::Txid;
use bitcoin::XOnlyPublicKey;
use tapforge_core::sighash;
use tapforge_core::ErrorKind;
use tapforge_core::TapTreeBuilder;
use tapforge_core::TaprootProgram;

fn keypair(byte: u8) -> Keypair {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
    Keypair::from_secret_key(&secp, &sk)
}

fn xonly(byte: u8) -> XOnlyPublicKey {
    keypair(byte).x_only_public_key().0
}

fn outpoint(vout: u32) -> OutPoint {
    OutPoint {
        txid: Txid::all_zeros(),
        vout,
    }
}

fn sign_with(
    kp: Keypair,
) -> impl Fn(
    bitcoin::secp256k1::Message,
) -> Result<(schnorr::Signature, XOnlyPublicKey), tapforge_core::Error> {
    move |msg| {
        let secp = Secp256k1::new();
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
        Ok((sig, kp.x_only_public_key().0))
    }
}

fn prevouts(program: &TaprootProgram, amounts: &[Amount]) -> Vec<TxOut> {
    amounts
        .iter()
        .map(|amount| TxOut {
            value: *amount,
            script_pubkey: program.script_pubkey(),
        })
        .collect()
}

#[test]
fn hashlock_spend_reveals_preimage_and_signature() {
    let secp = Secp256k1::new();
    let owner = keypair(7);
    let preimage = b"the quick brown fox".to_vec();
    let target = sha256::Hash::hash(&preimage);

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .hashlock("hash", target, owner.x_only_public_key().0)
        .unwrap()
        .checksig("other", xonly(2))
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let funding = Amount::from_sat(50_000);
    let destination = program.address().clone();

    let tx = program
        .spend("hash")
        .unwrap()
        .from_utxo(outpoint(0), funding)
        .unwrap()
        .to(&destination, Amount::from_sat(49_000))
        .unwrap()
        .unlock_preimage(preimage.clone())
        .unwrap()
        .sign(&secp, sign_with(owner))
        .unwrap()
        .build()
        .unwrap();

    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 4);
    assert_eq!(witness.nth(0).unwrap(), &preimage[..]);
    assert_eq!(witness.nth(1).unwrap().len(), 64);
    assert_eq!(
        witness.nth(2).unwrap(),
        program.leaf("hash").unwrap().script().as_bytes()
    );

    let control_block =
        bitcoin::taproot::ControlBlock::decode(witness.nth(3).unwrap()).unwrap();
    assert_eq!(control_block.internal_key, program.internal_key());

    // The embedded signature verifies against the script-spend digest.
    let digest = sighash::script_spend_digest(
        &tx,
        &prevouts(&program, &[funding]),
        0,
        program.leaf("hash").unwrap().leaf_hash(),
    )
    .unwrap();
    let sig = schnorr::Signature::from_slice(witness.nth(1).unwrap()).unwrap();
    secp.verify_schnorr(&sig, &digest, &owner.x_only_public_key().0)
        .unwrap();
}

#[test]
fn key_path_spend_carries_a_single_signature() {
    let secp = Secp256k1::new();
    let internal = keypair(3);

    let program = TapTreeBuilder::new(internal.x_only_public_key().0, Network::Signet)
        .checksig("fallback", xonly(4))
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let tweaked = internal.tap_tweak(&secp, program.merkle_root()).to_inner();
    let funding = Amount::from_sat(30_000);
    let destination = program.address().clone();

    let tx = program
        .key_spend()
        .from_utxo(outpoint(0), funding)
        .unwrap()
        .to(&destination, Amount::from_sat(29_500))
        .unwrap()
        .sign(&secp, sign_with(tweaked))
        .unwrap()
        .build()
        .unwrap();

    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 1);
    assert_eq!(witness.nth(0).unwrap().len(), 64);

    let digest = sighash::key_spend_digest(&tx, &prevouts(&program, &[funding]), 0).unwrap();
    let sig = schnorr::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
    secp.verify_schnorr(&sig, &digest, &program.output_key().to_inner())
        .unwrap();
}

#[test]
fn key_path_rejects_the_untweaked_internal_key() {
    let secp = Secp256k1::new();
    let internal = keypair(3);

    let program = TapTreeBuilder::new(internal.x_only_public_key().0, Network::Signet)
        .checksig("fallback", xonly(4))
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let destination = program.address().clone();
    let err = program
        .key_spend()
        .from_utxo(outpoint(0), Amount::from_sat(30_000))
        .unwrap()
        .to(&destination, Amount::from_sat(29_500))
        .unwrap()
        // Signing with the raw internal key must fail: only the tweaked
        // output key can authorize the key path.
        .sign(&secp, sign_with(internal))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[test]
fn timelocked_spend_encodes_the_committed_sequence() {
    let secp = Secp256k1::new();
    let owner = keypair(9);

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .timelock("csv", 2, owner.x_only_public_key().0)
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let destination = program.address().clone();
    let tx = program
        .spend("csv")
        .unwrap()
        .from_utxo(outpoint(0), Amount::from_sat(20_000))
        .unwrap()
        .to(&destination, Amount::from_sat(19_000))
        .unwrap()
        .sign(&secp, sign_with(owner))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(tx.input[0].sequence, Sequence::from_height(2));
    assert_eq!(tx.input[0].witness.len(), 3);
}

#[test]
fn multisig_witness_orders_signatures_by_declared_keys() {
    let secp = Secp256k1::new();
    let signers = [keypair(11), keypair(12), keypair(13)];
    let keys = signers
        .iter()
        .map(|kp| kp.x_only_public_key().0)
        .collect::<Vec<_>>();

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .multisig("vault", 2, keys.clone())
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let funding = Amount::from_sat(80_000);
    let destination = program.address().clone();

    // The third and first declared keys sign, in that call order.
    let tx = program
        .spend("vault")
        .unwrap()
        .from_utxo(outpoint(0), funding)
        .unwrap()
        .to(&destination, Amount::from_sat(79_000))
        .unwrap()
        .sign(&secp, sign_with(signers[2]))
        .unwrap()
        .sign(&secp, sign_with(signers[0]))
        .unwrap()
        .build()
        .unwrap();

    // Witness layout: one element per key in reverse declared order, then
    // script and control block.
    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 5);
    assert_eq!(witness.nth(0).unwrap().len(), 64); // keys[2]
    assert!(witness.nth(1).unwrap().is_empty()); // keys[1] did not sign
    assert_eq!(witness.nth(2).unwrap().len(), 64); // keys[0]

    let digest = sighash::script_spend_digest(
        &tx,
        &prevouts(&program, &[funding]),
        0,
        program.leaf("vault").unwrap().leaf_hash(),
    )
    .unwrap();

    let sig_2 = schnorr::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
    secp.verify_schnorr(&sig_2, &digest, &keys[2]).unwrap();
    let sig_0 = schnorr::Signature::from_slice(witness.nth(2).unwrap()).unwrap();
    secp.verify_schnorr(&sig_0, &digest, &keys[0]).unwrap();
}

#[test]
fn multisig_rejects_outsiders_and_double_signing() {
    let secp = Secp256k1::new();
    let signers = [keypair(11), keypair(12)];
    let keys = signers
        .iter()
        .map(|kp| kp.x_only_public_key().0)
        .collect::<Vec<_>>();

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .multisig("vault", 2, keys)
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let destination = program.address().clone();
    let start = || {
        program
            .spend("vault")
            .unwrap()
            .from_utxo(outpoint(0), Amount::from_sat(10_000))
            .unwrap()
            .to(&destination, Amount::from_sat(9_000))
            .unwrap()
    };

    let err = start().sign(&secp, sign_with(keypair(42))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);

    let err = start()
        .sign(&secp, sign_with(signers[0]))
        .unwrap()
        .sign(&secp, sign_with(signers[0]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[test]
fn under_threshold_multisig_cannot_build() {
    let secp = Secp256k1::new();
    let signers = [keypair(11), keypair(12)];
    let keys = signers
        .iter()
        .map(|kp| kp.x_only_public_key().0)
        .collect::<Vec<_>>();

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .multisig("vault", 2, keys)
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let destination = program.address().clone();
    let err = program
        .spend("vault")
        .unwrap()
        .from_utxo(outpoint(0), Amount::from_sat(10_000))
        .unwrap()
        .to(&destination, Amount::from_sat(9_000))
        .unwrap()
        .sign(&secp, sign_with(signers[0]))
        .unwrap()
        .build()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[test]
fn signatures_commit_to_the_whole_transaction() {
    let secp = Secp256k1::new();
    let owner = keypair(5);

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .checksig("owner", owner.x_only_public_key().0)
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let funding = Amount::from_sat(40_000);
    let destination = program.address().clone();

    let tx = program
        .spend("owner")
        .unwrap()
        .from_utxo(outpoint(0), funding)
        .unwrap()
        .to(&destination, Amount::from_sat(39_000))
        .unwrap()
        .sign(&secp, sign_with(owner))
        .unwrap()
        .build()
        .unwrap();

    let mut tampered: Transaction = tx.clone();
    tampered.output[0].value = Amount::from_sat(38_999);

    let digest = sighash::script_spend_digest(
        &tampered,
        &prevouts(&program, &[funding]),
        0,
        program.leaf("owner").unwrap().leaf_hash(),
    )
    .unwrap();
    let sig = schnorr::Signature::from_slice(tx.input[0].witness.nth(0).unwrap()).unwrap();

    assert!(secp
        .verify_schnorr(&sig, &digest, &owner.x_only_public_key().0)
        .is_err());
}

#[test]
fn tampered_control_blocks_no_longer_prove_inclusion() {
    let secp = Secp256k1::new();

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .checksig("a", xonly(2))
        .unwrap()
        .checksig("b", xonly(3))
        .unwrap()
        .checksig("c", xonly(4))
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let mut bytes = program.control_block("a").unwrap().serialize();
    // Flip one bit inside the first merkle path element.
    let path_start = 33;
    bytes[path_start] ^= 0x01;

    let tampered = bitcoin::taproot::ControlBlock::decode(&bytes).unwrap();

    let mut node =
        bitcoin::taproot::TapNodeHash::from(program.leaf("a").unwrap().leaf_hash());
    for sibling in tampered.merkle_branch.iter() {
        node = bitcoin::taproot::TapNodeHash::from_node_hashes(node, *sibling);
    }

    assert_ne!(Some(node), program.merkle_root());
}

#[test]
fn custom_leaf_spends_with_a_caller_supplied_witness() {
    let secp = Secp256k1::new();
    let script = bitcoin::ScriptBuf::builder()
        .push_opcode(bitcoin::opcodes::all::OP_SHA256)
        .push_slice(sha256::Hash::hash(b"open sesame").to_byte_array())
        .push_opcode(bitcoin::opcodes::all::OP_EQUAL)
        .into_script();

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .custom("raw", script.clone())
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let destination = program.address().clone();
    let tx = program
        .spend("raw")
        .unwrap()
        .from_utxo(outpoint(0), Amount::from_sat(15_000))
        .unwrap()
        .to(&destination, Amount::from_sat(14_000))
        .unwrap()
        .unlock_with(vec![b"open sesame".to_vec()])
        .unwrap()
        .build()
        .unwrap();

    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 3);
    assert_eq!(witness.nth(0).unwrap(), b"open sesame");
    assert_eq!(witness.nth(1).unwrap(), script.as_bytes());
}

#[test]
fn signing_requires_an_output_first() {
    let secp = Secp256k1::new();
    let owner = keypair(5);

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .checksig("owner", owner.x_only_public_key().0)
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let err = program
        .spend("owner")
        .unwrap()
        .from_utxo(outpoint(0), Amount::from_sat(10_000))
        .unwrap()
        .sign(&secp, sign_with(owner))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidBuilderState);
}

#[test]
fn multi_input_spends_sign_every_input() {
    let secp = Secp256k1::new();
    let owner = keypair(6);

    let program = TapTreeBuilder::new(xonly(1), Network::Signet)
        .checksig("owner", owner.x_only_public_key().0)
        .unwrap()
        .finalize(&secp)
        .unwrap();

    let amounts = [Amount::from_sat(10_000), Amount::from_sat(25_000)];
    let destination = program.address().clone();

    let tx = program
        .spend("owner")
        .unwrap()
        .from_utxo(outpoint(0), amounts[0])
        .unwrap()
        .from_utxo(outpoint(1), amounts[1])
        .unwrap()
        .to(&destination, Amount::from_sat(34_000))
        .unwrap()
        .sign(&secp, sign_with(owner))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(tx.input.len(), 2);

    let prevouts = prevouts(&program, &amounts);
    for (index, input) in tx.input.iter().enumerate() {
        let digest = sighash::script_spend_digest(
            &tx,
            &prevouts,
            index,
            program.leaf("owner").unwrap().leaf_hash(),
        )
        .unwrap();
        let sig = schnorr::Signature::from_slice(input.witness.nth(0).unwrap()).unwrap();
        secp.verify_schnorr(&sig, &digest, &owner.x_only_public_key().0)
            .unwrap();
    }
}
