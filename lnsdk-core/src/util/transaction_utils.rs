use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::chain::Utxo;
use crate::error::{SdkError, SdkResult};
use crate::util::crypto_utils::signature_to_bitcoin_vec;

/// Upper bound of a DER signature plus sighash byte
const MAX_SIGNATURE_LEN: u64 = 73;

fn var_int_len(n: u64) -> u64 {
    if n < 0xfd {
        1
    } else {
        3
    }
}

/// A spend of P2WSH outputs with witness `<sig> <middle> <witness_script>`
pub struct ScriptSpend<'a> {
    /// Witness script of the spent outputs
    pub witness_script: &'a Script,
    /// Signing key
    pub key: &'a SecretKey,
    /// Selects the script branch, e.g. empty for a timeout path or a preimage
    pub middle: Vec<u8>,
    /// Input sequence, carries a CSV delay if the branch has one
    pub sequence: Sequence,
    /// Transaction lock time, for CLTV branches
    pub lock_time: LockTime,
}

impl<'a> ScriptSpend<'a> {
    fn witness_weight(&self) -> u64 {
        let script_len = self.witness_script.len() as u64;
        let middle_len = self.middle.len() as u64;
        // element count, then length-prefixed elements
        1 + 1 + MAX_SIGNATURE_LEN + 1 + middle_len + var_int_len(script_len) + script_len
    }
}

/// Spend all `utxos` to `destination`, paying `sat_per_vbyte`
pub fn build_script_spend(
    spend: &ScriptSpend,
    utxos: &[Utxo],
    destination: ScriptBuf,
    sat_per_vbyte: u32,
    secp_ctx: &Secp256k1<All>,
) -> SdkResult<Transaction> {
    if utxos.is_empty() {
        return Err(SdkError::invalid_input("no outputs to spend"));
    }
    let total: u64 = utxos.iter().map(|u| u.value).sum();
    let input = utxos
        .iter()
        .map(|u| TxIn {
            previous_output: u.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: spend.sequence,
            witness: Witness::new(),
        })
        .collect();
    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: spend.lock_time,
        input,
        output: vec![TxOut { value: Amount::from_sat(total), script_pubkey: destination }],
    };

    // add two for the segwit marker and flag
    let weight = tx.weight().to_wu() + 2 + spend.witness_weight() * utxos.len() as u64;
    let fee = (weight + 3) / 4 * sat_per_vbyte as u64;
    let dust = tx.output[0].script_pubkey.minimal_non_dust().to_sat();
    if total < fee + dust {
        return Err(SdkError::invalid_input(format!(
            "{} sat cannot cover a fee of {} sat",
            total, fee
        )));
    }
    tx.output[0].value = Amount::from_sat(total - fee);

    let mut witnesses = Vec::with_capacity(utxos.len());
    {
        let mut cache = SighashCache::new(&tx);
        for (index, utxo) in utxos.iter().enumerate() {
            let sighash = cache
                .p2wsh_signature_hash(
                    index,
                    spend.witness_script,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| SdkError::generic(format!("sighash: {}", e)))?;
            let sig =
                secp_ctx.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), spend.key);
            witnesses.push(Witness::from_slice(&[
                signature_to_bitcoin_vec(sig),
                spend.middle.clone(),
                spend.witness_script.to_bytes(),
            ]));
        }
    }
    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::opcodes::all::OP_CHECKSIG;
    use bitcoin::script::Builder;
    use bitcoin::{OutPoint, Txid};

    fn utxo(n: u8, value: u64) -> Utxo {
        Utxo {
            outpoint: OutPoint { txid: Txid::from_byte_array([n; 32]), vout: n as u32 },
            value,
            block_height: Some(100),
        }
    }

    #[test]
    fn fee_test() {
        let secp_ctx = Secp256k1::new();
        let key = SecretKey::from_slice(&[3; 32]).unwrap();
        let pubkey = bitcoin::PublicKey::new(key.public_key(&secp_ctx));
        let script = Builder::new().push_key(&pubkey).push_opcode(OP_CHECKSIG).into_script();
        let spend = ScriptSpend {
            witness_script: &script,
            key: &key,
            middle: vec![],
            sequence: Sequence::from_height(144),
            lock_time: LockTime::ZERO,
        };
        let destination = ScriptBuf::new_p2wsh(&script.wscript_hash());
        let tx = build_script_spend(
            &spend,
            &[utxo(1, 50_000), utxo(2, 30_000)],
            destination,
            10,
            &secp_ctx,
        )
        .unwrap();
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.input[0].sequence, Sequence::from_height(144));
        assert_eq!(tx.input[0].witness.len(), 3);
        let fee = 80_000 - tx.output[0].value.to_sat();
        let actual = tx.vsize() as u64 * 10;
        assert!(fee >= actual);
        assert!(fee - actual < 20);
    }

    #[test]
    fn fee_too_high_test() {
        let secp_ctx = Secp256k1::new();
        let key = SecretKey::from_slice(&[3; 32]).unwrap();
        let script = Builder::new().push_opcode(OP_CHECKSIG).into_script();
        let spend = ScriptSpend {
            witness_script: &script,
            key: &key,
            middle: vec![1; 32],
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            lock_time: LockTime::ZERO,
        };
        let destination = ScriptBuf::new_p2wsh(&script.wscript_hash());
        assert!(build_script_spend(&spend, &[utxo(1, 1_000)], destination.clone(), 100, &secp_ctx)
            .is_err());
        assert!(build_script_spend(&spend, &[], destination, 1, &secp_ctx).is_err());
    }
}
