//! Input/output vector handling for proof submissions.
//!
//! `vin` and `vout` are the consensus encodings of a transaction's input
//! and output vectors (compact-size count followed by the items), exactly
//! as they appear in the legacy serialization.
use bitcoin::{
    consensus,
    hashes::{sha256d, Hash},
    OutPoint, ScriptBuf, TxIn, TxOut, Txid,
};
use sha3::{Digest, Keccak256};

use crate::error::OracleError;

/// Length of a serialized outpoint.
pub const OUTPOINT_LEN: usize = 36;

/// Content hash used for request conditions.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Parse a non-empty input vector.
pub fn parse_vin(vin: &[u8]) -> Result<Vec<TxIn>, OracleError> {
    match consensus::deserialize::<Vec<TxIn>>(vin) {
        Ok(inputs) if !inputs.is_empty() => Ok(inputs),
        _ => Err(OracleError::MalformedVin),
    }
}

/// Parse a non-empty output vector.
pub fn parse_vout(vout: &[u8]) -> Result<Vec<TxOut>, OracleError> {
    match consensus::deserialize::<Vec<TxOut>>(vout) {
        Ok(outputs) if !outputs.is_empty() => Ok(outputs),
        _ => Err(OracleError::MalformedVout),
    }
}

/// Serialized outpoint an input spends.
pub fn outpoint_bytes(input: &TxIn) -> Vec<u8> {
    consensus::serialize(&input.previous_output)
}

/// Length-prefixed script of an output.
pub fn script_bytes(output: &TxOut) -> Vec<u8> {
    consensus::serialize(&output.script_pubkey)
}

/// Validate a 36-byte outpoint.
pub fn parse_outpoint(bytes: &[u8]) -> Result<OutPoint, OracleError> {
    if bytes.len() != OUTPOINT_LEN {
        return Err(OracleError::NotAValidOutpoint { len: bytes.len() });
    }
    consensus::deserialize(bytes).map_err(|_| OracleError::NotAValidOutpoint { len: bytes.len() })
}

/// Parse a length-prefixed output script and require a standard template.
pub fn parse_standard_script(bytes: &[u8]) -> Result<ScriptBuf, OracleError> {
    let script: ScriptBuf =
        consensus::deserialize(bytes).map_err(|_| OracleError::NonstandardOutput)?;
    let standard = script.is_p2pkh()
        || script.is_p2sh()
        || script.is_p2wpkh()
        || script.is_p2wsh()
        || script.is_p2tr()
        || script.is_op_return();
    if standard {
        Ok(script)
    } else {
        Err(OracleError::NonstandardOutput)
    }
}

/// Legacy txid of `version || vin || vout || locktime`.
pub fn txid(version: [u8; 4], vin: &[u8], vout: &[u8], locktime: [u8; 4]) -> Txid {
    let mut raw = Vec::with_capacity(8 + vin.len() + vout.len());
    raw.extend_from_slice(&version);
    raw.extend_from_slice(vin);
    raw.extend_from_slice(vout);
    raw.extend_from_slice(&locktime);
    Txid::from_raw_hash(sha256d::Hash::hash(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_repeated_outpoint_bytes() {
        assert_eq!(
            hex::encode(keccak256(&[0x11; 36])),
            "600e7bfdb8c3cc85df9cd058022100f260c17e7c58603758d2c1ac92c63469a6"
        );
    }

    #[test]
    fn outpoints_must_be_36_bytes() {
        assert_eq!(
            parse_outpoint(&[0xff]),
            Err(OracleError::NotAValidOutpoint { len: 1 })
        );
        let op = parse_outpoint(&[0x11; 36]).expect("36 bytes decode");
        assert_eq!(op.vout, 0x1111_1111);
    }

    #[test]
    fn nonstandard_scripts_are_rejected() {
        // 13 zero bytes behind a 0x0d length prefix: well formed, not standard.
        let mut raw = vec![0x0d];
        raw.extend_from_slice(&[0u8; 13]);
        assert_eq!(parse_standard_script(&raw), Err(OracleError::NonstandardOutput));

        // Truncated length prefix.
        assert_eq!(parse_standard_script(&[0x05, 0x6a]), Err(OracleError::NonstandardOutput));

        // OP_RETURN <4 bytes>
        let op_return = [0x06, 0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef];
        assert!(parse_standard_script(&op_return).expect("standard").is_op_return());
    }

    #[test]
    fn malformed_vectors() {
        assert_eq!(parse_vin(&[0x01; 66]), Err(OracleError::MalformedVin));
        assert_eq!(parse_vout(&[0x01; 66]), Err(OracleError::MalformedVout));
        assert_eq!(parse_vin(&[0x00]), Err(OracleError::MalformedVin));
    }
}
