//! Transactions, their signing messages and the compressed wire format
//!
//! Wire layouts (amounts through the [`DecimalCodec`]):
//! - transfer: `from(4) || to(4) || amount || fee`
//! - mass migration: `from(4) || amount || fee`
//! - create2 transfer: `from(4) || to(4) || to_pubkey_index(4) || amount || fee`
//! - burn consent: `from(4) || amount || nonce(4)`
//! - burn execution: `from(4)`
//!
//! Token types are never on the wire and nonces only for burn consents;
//! otherwise the verifier takes them from the sender's state.

use rollup_bindings::Usage;
use serde::{Deserialize, Serialize};

use crate::{decimal::DecimalCodec, error::EncodingError, registry::PublicKey};

/// Behaviour shared by the signed transaction kinds
pub trait Tx {
    /// Sender state index
    fn from_index(&self) -> u32;
    /// Nonce the sender signed
    fn nonce(&self) -> u32;
    /// Bytes covered by the sender's signature
    fn message(&self) -> Vec<u8>;
}

/// Move `amount` between two accounts of the same token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Sender state index
    pub from_index: u32,
    /// Receiver state index
    pub to_index: u32,
    /// Token both accounts hold
    pub token_type: u16,
    /// Amount moved, in token units
    pub amount: u128,
    /// Fee paid to the commit's fee receiver
    pub fee: u128,
    /// Sender nonce
    pub nonce: u32,
}

impl Transfer {
    /// Wire form
    pub fn to_compressed(&self) -> CompressedTransfer {
        CompressedTransfer {
            from_index: self.from_index,
            to_index: self.to_index,
            amount: self.amount,
            fee: self.fee,
        }
    }
}

impl Tx for Transfer {
    fn from_index(&self) -> u32 {
        self.from_index
    }

    fn nonce(&self) -> u32 {
        self.nonce
    }

    fn message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(77);
        message.push(Usage::Transfer as u8);
        message.extend_from_slice(&self.from_index.to_be_bytes());
        message.extend_from_slice(&self.to_index.to_be_bytes());
        message.extend_from_slice(&u256(self.amount));
        message.extend_from_slice(&u256(self.fee));
        message.extend_from_slice(&self.nonce.to_be_bytes());
        message
    }
}

/// Move `amount` off this chain to the spoke `spoke_id`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassMigration {
    /// Sender state index
    pub from_index: u32,
    /// Amount withdrawn
    pub amount: u128,
    /// Destination spoke
    pub spoke_id: u32,
    /// Fee paid to the commit's fee receiver
    pub fee: u128,
    /// Sender nonce
    pub nonce: u32,
}

impl MassMigration {
    /// Wire form
    pub fn to_compressed(&self) -> CompressedMassMigration {
        CompressedMassMigration {
            from_index: self.from_index,
            amount: self.amount,
            fee: self.fee,
        }
    }
}

impl Tx for MassMigration {
    fn from_index(&self) -> u32 {
        self.from_index
    }

    fn nonce(&self) -> u32 {
        self.nonce
    }

    fn message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(77);
        message.push(Usage::MassMigration as u8);
        message.extend_from_slice(&self.from_index.to_be_bytes());
        message.extend_from_slice(&u256(self.amount));
        message.extend_from_slice(&u256(self.fee));
        message.extend_from_slice(&self.spoke_id.to_be_bytes());
        message.extend_from_slice(&self.nonce.to_be_bytes());
        message
    }
}

/// Transfer to a key that has no account yet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Create2Transfer {
    /// Sender state index
    pub from_index: u32,
    /// Must be the next empty state slot
    pub to_index: u32,
    /// Key the new account is registered under
    pub to_pubkey: PublicKey,
    /// Opening balance of the new account
    pub amount: u128,
    /// Fee paid to the commit's fee receiver
    pub fee: u128,
    /// Sender nonce
    pub nonce: u32,
}

impl Create2Transfer {
    /// Wire form, once the receiving key has a registry index
    pub fn to_compressed(&self, to_pubkey_index: u32) -> CompressedCreate2Transfer {
        CompressedCreate2Transfer {
            from_index: self.from_index,
            to_index: self.to_index,
            to_pubkey_index,
            amount: self.amount,
            fee: self.fee,
        }
    }
}

impl Tx for Create2Transfer {
    fn from_index(&self) -> u32 {
        self.from_index
    }

    fn nonce(&self) -> u32 {
        self.nonce
    }

    fn message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(201);
        message.push(Usage::Create2Transfer as u8);
        message.extend_from_slice(&self.from_index.to_be_bytes());
        message.extend_from_slice(&self.to_pubkey.to_bytes());
        message.extend_from_slice(&u256(self.amount));
        message.extend_from_slice(&u256(self.fee));
        message.extend_from_slice(&self.nonce.to_be_bytes());
        message
    }
}

/// Consent to have `amount` burned from the account once per period.
/// A zero amount withdraws the consent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnConsent {
    /// Consenting account
    pub from_index: u32,
    /// Amount burned per period
    pub amount: u128,
    /// Account nonce
    pub nonce: u32,
}

impl BurnConsent {
    /// Wire form
    pub fn to_compressed(&self) -> CompressedBurnConsent {
        CompressedBurnConsent {
            from_index: self.from_index,
            amount: self.amount,
            nonce: self.nonce,
        }
    }
}

impl Tx for BurnConsent {
    fn from_index(&self) -> u32 {
        self.from_index
    }

    fn nonce(&self) -> u32 {
        self.nonce
    }

    fn message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(41);
        message.push(Usage::BurnConsent as u8);
        message.extend_from_slice(&self.from_index.to_be_bytes());
        message.extend_from_slice(&u256(self.amount));
        message.extend_from_slice(&self.nonce.to_be_bytes());
        message
    }
}

/// Burn of an account's consented amount, run by the coordinator without a
/// signature. The period is set by the commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnExecution {
    /// Burned account
    pub from_index: u32,
}

/// Fixed-width record inside a commitment's `txs` bytes
pub trait WireTx: Sized {
    /// Encoded size under `codec`
    fn wire_len(codec: &DecimalCodec) -> usize;
    /// Append the encoding to `out`
    fn write(&self, codec: &DecimalCodec, out: &mut Vec<u8>) -> Result<(), EncodingError>;
    /// Decode one record of exactly [`Self::wire_len`] bytes
    fn read(bytes: &[u8], codec: &DecimalCodec) -> Result<Self, EncodingError>;
}

/// Wire form of a [`Transfer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedTransfer {
    /// Sender state index
    pub from_index: u32,
    /// Receiver state index
    pub to_index: u32,
    /// Amount moved
    pub amount: u128,
    /// Fee
    pub fee: u128,
}

impl WireTx for CompressedTransfer {
    fn wire_len(codec: &DecimalCodec) -> usize {
        8 + 2 * codec.bytes_len()
    }

    fn write(&self, codec: &DecimalCodec, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        out.extend_from_slice(&self.from_index.to_be_bytes());
        out.extend_from_slice(&self.to_index.to_be_bytes());
        out.extend_from_slice(&codec.encode_bytes(self.amount)?);
        out.extend_from_slice(&codec.encode_bytes(self.fee)?);
        Ok(())
    }

    fn read(bytes: &[u8], codec: &DecimalCodec) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes, Self::wire_len(codec))?;
        Ok(Self {
            from_index: reader.u32(),
            to_index: reader.u32(),
            amount: reader.amount(codec)?,
            fee: reader.amount(codec)?,
        })
    }
}

/// Wire form of a [`MassMigration`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedMassMigration {
    /// Sender state index
    pub from_index: u32,
    /// Amount withdrawn
    pub amount: u128,
    /// Fee
    pub fee: u128,
}

impl WireTx for CompressedMassMigration {
    fn wire_len(codec: &DecimalCodec) -> usize {
        4 + 2 * codec.bytes_len()
    }

    fn write(&self, codec: &DecimalCodec, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        out.extend_from_slice(&self.from_index.to_be_bytes());
        out.extend_from_slice(&codec.encode_bytes(self.amount)?);
        out.extend_from_slice(&codec.encode_bytes(self.fee)?);
        Ok(())
    }

    fn read(bytes: &[u8], codec: &DecimalCodec) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes, Self::wire_len(codec))?;
        Ok(Self {
            from_index: reader.u32(),
            amount: reader.amount(codec)?,
            fee: reader.amount(codec)?,
        })
    }
}

/// Wire form of a [`Create2Transfer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedCreate2Transfer {
    /// Sender state index
    pub from_index: u32,
    /// New account's state index
    pub to_index: u32,
    /// Registry index of the new account's key
    pub to_pubkey_index: u32,
    /// Opening balance
    pub amount: u128,
    /// Fee
    pub fee: u128,
}

impl WireTx for CompressedCreate2Transfer {
    fn wire_len(codec: &DecimalCodec) -> usize {
        12 + 2 * codec.bytes_len()
    }

    fn write(&self, codec: &DecimalCodec, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        out.extend_from_slice(&self.from_index.to_be_bytes());
        out.extend_from_slice(&self.to_index.to_be_bytes());
        out.extend_from_slice(&self.to_pubkey_index.to_be_bytes());
        out.extend_from_slice(&codec.encode_bytes(self.amount)?);
        out.extend_from_slice(&codec.encode_bytes(self.fee)?);
        Ok(())
    }

    fn read(bytes: &[u8], codec: &DecimalCodec) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes, Self::wire_len(codec))?;
        Ok(Self {
            from_index: reader.u32(),
            to_index: reader.u32(),
            to_pubkey_index: reader.u32(),
            amount: reader.amount(codec)?,
            fee: reader.amount(codec)?,
        })
    }
}

/// Wire form of a [`BurnConsent`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedBurnConsent {
    /// Consenting account
    pub from_index: u32,
    /// Amount burned per period
    pub amount: u128,
    /// Account nonce
    pub nonce: u32,
}

impl WireTx for CompressedBurnConsent {
    fn wire_len(codec: &DecimalCodec) -> usize {
        8 + codec.bytes_len()
    }

    fn write(&self, codec: &DecimalCodec, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        out.extend_from_slice(&self.from_index.to_be_bytes());
        out.extend_from_slice(&codec.encode_bytes(self.amount)?);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        Ok(())
    }

    fn read(bytes: &[u8], codec: &DecimalCodec) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes, Self::wire_len(codec))?;
        Ok(Self {
            from_index: reader.u32(),
            amount: reader.amount(codec)?,
            nonce: reader.u32(),
        })
    }
}

impl WireTx for BurnExecution {
    fn wire_len(_codec: &DecimalCodec) -> usize {
        4
    }

    fn write(&self, _codec: &DecimalCodec, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        out.extend_from_slice(&self.from_index.to_be_bytes());
        Ok(())
    }

    fn read(bytes: &[u8], codec: &DecimalCodec) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes, Self::wire_len(codec))?;
        Ok(Self {
            from_index: reader.u32(),
        })
    }
}

/// Concatenate the wire encodings of `txs`
pub fn serialize_txs<T: WireTx>(txs: &[T], codec: &DecimalCodec) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(txs.len() * T::wire_len(codec));
    for tx in txs {
        tx.write(codec, &mut out)?;
    }
    Ok(out)
}

/// Split a commitment's `txs` bytes into records
pub fn deserialize_txs<T: WireTx>(bytes: &[u8], codec: &DecimalCodec) -> Result<Vec<T>, EncodingError> {
    let width = T::wire_len(codec);
    if bytes.len() % width != 0 {
        return Err(EncodingError::InvalidLength {
            expected: (bytes.len() / width + 1) * width,
            actual: bytes.len(),
        });
    }
    bytes.chunks(width).map(|chunk| T::read(chunk, codec)).collect()
}

/// `value` as a big-endian 256-bit word
pub(crate) fn u256(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], expected: usize) -> Result<Self, EncodingError> {
        if bytes.len() != expected {
            return Err(EncodingError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes, offset: 0 })
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        slice
    }

    fn u32(&mut self) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4));
        u32::from_be_bytes(word)
    }

    fn amount(&mut self, codec: &DecimalCodec) -> Result<u128, EncodingError> {
        codec.decode_bytes(self.take(codec.bytes_len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEC: DecimalCodec = DecimalCodec::USDT;

    fn transfer() -> Transfer {
        Transfer {
            from_index: 1,
            to_index: 2,
            token_type: 1,
            amount: 39_990_000,
            fee: 10_000,
            nonce: 3,
        }
    }

    #[test]
    fn test_transfer_wire_layout() {
        let bytes = serialize_txs(&[transfer().to_compressed()], &CODEC).unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 1, 0, 0, 0, 2, 0x4f, 0x9f, 0x40, 0x01]
        );
        let decoded: Vec<CompressedTransfer> = deserialize_txs(&bytes, &CODEC).unwrap();
        assert_eq!(decoded, vec![transfer().to_compressed()]);
    }

    #[test]
    fn test_wire_rejects_partial_record() {
        let result: Result<Vec<CompressedMassMigration>, _> = deserialize_txs(&[0u8; 9], &CODEC);
        assert_eq!(
            result,
            Err(EncodingError::InvalidLength {
                expected: 16,
                actual: 9
            })
        );
    }

    #[test]
    fn test_wire_rejects_unencodable_amount() {
        let mut tx = transfer();
        tx.amount = 12_345_678;
        assert!(matches!(
            serialize_txs(&[tx.to_compressed()], &CODEC),
            Err(EncodingError::MantissaOverflow { .. })
        ));
    }

    #[test]
    fn test_create2_wire_layout() {
        let tx = Create2Transfer {
            from_index: 1,
            to_index: 5,
            to_pubkey: PublicKey::default(),
            amount: 1_000_000,
            fee: 0,
            nonce: 0,
        };
        let bytes = serialize_txs(&[tx.to_compressed(9)], &CODEC).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 9]);
        let decoded: Vec<CompressedCreate2Transfer> = deserialize_txs(&bytes, &CODEC).unwrap();
        assert_eq!(decoded[0].to_pubkey_index, 9);
        assert_eq!(decoded[0].amount, 1_000_000);
    }

    #[test]
    fn test_messages_are_tagged_and_distinct() {
        let message = transfer().message();
        assert_eq!(message.len(), 77);
        assert_eq!(message[0], Usage::Transfer as u8);
        assert_eq!(&message[73..], &[0, 0, 0, 3]);

        let mut bumped = transfer();
        bumped.nonce += 1;
        assert_ne!(bumped.message(), message);

        let migration = MassMigration {
            from_index: 1,
            amount: 39_990_000,
            spoke_id: 2,
            fee: 10_000,
            nonce: 3,
        };
        assert_eq!(migration.message()[0], Usage::MassMigration as u8);
        assert_eq!(migration.message().len(), 77);
    }

    #[test]
    fn test_burn_wire_layouts() {
        let consent = BurnConsent {
            from_index: 7,
            amount: 2_000_000,
            nonce: 10,
        };
        let bytes = serialize_txs(&[consent.to_compressed()], &CODEC).unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..4], &[0, 0, 0, 7]);
        assert_eq!(&bytes[6..], &[0, 0, 0, 10]);
        let decoded: Vec<CompressedBurnConsent> = deserialize_txs(&bytes, &CODEC).unwrap();
        assert_eq!(decoded, vec![consent.to_compressed()]);

        let message = consent.message();
        assert_eq!(message.len(), 41);
        assert_eq!(message[0], Usage::BurnConsent as u8);

        let executions = [BurnExecution { from_index: 1 }, BurnExecution { from_index: 3 }];
        let bytes = serialize_txs(&executions, &CODEC).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0, 0, 0, 3]);
        let decoded: Vec<BurnExecution> = deserialize_txs(&bytes, &CODEC).unwrap();
        assert_eq!(decoded, executions.to_vec());
    }
}
