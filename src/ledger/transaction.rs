//! Legacy transaction wire format.
//!
//! A transaction is `compact(signatures) || message`; the message is a
//! three-byte header, the account key table, the recent blockhash and the
//! compiled instructions. Account keys are ordered writable signers (fee payer
//! first), read-only signers, writable non-signers, read-only non-signers.

use super::{Instruction, LedgerError};
use crate::domain::{Keypair, Pubkey, TxSignature};

/// Append `value` as a compact-u16 (7 bits per byte, high bit = continue).
pub fn encode_compact_u16(mut value: u16, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn encode_len(len: usize, out: &mut Vec<u8>) -> Result<(), LedgerError> {
    let len = u16::try_from(len)
        .map_err(|_| LedgerError::Rejected(format!("array of {} entries is too long", len)))?;
    encode_compact_u16(len, out);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: [u8; 32],
    pub instructions: Vec<CompiledInstruction>,
}

#[derive(Clone, Copy)]
struct KeyFlags {
    key: Pubkey,
    is_signer: bool,
    is_writable: bool,
}

impl Message {
    /// Compile a single instruction with `payer` as fee payer.
    pub fn compile(
        instruction: &Instruction,
        payer: &Pubkey,
        recent_blockhash: [u8; 32],
    ) -> Result<Self, LedgerError> {
        let mut keys: Vec<KeyFlags> = vec![KeyFlags {
            key: *payer,
            is_signer: true,
            is_writable: true,
        }];
        let mut merge = |key: Pubkey, is_signer: bool, is_writable: bool| {
            match keys.iter_mut().find(|k| k.key == key) {
                Some(existing) => {
                    existing.is_signer |= is_signer;
                    existing.is_writable |= is_writable;
                }
                None => keys.push(KeyFlags {
                    key,
                    is_signer,
                    is_writable,
                }),
            }
        };
        for meta in &instruction.accounts {
            merge(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        merge(instruction.program_id, false, false);

        // Stable sort keeps the payer first among writable signers.
        keys.sort_by_key(|k| match (k.is_signer, k.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        });

        if keys.len() > u8::MAX as usize {
            return Err(LedgerError::Rejected(format!(
                "{} account keys exceed the message limit",
                keys.len()
            )));
        }
        let count = |signer: bool, writable: bool| {
            keys.iter()
                .filter(|k| k.is_signer == signer && k.is_writable == writable)
                .count() as u8
        };
        let header = MessageHeader {
            num_required_signatures: count(true, true) + count(true, false),
            num_readonly_signed_accounts: count(true, false),
            num_readonly_unsigned_accounts: count(false, false),
        };
        let account_keys: Vec<Pubkey> = keys.iter().map(|k| k.key).collect();
        let index_of = |key: &Pubkey| {
            account_keys
                .iter()
                .position(|k| k == key)
                .map(|i| i as u8)
                .ok_or_else(|| LedgerError::Rejected(format!("account {} not in key table", key)))
        };

        let compiled = CompiledInstruction {
            program_id_index: index_of(&instruction.program_id)?,
            accounts: instruction
                .accounts
                .iter()
                .map(|m| index_of(&m.pubkey))
                .collect::<Result<_, _>>()?,
            data: instruction.data.clone(),
        };

        Ok(Message {
            header,
            account_keys,
            recent_blockhash,
            instructions: vec![compiled],
        })
    }

    /// Keys whose signatures the transaction must carry, in order.
    pub fn signer_keys(&self) -> &[Pubkey] {
        &self.account_keys[..self.header.num_required_signatures as usize]
    }

    pub fn serialize(&self) -> Result<Vec<u8>, LedgerError> {
        let mut out = vec![
            self.header.num_required_signatures,
            self.header.num_readonly_signed_accounts,
            self.header.num_readonly_unsigned_accounts,
        ];
        encode_len(self.account_keys.len(), &mut out)?;
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&self.recent_blockhash);
        encode_len(self.instructions.len(), &mut out)?;
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            encode_len(ix.accounts.len(), &mut out)?;
            out.extend_from_slice(&ix.accounts);
            encode_len(ix.data.len(), &mut out)?;
            out.extend_from_slice(&ix.data);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<[u8; 64]>,
    pub message: Message,
}

impl Transaction {
    /// Compile and sign `instruction`. The first signer pays the fee; every
    /// signer account the instruction names must be present in `signers`.
    pub fn new_signed(
        instruction: &Instruction,
        signers: &[&Keypair],
        recent_blockhash: [u8; 32],
    ) -> Result<Self, LedgerError> {
        let payer = signers
            .first()
            .ok_or_else(|| LedgerError::Rejected("transaction has no fee payer".to_string()))?;
        let message = Message::compile(instruction, &payer.pubkey(), recent_blockhash)?;
        let message_bytes = message.serialize()?;

        let signatures = message
            .signer_keys()
            .iter()
            .map(|key| {
                signers
                    .iter()
                    .find(|s| s.pubkey() == *key)
                    .map(|s| s.sign_message(&message_bytes))
                    .ok_or_else(|| LedgerError::Rejected(format!("missing signature for {}", key)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Transaction {
            signatures,
            message,
        })
    }

    /// The transaction id: the fee payer's signature.
    pub fn signature(&self) -> Option<TxSignature> {
        self.signatures.first().map(TxSignature::from_bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, LedgerError> {
        let mut out = Vec::new();
        encode_len(self.signatures.len(), &mut out)?;
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out.extend(self.message.serialize()?);
        Ok(out)
    }
}
