//! In-memory chain state for the RPC emulator.
//!
//! Every accepted transaction is mined immediately into its own block, so
//! its receipt is available on the very next lookup. Any contract address
//! behaves as a registry: `register(string)` stores the caller's URL under
//! `(contract, sender)` and `getAgentUrl(address)` reads it back.

use std::collections::HashMap;

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, B256, keccak256};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::chain::TxHash;
use crate::chain::rpc::{JsonRpcError, codes};
use crate::chain::types::{RpcReceipt, format_quantity};
use crate::registry::abi::{GetAgentUrlCall, RegisterCall};

pub const DEFAULT_CHAIN_ID: u64 = 1337;

/// 1000 ETH in wei.
pub const DEFAULT_BALANCE: u128 = 1_000 * 1_000_000_000_000_000_000;

/// 1 gwei.
pub const GAS_PRICE: u128 = 1_000_000_000;

pub const TX_BASE_GAS: u64 = 21_000;
const ZERO_BYTE_GAS: u64 = 4;
const NONZERO_BYTE_GAS: u64 = 16;
/// Charged per 32-byte storage slot written by `register`.
const STORAGE_SLOT_GAS: u64 = 20_000;

/// Why a raw transaction was refused. Refused transactions are not mined
/// and consume no nonce.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("rlp: {0}")]
    Decode(String),
    #[error("invalid chain id: expected {expected}, got {actual:?}")]
    WrongChain { expected: u64, actual: Option<u64> },
    #[error("invalid sender: {0}")]
    InvalidSignature(String),
    #[error("nonce too low: next nonce {expected}, tx nonce {actual}")]
    NonceTooLow { expected: u64, actual: u64 },
    #[error("nonce too high: next nonce {expected}, tx nonce {actual}")]
    NonceTooHigh { expected: u64, actual: u64 },
    #[error("already known")]
    AlreadyKnown,
    #[error("intrinsic gas too low: have {limit}, want {required}")]
    IntrinsicGasTooLow { limit: u64, required: u64 },
    #[error("insufficient funds for gas * price + value: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: u128, cost: u128 },
    #[error("execution reverted: {0}")]
    Reverted(String),
}

impl From<LedgerError> for JsonRpcError {
    fn from(e: LedgerError) -> Self {
        let code = match e {
            LedgerError::Reverted(_) => codes::EXECUTION_REVERTED,
            _ => codes::SERVER_ERROR,
        };
        JsonRpcError::new(code, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub balance: u128,
    pub nonce: u64,
}

/// A URL stored by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub url: String,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct MinedTx {
    from: Address,
    to: Option<Address>,
    block_number: u64,
    gas_used: u64,
    success: bool,
}

/// Chain state behind the emulator.
#[derive(Debug)]
pub struct Ledger {
    chain_id: u64,
    initial_balance: u128,
    accounts: HashMap<Address, Account>,
    registry: HashMap<(Address, Address), RegistryEntry>,
    mined: HashMap<TxHash, MinedTx>,
    block_number: u64,
    withhold_receipts: bool,
    method_counts: HashMap<String, u64>,
}

impl Ledger {
    /// Every address not yet seen starts with `initial_balance` wei.
    pub fn new(chain_id: u64, initial_balance: u128) -> Self {
        Self {
            chain_id,
            initial_balance,
            accounts: HashMap::new(),
            registry: HashMap::new(),
            mined: HashMap::new(),
            block_number: 0,
            withhold_receipts: false,
            method_counts: HashMap::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn account(&self, address: Address) -> Account {
        self.accounts.get(&address).copied().unwrap_or(Account {
            balance: self.initial_balance,
            nonce: 0,
        })
    }

    /// Registered URL for `agent` in registry `contract`.
    pub fn registration(&self, contract: Address, agent: Address) -> Option<&RegistryEntry> {
        self.registry.get(&(contract, agent))
    }

    /// Seed a registration directly, bypassing transactions.
    pub fn set_registration(&mut self, contract: Address, agent: Address, url: impl Into<String>) {
        self.registry.insert(
            (contract, agent),
            RegistryEntry {
                url: url.into(),
                tx_hash: B256::ZERO,
                block_number: self.block_number,
                registered_at: Utc::now(),
            },
        );
    }

    /// When set, receipt lookups return `null` forever.
    pub fn set_withhold_receipts(&mut self, withhold: bool) {
        self.withhold_receipts = withhold;
    }

    pub fn record_method(&mut self, method: &str) {
        *self.method_counts.entry(method.to_string()).or_default() += 1;
    }

    pub fn method_count(&self, method: &str) -> u64 {
        self.method_counts.get(method).copied().unwrap_or(0)
    }

    /// Decode, validate, and mine a signed transaction.
    pub fn apply_raw_transaction(&mut self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let tx_hash = keccak256(raw);
        if self.mined.contains_key(&tx_hash) {
            return Err(LedgerError::AlreadyKnown);
        }

        let tx = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| LedgerError::Decode(e.to_string()))?;
        match tx.chain_id() {
            Some(id) if id == self.chain_id => {}
            actual => {
                return Err(LedgerError::WrongChain {
                    expected: self.chain_id,
                    actual,
                });
            }
        }
        let from = tx
            .recover_signer()
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;

        let mut sender = self.account(from);
        if tx.nonce() < sender.nonce {
            return Err(LedgerError::NonceTooLow {
                expected: sender.nonce,
                actual: tx.nonce(),
            });
        }
        if tx.nonce() > sender.nonce {
            return Err(LedgerError::NonceTooHigh {
                expected: sender.nonce,
                actual: tx.nonce(),
            });
        }

        let gas_used = gas_for(tx.input());
        if tx.gas_limit() < gas_used {
            return Err(LedgerError::IntrinsicGasTooLow {
                limit: tx.gas_limit(),
                required: gas_used,
            });
        }

        let price = tx.gas_price().unwrap_or_else(|| tx.max_fee_per_gas());
        let value = tx.value().saturating_to::<u128>();
        let max_cost = price
            .saturating_mul(u128::from(tx.gas_limit()))
            .saturating_add(value);
        if sender.balance < max_cost {
            return Err(LedgerError::InsufficientFunds {
                balance: sender.balance,
                cost: max_cost,
            });
        }

        sender.nonce += 1;
        sender.balance -= price.saturating_mul(u128::from(gas_used)) + value;
        self.accounts.insert(from, sender);
        self.block_number += 1;

        let to = tx.to();
        let success = match to {
            Some(contract) => {
                if value > 0 {
                    let mut recipient = self.account(contract);
                    recipient.balance = recipient.balance.saturating_add(value);
                    self.accounts.insert(contract, recipient);
                }
                self.execute(contract, from, tx.input(), tx_hash)
            }
            None => true,
        };

        debug!(tx_hash = %format!("{tx_hash:#x}"), from = %format!("{from:#x}"), success, "Mined transaction");
        self.mined.insert(
            tx_hash,
            MinedTx {
                from,
                to,
                block_number: self.block_number,
                gas_used,
                success,
            },
        );
        Ok(tx_hash)
    }

    /// Run a state-changing call. Returns false on revert.
    fn execute(&mut self, contract: Address, from: Address, input: &[u8], tx_hash: TxHash) -> bool {
        match RegisterCall::decode(input) {
            Ok(Some(call)) if !call.url.is_empty() => {
                info!(
                    agent = %format!("{from:#x}"),
                    registry = %format!("{contract:#x}"),
                    url = %call.url,
                    "Registered agent URL"
                );
                self.registry.insert(
                    (contract, from),
                    RegistryEntry {
                        url: call.url,
                        tx_hash,
                        block_number: self.block_number,
                        registered_at: Utc::now(),
                    },
                );
                true
            }
            Ok(Some(_)) => {
                debug!("register() with empty URL reverted");
                false
            }
            Err(e) => {
                debug!("register() payload undecodable, reverted: {}", e);
                false
            }
            // Plain transfers and unknown selectors succeed without effect.
            Ok(None) => true,
        }
    }

    /// Read-only call against `contract`.
    pub fn call(&self, contract: Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        match GetAgentUrlCall::decode(data) {
            Ok(Some(call)) => {
                let url = self
                    .registration(contract, call.agent)
                    .map(|e| e.url.as_str())
                    .unwrap_or("");
                Ok(GetAgentUrlCall::encode_return(url))
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(LedgerError::Reverted(e.to_string())),
        }
    }

    /// Gas a transaction with this input would use. Reverts are reported
    /// the way a node reports them for `eth_estimateGas`.
    pub fn estimate_gas(&self, data: &[u8]) -> Result<u64, LedgerError> {
        match RegisterCall::decode(data) {
            Ok(Some(call)) if call.url.is_empty() => {
                Err(LedgerError::Reverted("empty URL".to_string()))
            }
            Err(e) => Err(LedgerError::Reverted(e.to_string())),
            _ => Ok(gas_for(data)),
        }
    }

    /// Receipt in wire form, or `None` if unknown or withheld.
    pub fn receipt(&self, tx_hash: TxHash) -> Option<RpcReceipt> {
        if self.withhold_receipts {
            return None;
        }
        let mined = self.mined.get(&tx_hash)?;
        Some(RpcReceipt {
            transaction_hash: format!("{tx_hash:#x}"),
            transaction_index: Some(format_quantity(0)),
            block_hash: Some(format!("{:#x}", block_hash(mined.block_number))),
            block_number: Some(format_quantity(mined.block_number.into())),
            from: Some(format!("{:#x}", mined.from)),
            to: mined.to.map(|to| format!("{to:#x}")),
            gas_used: Some(format_quantity(mined.gas_used.into())),
            cumulative_gas_used: Some(format_quantity(mined.gas_used.into())),
            contract_address: None,
            logs: Vec::new(),
            status: Some(format_quantity(u128::from(mined.success))),
        })
    }
}

fn block_hash(number: u64) -> B256 {
    keccak256(number.to_be_bytes())
}

/// Intrinsic gas plus storage for a `register` payload.
fn gas_for(input: &[u8]) -> u64 {
    let calldata: u64 = input
        .iter()
        .map(|b| if *b == 0 { ZERO_BYTE_GAS } else { NONZERO_BYTE_GAS })
        .sum();
    let storage = match RegisterCall::decode(input) {
        Ok(Some(call)) => STORAGE_SLOT_GAS * (1 + call.url.len().div_ceil(32) as u64),
        _ => 0,
    };
    TX_BASE_GAS + calldata + storage
}
