//! Call data for the two registry functions this crate uses.
//!
//! ```solidity
//! function register(string url) external;
//! function getAgentUrl(address agent) external view returns (string url);
//! ```
//!
//! Encoding follows the Solidity ABI: 4-byte selector, then 32-byte words.
//! A single dynamic `string` is laid out as offset (0x20), length, then the
//! UTF-8 bytes right-padded to a word boundary.

use alloy::primitives::{Address, keccak256};

const WORD: usize = 32;

pub const REGISTER_SIGNATURE: &str = "register(string)";
pub const GET_AGENT_URL_SIGNATURE: &str = "getAgentUrl(address)";

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `register(string url)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCall {
    pub url: String,
}

impl RegisterCall {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn selector() -> [u8; 4] {
        selector(REGISTER_SIGNATURE)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + 3 * WORD + self.url.len());
        data.extend_from_slice(&Self::selector());
        data.extend_from_slice(&encode_string(&self.url));
        data
    }

    /// Decode call data. `Ok(None)` means the selector is not `register`.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, AbiError> {
        match strip_selector(data, Self::selector()) {
            Some(args) => Ok(Some(Self {
                url: decode_string(args)?,
            })),
            None => Ok(None),
        }
    }
}

/// `getAgentUrl(address agent) returns (string)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetAgentUrlCall {
    pub agent: Address,
}

impl GetAgentUrlCall {
    pub fn new(agent: Address) -> Self {
        Self { agent }
    }

    pub fn selector() -> [u8; 4] {
        selector(GET_AGENT_URL_SIGNATURE)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + WORD);
        data.extend_from_slice(&Self::selector());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(self.agent.as_slice());
        data
    }

    /// Decode call data. `Ok(None)` means the selector is not `getAgentUrl`.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, AbiError> {
        let Some(args) = strip_selector(data, Self::selector()) else {
            return Ok(None);
        };
        if args.len() < WORD {
            return Err(AbiError::Truncated);
        }
        if args[..12].iter().any(|b| *b != 0) {
            return Err(AbiError::InvalidAddress);
        }
        Ok(Some(Self {
            agent: Address::from_slice(&args[12..WORD]),
        }))
    }

    /// Encode the return value. An empty string means "not registered".
    pub fn encode_return(url: &str) -> Vec<u8> {
        encode_string(url)
    }

    /// Decode the return value. Empty return data or an empty string both
    /// mean the address has no registration.
    pub fn decode_return(data: &[u8]) -> Result<Option<String>, AbiError> {
        if data.is_empty() {
            return Ok(None);
        }
        let url = decode_string(data)?;
        Ok(if url.is_empty() { None } else { Some(url) })
    }
}

fn strip_selector(data: &[u8], expected: [u8; 4]) -> Option<&[u8]> {
    data.strip_prefix(expected.as_slice())
}

fn encode_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn read_word(data: &[u8], at: usize) -> Result<usize, AbiError> {
    let end = at.checked_add(WORD).ok_or(AbiError::Overflow)?;
    let word = data.get(at..end).ok_or(AbiError::Truncated)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut be = [0u8; 8];
    be.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(be)).map_err(|_| AbiError::Overflow)
}

fn encode_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(2 * WORD + padded);
    out.extend_from_slice(&encode_word(WORD));
    out.extend_from_slice(&encode_word(bytes.len()));
    out.extend_from_slice(bytes);
    out.resize(2 * WORD + padded, 0);
    out
}

fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    let offset = read_word(data, 0)?;
    let len = read_word(data, offset)?;
    let start = offset.checked_add(WORD).ok_or(AbiError::Overflow)?;
    let end = start.checked_add(len).ok_or(AbiError::Overflow)?;
    let bytes = data.get(start..end).ok_or(AbiError::Truncated)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

/// Malformed ABI data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("ABI data is truncated")]
    Truncated,
    #[error("ABI integer does not fit in memory")]
    Overflow,
    #[error("ABI string is not valid UTF-8")]
    InvalidUtf8,
    #[error("ABI address word has non-zero padding")]
    InvalidAddress,
}
