//! Registration failure taxonomy.

use std::fmt;

use crate::chain::{RpcError, TxHash};
use crate::config::ConfigurationError;
use crate::identity::custody::KeyResolutionError;
use crate::identity::wallet::WalletError;

use super::abi::AbiError;

/// Step of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CheckExisting,
    BuildTx,
    Sign,
    Submit,
    WaitConfirm,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CheckExisting => "CHECK_EXISTING",
            Phase::BuildTx => "BUILD_TX",
            Phase::Sign => "SIGN",
            Phase::Submit => "SUBMIT",
            Phase::WaitConfirm => "WAIT_CONFIRM",
        };
        f.write_str(name)
    }
}

/// Why a registration attempt did not complete.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    KeyResolution(#[from] KeyResolutionError),

    #[error("RPC failure during {phase}: {source}")]
    Rpc {
        phase: Phase,
        #[source]
        source: RpcError,
    },

    #[error("chain id mismatch: configured {expected}, node reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("registry returned malformed data: {0}")]
    Abi(#[from] AbiError),

    #[error("signing failed: {0}")]
    Signing(#[from] WalletError),

    #[error("registration transaction {tx_hash:#x} was reverted")]
    Rejected { tx_hash: TxHash },

    #[error("no receipt for {tx_hash:#x} after {attempts} polls")]
    Timeout { tx_hash: TxHash, attempts: u32 },

    #[error("address is registered with '{registered}', not '{configured}'; URL updates are disabled")]
    UrlConflict {
        registered: String,
        configured: String,
    },

    #[error("a registration attempt is already in flight")]
    AttemptInProgress,

    #[error("earlier transactions from this address are unconfirmed (mined nonce {confirmed}, pending nonce {pending})")]
    PendingTransaction { confirmed: u64, pending: u64 },

    #[error("registration task ended without a result: {0}")]
    Abandoned(String),
}

impl RegistrationError {
    pub(crate) fn rpc(phase: Phase) -> impl FnOnce(RpcError) -> Self {
        move |source| RegistrationError::Rpc { phase, source }
    }

    /// Failures that leave nothing wrong on-chain and need no operator
    /// action beyond a configuration decision. Logged as warnings.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            RegistrationError::UrlConflict { .. }
                | RegistrationError::AttemptInProgress
                | RegistrationError::PendingTransaction { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RegistrationError::Timeout { .. })
    }
}
