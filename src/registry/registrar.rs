//! Registration protocol.
//!
//! One attempt walks:
//!
//! ```text
//! START -> CHECK_EXISTING -> ALREADY_REGISTERED -> DONE
//!                         -> NOT_REGISTERED -> BUILD_TX -> SIGN -> SUBMIT -> WAIT_CONFIRM
//!                                                                   -> CONFIRMED -> DONE
//!                                                                   -> TIMEOUT | REJECTED -> FAILED
//! ```
//!
//! The registry is queried fresh on every attempt; nothing about the
//! registration is cached locally. Transient RPC errors are retried a
//! bounded number of times in SUBMIT and WAIT_CONFIRM only. Re-sending the
//! same signed bytes is safe because the hash and nonce are fixed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, B256, Bytes, TxKind, U256, keccak256};
use tracing::{debug, info, warn};

use crate::chain::{BlockTag, ChainClient, RpcError, TxHash, TxParams};
use crate::identity::wallet::{SigningKey, address_hex};

use super::abi::{GetAgentUrlCall, RegisterCall};
use super::error::{Phase, RegistrationError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;
pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 3;

/// Gas limit used when `eth_estimateGas` fails (gasless RPCs, strict nodes).
pub const FALLBACK_GAS_LIMIT: u64 = 200_000;

/// Gas price used when `eth_gasPrice` fails: 1 gwei.
pub const FALLBACK_GAS_PRICE: u128 = 1_000_000_000;

/// Hash reported for simulated registrations.
pub const MOCK_TX_HASH: TxHash = B256::ZERO;

/// Per-attempt settings, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct RegistrarOptions {
    /// Registry contract address.
    pub registry: Address,
    /// URL to publish for this agent.
    pub external_url: String,
    /// If set, the node's chain id must match.
    pub expected_chain_id: Option<u64>,
    /// Sign but do not submit; report a simulated success.
    pub mock: bool,
    /// Replace an existing registration that points at a different URL.
    pub allow_url_update: bool,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_transient_retries: u32,
}

impl RegistrarOptions {
    pub fn new(registry: Address, external_url: impl Into<String>) -> Self {
        Self {
            registry,
            external_url: external_url.into(),
            expected_chain_id: None,
            mock: false,
            allow_url_update: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
        }
    }
}

/// Terminal result of one attempt.
#[derive(Debug)]
pub enum RegistrationOutcome {
    Registered { tx_hash: TxHash },
    AlreadyRegistered,
    Failed(RegistrationError),
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered { .. })
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            RegistrationOutcome::Registered { tx_hash } => Some(*tx_hash),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RegistrationError> {
        match self {
            RegistrationOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationOutcome::Registered { tx_hash } => write!(f, "registered ({tx_hash:#x})"),
            RegistrationOutcome::AlreadyRegistered => write!(f, "already registered"),
            RegistrationOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// What the registry currently holds for our address.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Existing {
    Matches,
    Absent,
    Different(String),
}

/// A signed registration ready to broadcast.
struct SignedRegistration {
    raw: Vec<u8>,
    tx_hash: TxHash,
}

/// Drives registration attempts against a [`ChainClient`].
pub struct Registrar<C> {
    client: C,
    options: RegistrarOptions,
    in_flight: AtomicBool,
}

impl<C: ChainClient> Registrar<C> {
    pub fn new(client: C, options: RegistrarOptions) -> Self {
        Self {
            client,
            options,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one registration attempt for `key`.
    ///
    /// Never panics or returns early with an error: every failure becomes
    /// [`RegistrationOutcome::Failed`]. A second call while one is still
    /// running fails with [`RegistrationError::AttemptInProgress`]. Across
    /// instances, BUILD_TX refuses to sign while the address still has
    /// unconfirmed transactions.
    pub async fn register(&self, key: &SigningKey) -> RegistrationOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return RegistrationOutcome::Failed(RegistrationError::AttemptInProgress);
        };
        match self.run(key).await {
            Ok(outcome) => outcome,
            Err(e) => RegistrationOutcome::Failed(e),
        }
    }

    async fn run(&self, key: &SigningKey) -> Result<RegistrationOutcome, RegistrationError> {
        let address = key.address();
        let url = self.options.external_url.as_str();

        let chain_id = self.check_chain().await?;
        match self.check_existing(address).await? {
            Existing::Matches => {
                debug!(address = %address_hex(&address), url, "Registry already holds this URL");
                return Ok(RegistrationOutcome::AlreadyRegistered);
            }
            Existing::Different(registered) if !self.options.allow_url_update => {
                return Err(RegistrationError::UrlConflict {
                    registered,
                    configured: url.to_string(),
                });
            }
            Existing::Different(registered) => {
                info!(from = %registered, to = url, "Updating registered agent URL");
            }
            Existing::Absent => {}
        }

        let tx = self.build_tx(address, chain_id).await?;
        let signed = sign(tx, key)?;

        if self.options.mock {
            info!("[MOCK] Registering agent URL: {}", url);
            info!("[MOCK] Wallet address: {}", address_hex(&address));
            debug!(tx_hash = %format!("{:#x}", signed.tx_hash), "[MOCK] Signed transaction not submitted");
            return Ok(RegistrationOutcome::Registered {
                tx_hash: MOCK_TX_HASH,
            });
        }

        info!("Sending registration transaction for {}...", url);
        let tx_hash = self.submit(&signed).await?;
        info!(tx_hash = %format!("{tx_hash:#x}"), "Registration transaction sent");

        self.wait_confirm(tx_hash).await
    }

    async fn check_chain(&self) -> Result<u64, RegistrationError> {
        let actual = self
            .client
            .get_chain_id()
            .await
            .map_err(RegistrationError::rpc(Phase::CheckExisting))?;
        match self.options.expected_chain_id {
            Some(expected) if expected != actual => {
                Err(RegistrationError::ChainIdMismatch { expected, actual })
            }
            _ => Ok(actual),
        }
    }

    async fn check_existing(&self, address: Address) -> Result<Existing, RegistrationError> {
        let registered = lookup_registration(&self.client, self.options.registry, address).await?;
        Ok(match registered {
            Some(url) if url == self.options.external_url => Existing::Matches,
            Some(url) => Existing::Different(url),
            None => Existing::Absent,
        })
    }

    async fn build_tx(&self, from: Address, chain_id: u64) -> Result<TxLegacy, RegistrationError> {
        let input = RegisterCall::new(self.options.external_url.clone()).encode();

        // A gap between mined and pending nonces means an earlier attempt's
        // transaction is still in the mempool. Sending another would queue a
        // second registration behind it.
        let confirmed = self
            .client
            .get_transaction_count(from, BlockTag::Latest)
            .await
            .map_err(RegistrationError::rpc(Phase::BuildTx))?;
        let pending = self
            .client
            .get_transaction_count(from, BlockTag::Pending)
            .await
            .map_err(RegistrationError::rpc(Phase::BuildTx))?;
        if pending > confirmed {
            return Err(RegistrationError::PendingTransaction { confirmed, pending });
        }
        let nonce = pending;

        let gas_price = match self.client.gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!("Gas price query failed: {}. Using {} wei", e, FALLBACK_GAS_PRICE);
                FALLBACK_GAS_PRICE
            }
        };

        let params = TxParams::call(Some(from), self.options.registry, &input);
        let gas_limit = with_buffer(self.client.estimate_gas_or(&params, FALLBACK_GAS_LIMIT).await);

        debug!(nonce, gas_price, gas_limit, chain_id, "Built registration transaction");
        Ok(TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(self.options.registry),
            value: U256::ZERO,
            input: Bytes::from(input),
        })
    }

    async fn submit(&self, signed: &SignedRegistration) -> Result<TxHash, RegistrationError> {
        let mut retries = 0;
        loop {
            match self.client.send_raw_transaction(&signed.raw).await {
                Ok(tx_hash) => {
                    if tx_hash != signed.tx_hash {
                        warn!(
                            node = %format!("{tx_hash:#x}"),
                            local = %format!("{:#x}", signed.tx_hash),
                            "Node reported a different transaction hash"
                        );
                    }
                    return Ok(tx_hash);
                }
                // An earlier send may have landed before its reply was lost.
                Err(e) if retries > 0 && is_already_known(&e) => return Ok(signed.tx_hash),
                Err(e) if e.is_transient() && retries < self.options.max_transient_retries => {
                    retries += 1;
                    warn!(attempt = retries, "Transient error submitting transaction: {}", e);
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                Err(e) => return Err(RegistrationError::rpc(Phase::Submit)(e)),
            }
        }
    }

    async fn wait_confirm(&self, tx_hash: TxHash) -> Result<RegistrationOutcome, RegistrationError> {
        let max = self.options.max_poll_attempts;
        let mut transient_failures = 0;

        for attempt in 1..=max {
            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    info!(
                        tx_hash = %format!("{tx_hash:#x}"),
                        block = ?receipt.block_number,
                        "Successfully registered agent URL on-chain"
                    );
                    return Ok(RegistrationOutcome::Registered { tx_hash });
                }
                Ok(Some(_)) => return Err(RegistrationError::Rejected { tx_hash }),
                Ok(None) => debug!(attempt, max, "Receipt not available yet"),
                Err(e)
                    if e.is_transient() && transient_failures < self.options.max_transient_retries =>
                {
                    transient_failures += 1;
                    warn!(attempt, "Transient error polling receipt: {}", e);
                }
                Err(e) => return Err(RegistrationError::rpc(Phase::WaitConfirm)(e)),
            }
            if attempt < max {
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }

        Err(RegistrationError::Timeout {
            tx_hash,
            attempts: max,
        })
    }
}

/// URL currently registered for `agent`, if any.
pub async fn lookup_registration<C: ChainClient + ?Sized>(
    client: &C,
    registry: Address,
    agent: Address,
) -> Result<Option<String>, RegistrationError> {
    let data = GetAgentUrlCall::new(agent).encode();
    let returned = client
        .call(registry, &data)
        .await
        .map_err(RegistrationError::rpc(Phase::CheckExisting))?;
    Ok(GetAgentUrlCall::decode_return(&returned)?)
}

fn sign(tx: TxLegacy, key: &SigningKey) -> Result<SignedRegistration, RegistrationError> {
    let signature = key.sign_hash(&tx.signature_hash())?;
    let envelope = TxEnvelope::Legacy(tx.into_signed(signature));
    let raw = envelope.encoded_2718();
    let tx_hash = keccak256(&raw);
    Ok(SignedRegistration { raw, tx_hash })
}

/// Estimate plus 20%.
fn with_buffer(gas: u64) -> u64 {
    gas.saturating_add(gas / 5)
}

fn is_already_known(e: &RpcError) -> bool {
    let msg = e.message.to_lowercase();
    msg.contains("already known") || msg.contains("known transaction")
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use alloy::consensus::Transaction;
    use alloy::eips::eip2718::Decodable2718;
    use async_trait::async_trait;

    use super::*;
    use crate::chain::Receipt;
    use crate::chain::error::TRANSPORT_ERROR_CODE;

    const REGISTRY: Address = Address::new([0x11; 20]);
    const URL: &str = "https://agent.example";

    /// When (if ever) the fake chain hands out a receipt.
    #[derive(Clone, Copy)]
    enum ReceiptMode {
        OnPoll(u32, bool),
        Never,
    }

    struct FakeState {
        chain_id: u64,
        registry: HashMap<Address, String>,
        sent: Vec<Vec<u8>>,
        mined: u64,
        receipt_polls: u32,
        receipt_mode: ReceiptMode,
        submit_errors: VecDeque<RpcError>,
        receipt_errors: VecDeque<RpcError>,
        estimate_fails: bool,
    }

    /// Clones share state, like two processes talking to one node.
    #[derive(Clone)]
    struct FakeChain(Arc<Mutex<FakeState>>);

    impl FakeChain {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(FakeState {
                chain_id: 1337,
                registry: HashMap::new(),
                sent: Vec::new(),
                mined: 0,
                receipt_polls: 0,
                receipt_mode: ReceiptMode::OnPoll(1, true),
                submit_errors: VecDeque::new(),
                receipt_errors: VecDeque::new(),
                estimate_fails: false,
            })))
        }

        fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
            f(&mut self.0.lock().unwrap())
        }
    }

    impl FakeState {
        /// Retries resend identical bytes, so count distinct transactions.
        fn pending_nonce(&self) -> u64 {
            let mut distinct: Vec<&Vec<u8>> = self.sent.iter().collect();
            distinct.dedup();
            distinct.len() as u64
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn get_chain_id(&self) -> Result<u64, RpcError> {
            Ok(self.with(|s| s.chain_id))
        }

        async fn get_transaction_count(
            &self,
            _address: Address,
            block: BlockTag,
        ) -> Result<u64, RpcError> {
            Ok(self.with(|s| match block {
                BlockTag::Latest => s.mined,
                BlockTag::Pending => s.pending_nonce(),
            }))
        }

        async fn gas_price(&self) -> Result<u128, RpcError> {
            Ok(7)
        }

        async fn estimate_gas(&self, _tx: &TxParams) -> Result<u64, RpcError> {
            if self.with(|s| s.estimate_fails) {
                Err(RpcError::terminal(3, "execution reverted"))
            } else {
                Ok(50_000)
            }
        }

        async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError> {
            self.with(|s| {
                s.sent.push(raw.to_vec());
                match s.submit_errors.pop_front() {
                    Some(e) => Err(e),
                    None => Ok(keccak256(raw)),
                }
            })
        }

        async fn get_transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, RpcError> {
            self.with(|s| {
                s.receipt_polls += 1;
                if let Some(e) = s.receipt_errors.pop_front() {
                    return Err(e);
                }
                match s.receipt_mode {
                    ReceiptMode::OnPoll(n, success) if s.receipt_polls >= n => {
                        s.mined = s.pending_nonce();
                        Ok(Some(Receipt {
                            transaction_hash: tx_hash,
                            block_number: Some(1),
                            gas_used: Some(21_000),
                            success,
                        }))
                    }
                    _ => Ok(None),
                }
            })
        }

        async fn call(&self, _to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
            let call = GetAgentUrlCall::decode(data).unwrap().unwrap();
            Ok(self.with(|s| {
                s.registry
                    .get(&call.agent)
                    .map(|url| GetAgentUrlCall::encode_return(url))
                    .unwrap_or_default()
            }))
        }
    }

    fn options() -> RegistrarOptions {
        let mut opts = RegistrarOptions::new(REGISTRY, URL);
        opts.poll_interval = Duration::from_millis(1);
        opts.max_poll_attempts = 5;
        opts
    }

    fn decode_sent(raw: &[u8]) -> TxEnvelope {
        TxEnvelope::decode_2718(&mut &raw[..]).unwrap()
    }

    #[tokio::test]
    async fn registers_when_absent() {
        let key = SigningKey::random();
        let registrar = Registrar::new(FakeChain::new(), options());

        let outcome = registrar.register(&key).await;
        let sent = registrar.client.with(|s| s.sent.clone());
        assert_eq!(sent.len(), 1);
        assert_eq!(outcome.tx_hash(), Some(keccak256(&sent[0])));

        let tx = decode_sent(&sent[0]);
        assert_eq!(tx.to(), Some(REGISTRY));
        assert_eq!(tx.chain_id(), Some(1337));
        assert_eq!(tx.nonce(), 0);
        assert_eq!(tx.gas_limit(), 60_000);
        assert_eq!(
            RegisterCall::decode(tx.input()).unwrap(),
            Some(RegisterCall::new(URL))
        );
    }

    #[tokio::test]
    async fn already_registered_sends_nothing() {
        let key = SigningKey::random();
        let chain = FakeChain::new();
        chain.with(|s| s.registry.insert(key.address(), URL.to_string()));
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&key).await;
        assert!(matches!(outcome, RegistrationOutcome::AlreadyRegistered));
        assert!(registrar.client.with(|s| s.sent.is_empty()));
    }

    #[tokio::test]
    async fn different_url_is_conflict_by_default() {
        let key = SigningKey::random();
        let chain = FakeChain::new();
        chain.with(|s| s.registry.insert(key.address(), "https://old.example".to_string()));
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&key).await;
        let err = outcome.error().unwrap();
        assert!(matches!(err, RegistrationError::UrlConflict { .. }));
        assert!(err.is_skippable());
        assert!(registrar.client.with(|s| s.sent.is_empty()));
    }

    #[tokio::test]
    async fn different_url_is_replaced_when_allowed() {
        let key = SigningKey::random();
        let chain = FakeChain::new();
        chain.with(|s| s.registry.insert(key.address(), "https://old.example".to_string()));
        let mut opts = options();
        opts.allow_url_update = true;
        let registrar = Registrar::new(chain, opts);

        assert!(registrar.register(&key).await.is_registered());
        assert_eq!(registrar.client.with(|s| s.sent.len()), 1);
    }

    #[tokio::test]
    async fn times_out_after_exact_poll_count() {
        let chain = FakeChain::new();
        chain.with(|s| s.receipt_mode = ReceiptMode::Never);
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&SigningKey::random()).await;
        match outcome.error() {
            Some(RegistrationError::Timeout { attempts, .. }) => assert_eq!(*attempts, 5),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(registrar.client.with(|s| s.receipt_polls), 5);
    }

    #[tokio::test]
    async fn unconfirmed_transaction_blocks_a_fresh_registrar() {
        let key = SigningKey::random();
        let chain = FakeChain::new();
        chain.with(|s| s.receipt_mode = ReceiptMode::Never);

        let first = Registrar::new(chain.clone(), options());
        assert!(first.register(&key).await.error().is_some_and(|e| e.is_timeout()));

        // Restarted agent, same key, first transaction still in the mempool.
        let second = Registrar::new(chain.clone(), options());
        let outcome = second.register(&key).await;
        let err = outcome.error().unwrap();
        assert!(matches!(
            err,
            RegistrationError::PendingTransaction {
                confirmed: 0,
                pending: 1
            }
        ));
        assert!(err.is_skippable());
        assert_eq!(chain.with(|s| s.sent.len()), 1);

        // Once it is mined the registry answers and nothing new is sent.
        chain.with(|s| {
            s.mined = 1;
            s.registry.insert(key.address(), URL.to_string());
        });
        let third = Registrar::new(chain.clone(), options());
        assert!(matches!(
            third.register(&key).await,
            RegistrationOutcome::AlreadyRegistered
        ));
        assert_eq!(chain.with(|s| s.sent.len()), 1);
    }

    #[tokio::test]
    async fn late_receipt_is_picked_up() {
        let chain = FakeChain::new();
        chain.with(|s| s.receipt_mode = ReceiptMode::OnPoll(3, true));
        let registrar = Registrar::new(chain, options());

        assert!(registrar.register(&SigningKey::random()).await.is_registered());
        assert_eq!(registrar.client.with(|s| s.receipt_polls), 3);
    }

    #[tokio::test]
    async fn reverted_receipt_is_rejected() {
        let chain = FakeChain::new();
        chain.with(|s| s.receipt_mode = ReceiptMode::OnPoll(1, false));
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&SigningKey::random()).await;
        assert!(matches!(
            outcome.error(),
            Some(RegistrationError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn transient_submit_error_is_retried() {
        let chain = FakeChain::new();
        chain.with(|s| {
            s.submit_errors
                .push_back(RpcError::transient(TRANSPORT_ERROR_CODE, "connection reset"))
        });
        let registrar = Registrar::new(chain, options());

        assert!(registrar.register(&SigningKey::random()).await.is_registered());
        let sent = registrar.client.with(|s| s.sent.clone());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1], "retry must resend identical bytes");
    }

    #[tokio::test]
    async fn already_known_after_retry_counts_as_submitted() {
        let chain = FakeChain::new();
        chain.with(|s| {
            s.submit_errors
                .push_back(RpcError::transient(TRANSPORT_ERROR_CODE, "timed out"));
            s.submit_errors
                .push_back(RpcError::terminal(-32000, "already known"));
        });
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&SigningKey::random()).await;
        let sent = registrar.client.with(|s| s.sent.clone());
        assert_eq!(outcome.tx_hash(), Some(keccak256(&sent[0])));
    }

    #[tokio::test]
    async fn terminal_submit_error_is_not_retried() {
        let chain = FakeChain::new();
        chain.with(|s| {
            s.submit_errors
                .push_back(RpcError::terminal(-32000, "nonce too low"))
        });
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&SigningKey::random()).await;
        assert!(matches!(
            outcome.error(),
            Some(RegistrationError::Rpc {
                phase: Phase::Submit,
                ..
            })
        ));
        assert_eq!(registrar.client.with(|s| s.sent.len()), 1);
    }

    #[tokio::test]
    async fn transient_receipt_errors_are_bounded() {
        let chain = FakeChain::new();
        chain.with(|s| {
            s.receipt_mode = ReceiptMode::Never;
            for _ in 0..4 {
                s.receipt_errors
                    .push_back(RpcError::transient(TRANSPORT_ERROR_CODE, "refused"));
            }
        });
        let registrar = Registrar::new(chain, options());

        let outcome = registrar.register(&SigningKey::random()).await;
        assert!(matches!(
            outcome.error(),
            Some(RegistrationError::Rpc {
                phase: Phase::WaitConfirm,
                ..
            })
        ));
        assert_eq!(registrar.client.with(|s| s.receipt_polls), 4);
    }

    #[tokio::test]
    async fn chain_id_mismatch_aborts() {
        let mut opts = options();
        opts.expected_chain_id = Some(1);
        let registrar = Registrar::new(FakeChain::new(), opts);

        let outcome = registrar.register(&SigningKey::random()).await;
        assert!(matches!(
            outcome.error(),
            Some(RegistrationError::ChainIdMismatch {
                expected: 1,
                actual: 1337
            })
        ));
        assert!(registrar.client.with(|s| s.sent.is_empty()));
    }

    #[tokio::test]
    async fn mock_mode_never_submits() {
        let mut opts = options();
        opts.mock = true;
        let registrar = Registrar::new(FakeChain::new(), opts);

        let outcome = registrar.register(&SigningKey::random()).await;
        assert_eq!(outcome.tx_hash(), Some(MOCK_TX_HASH));
        assert!(registrar.client.with(|s| s.sent.is_empty()));
        assert_eq!(registrar.client.with(|s| s.receipt_polls), 0);
    }

    #[tokio::test]
    async fn failed_estimate_uses_fallback_gas() {
        let chain = FakeChain::new();
        chain.with(|s| s.estimate_fails = true);
        let registrar = Registrar::new(chain, options());

        assert!(registrar.register(&SigningKey::random()).await.is_registered());
        let sent = registrar.client.with(|s| s.sent.clone());
        assert_eq!(decode_sent(&sent[0]).gas_limit(), with_buffer(FALLBACK_GAS_LIMIT));
    }

    #[test]
    fn in_flight_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = InFlightGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(InFlightGuard::acquire(&flag).is_none());
        drop(first);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}
