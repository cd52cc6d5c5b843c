//! Registration trigger: the boundary between the host agent and the
//! registration protocol.
//!
//! [`RegistrationTrigger::schedule`] returns as soon as the attempt is
//! handed to a background task. Nothing it spawns can fail the caller:
//! every outcome, including configuration and key errors, is logged here
//! and delivered through the returned [`RegistrationTask`] for callers that
//! want it.
//!
//! Cancellation is best effort. Aborting (or shutting down the runtime)
//! stops polling, but a transaction that was already broadcast stays on
//! chain. The next attempt finds it through the registry lookup.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::chain::HttpChainClient;
use crate::config::RegistrationConfig;
use crate::identity::custody::resolve_key;
use crate::identity::wallet::address_hex;

use super::error::{Phase, RegistrationError};
use super::registrar::{Registrar, RegistrationOutcome};

/// Schedules at most one registration attempt per instance.
///
/// Owned by the host agent; a re-initialization that reuses the same
/// trigger never spawns a second attempt.
#[derive(Debug, Default)]
pub struct RegistrationTrigger {
    scheduled: AtomicBool,
}

impl RegistrationTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an attempt has been scheduled by this trigger.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Start the registration attempt in the background.
    ///
    /// Returns `None` when registration is disabled or an attempt was
    /// already scheduled. Never blocks on the network or the filesystem.
    /// Works both inside a tokio runtime (spawns a task) and outside one
    /// (spawns a thread with its own runtime).
    pub fn schedule(&self, config: RegistrationConfig) -> Option<RegistrationTask> {
        if !config.enable_registration {
            debug!("On-chain registration disabled");
            return None;
        }
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Registration already scheduled for this agent instance");
            return None;
        }
        Some(RegistrationTask::spawn(config))
    }
}

/// Handle to a background registration attempt.
///
/// Dropping the handle detaches the attempt; it keeps running and still
/// logs its outcome.
#[derive(Debug)]
pub struct RegistrationTask {
    outcome: oneshot::Receiver<RegistrationOutcome>,
    cancel: Option<oneshot::Sender<()>>,
}

impl RegistrationTask {
    fn spawn(config: RegistrationConfig) -> Self {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        let work = async move {
            // A dropped sender means "detached", not "cancelled".
            let cancelled = async move {
                if cancel_rx.await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let outcome = tokio::select! {
                outcome = run_attempt(config) => outcome,
                () = cancelled => {
                    warn!("Registration attempt cancelled; any submitted transaction is left on chain");
                    RegistrationOutcome::Failed(RegistrationError::Abandoned("cancelled".to_string()))
                }
            };
            let _ = outcome_tx.send(outcome);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(work);
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("agent-registration".to_string())
                    .spawn(move || {
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(rt) => rt.block_on(work),
                            Err(e) => error!("Failed to start registration runtime: {}", e),
                        }
                    });
                if let Err(e) = spawned {
                    error!("Failed to spawn registration thread: {}", e);
                }
            }
        }

        Self {
            outcome: outcome_rx,
            cancel: Some(cancel_tx),
        }
    }

    /// Wait for the attempt to finish.
    pub async fn outcome(self) -> RegistrationOutcome {
        self.outcome.await.unwrap_or_else(|_| abandoned())
    }

    /// Wait without giving up the handle, so the attempt can still be
    /// aborted if this future is dropped. Call at most once.
    pub async fn wait(&mut self) -> RegistrationOutcome {
        (&mut self.outcome).await.unwrap_or_else(|_| abandoned())
    }

    /// Wait for the attempt from synchronous code. Must not be called from
    /// inside an async context.
    pub fn blocking_outcome(self) -> RegistrationOutcome {
        self.outcome.blocking_recv().unwrap_or_else(|_| abandoned())
    }

    /// Stop the attempt at its next await point. Does not roll back a
    /// transaction that was already submitted.
    pub fn abort(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

fn abandoned() -> RegistrationOutcome {
    RegistrationOutcome::Failed(RegistrationError::Abandoned(
        "registration task stopped before reporting".to_string(),
    ))
}

/// Run one full attempt in the current task and log its outcome.
pub async fn run_attempt(config: RegistrationConfig) -> RegistrationOutcome {
    let outcome = match attempt(config).await {
        Ok(outcome) => outcome,
        Err(e) => RegistrationOutcome::Failed(e),
    };
    report(&outcome);
    outcome
}

async fn attempt(config: RegistrationConfig) -> Result<RegistrationOutcome, RegistrationError> {
    let options = config.registrar_options()?;
    let rpc_url = config.rpc_url()?.to_string();

    let custody = config.custody_config();
    let resolved = tokio::task::spawn_blocking(move || resolve_key(&custody))
        .await
        .map_err(|e| RegistrationError::Abandoned(format!("key resolution task failed: {e}")))??;
    info!(
        address = %address_hex(&resolved.key.address()),
        source = %resolved.origin,
        "Wallet ready for registration"
    );

    let client = HttpChainClient::with_timeout(rpc_url, config.rpc_timeout)
        .map_err(RegistrationError::rpc(Phase::CheckExisting))?;
    let registrar = Registrar::new(client, options);
    Ok(registrar.register(&resolved.key).await)
}

fn report(outcome: &RegistrationOutcome) {
    match outcome {
        RegistrationOutcome::Registered { tx_hash } => {
            info!(tx_hash = %format!("{tx_hash:#x}"), "Agent registration complete");
        }
        RegistrationOutcome::AlreadyRegistered => {
            warn!("Agent URL already registered for this address; skipping registration");
        }
        RegistrationOutcome::Failed(e) if e.is_skippable() => {
            warn!("Skipping registration: {}", e);
        }
        RegistrationOutcome::Failed(e) => {
            error!("Failed to register agent: {}", e);
            if e.is_timeout() {
                info!("The transaction may still be mined; the next attempt will find it");
            }
        }
    }
}
