//! Credential Reconciliation Engine
//!
//! Sets a new password for a directory user and repairs drift between the
//! user directory and the credential provider on the way.
//!
//! ## Protocol
//!
//! ```text
//! Start -> UpdateAttempted -> VerifyInitial --ok--> LinkCheck -> Done
//!                                   |
//!                                   +--miss--> Cleanup -> Register -> VerifyFinal -> LinkCheck
//! ```
//!
//! - The in-place update is never trusted; `VerifyInitial` is the source of truth
//! - A `VerifyInitial` miss (`success = false`) is an expected branch, not an error;
//!   an error answer from the provider is fatal and never triggers cleanup
//! - Every other failure aborts with a typed `ReconcileError`
//!
//! ## Concurrency
//!
//! Runs are serialized per entity id through [`EntityLocks`]. Cleanup and
//! registration are not atomic, so a run cut short between them can leave the
//! entity with no identity at all. The next admin reset repairs that.

mod locks;
mod state;

pub use locks::{EntityGuard, EntityLocks};
pub use state::{ReconcilePath, ReconcileState, ReconciliationReport};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::directory::UserDirectory;
use crate::error::{DirectoryError, ProviderError, ReconcileError};
use crate::provider::CredentialProvider;
use crate::types::{CredentialIdentity, IdentityFilter, Secret};

/// Reconciles a user's credential with the directory while setting a new password.
///
/// Stateless between runs; share one instance across requests.
pub struct ReconciliationEngine {
    directory: Arc<dyn UserDirectory>,
    provider: Arc<dyn CredentialProvider>,
    locks: EntityLocks,
    deadline: Option<Duration>,
}

/// Working data for one protocol run
struct Run<'a> {
    user_id: &'a str,
    secret: &'a Secret,
    started: Instant,
    entity_id: String,
    identity: Option<CredentialIdentity>,
    path: ReconcilePath,
    removed_identities: usize,
    link_repaired: bool,
    states: Vec<ReconcileState>,
    _guard: Option<EntityGuard>,
}

impl ReconciliationEngine {
    pub fn new(directory: Arc<dyn UserDirectory>, provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            directory,
            provider,
            locks: EntityLocks::new(),
            deadline: None,
        }
    }

    /// Share a lock table with other engines in this process
    pub fn with_locks(mut self, locks: EntityLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Bound the whole run, lock wait included
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set `new_secret` for `user_id`, repairing the credential if needed.
    ///
    /// The caller guarantees `new_secret` is non-empty.
    pub async fn reconcile_password(
        &self,
        user_id: &str,
        new_secret: &Secret,
    ) -> Result<CredentialIdentity, ReconcileError> {
        self.reconcile_password_with_report(user_id, new_secret)
            .await
            .map(|report| report.identity)
    }

    /// Same as [`reconcile_password`](Self::reconcile_password), with details of the run
    pub async fn reconcile_password_with_report(
        &self,
        user_id: &str,
        new_secret: &Secret,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let mut run = Run {
            user_id,
            secret: new_secret,
            started: Instant::now(),
            entity_id: String::new(),
            identity: None,
            path: ReconcilePath::AlreadyConsistent,
            removed_identities: 0,
            link_repaired: false,
            states: Vec::new(),
            _guard: None,
        };

        let mut state = ReconcileState::Start;
        loop {
            run.states.push(state);
            let next = match state {
                ReconcileState::Start => self.start(&mut run).await,
                ReconcileState::UpdateAttempted => self.attempt_update(&mut run).await,
                ReconcileState::VerifyInitial => self.verify_initial(&mut run).await,
                ReconcileState::Cleanup => self.cleanup(&mut run).await,
                ReconcileState::Register => self.register(&mut run).await,
                ReconcileState::VerifyFinal => self.verify_final(&mut run).await,
                ReconcileState::LinkCheck => self.link_check(&mut run).await,
                ReconcileState::Done => break,
            };

            state = match next {
                Ok(next) => {
                    debug!(entity_id = %run.entity_id, from = %state, to = %next, "Transition");
                    next
                }
                Err(err) => {
                    error!(
                        user_id = %user_id,
                        entity_id = %run.entity_id,
                        state = %err.failed_state(),
                        error = %err,
                        "Password reconciliation failed"
                    );
                    return Err(err);
                }
            };
        }

        let identity = match run.identity {
            Some(identity) => identity,
            // LinkCheck only moves to Done with an identity in hand
            None => {
                return Err(ReconcileError::FinalVerificationFailed {
                    entity_id: run.entity_id,
                })
            }
        };

        info!(
            user_id = %user_id,
            entity_id = %run.entity_id,
            identity_id = %identity.id,
            path = %run.path,
            link_repaired = run.link_repaired,
            elapsed_ms = run.started.elapsed().as_millis() as u64,
            "Password reconciled"
        );

        Ok(ReconciliationReport {
            user_id: user_id.to_string(),
            entity_id: run.entity_id,
            provider: self.provider.provider_name().to_string(),
            identity,
            path: run.path,
            removed_identities: run.removed_identities,
            link_repaired: run.link_repaired,
            states: run.states,
            completed_at: chrono::Utc::now(),
        })
    }

    /// Await `fut` within what is left of the run's deadline
    async fn bounded<F: Future>(
        &self,
        run: &Run<'_>,
        state: ReconcileState,
        fut: F,
    ) -> Result<F::Output, ReconcileError> {
        let Some(deadline) = self.deadline else {
            return Ok(fut.await);
        };

        match tokio::time::timeout_at(run.started + deadline, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                // Cleanup already ran but nothing has been registered yet
                let window_open = run.removed_identities > 0
                    && matches!(state, ReconcileState::Register);
                warn!(
                    entity_id = %run.entity_id,
                    state = %state,
                    cleanup_window_open = window_open,
                    "Reconciliation deadline exceeded"
                );
                Err(ReconcileError::DeadlineExceeded { state })
            }
        }
    }

    async fn start(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::Start;
        let user = self
            .bounded(run, state, self.directory.retrieve_user(run.user_id))
            .await?
            .map_err(|err| match err {
                DirectoryError::NotFound(_) => ReconcileError::UserNotFound {
                    user_id: run.user_id.to_string(),
                },
                source @ DirectoryError::Unavailable(_) => ReconcileError::DirectoryUnavailable {
                    user_id: run.user_id.to_string(),
                    source,
                },
                source @ DirectoryError::Rejected(_) => ReconcileError::DirectoryRejected {
                    user_id: run.user_id.to_string(),
                    source,
                },
            })?;

        run.entity_id = user.entity_id();

        let guard = self
            .bounded(run, state, self.locks.acquire(&run.entity_id))
            .await?;
        run._guard = Some(guard);

        info!(
            user_id = %run.user_id,
            entity_id = %run.entity_id,
            provider = %self.provider.provider_name(),
            "Starting password reconciliation"
        );
        Ok(ReconcileState::UpdateAttempted)
    }

    async fn attempt_update(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::UpdateAttempted;
        let result = self
            .bounded(
                run,
                state,
                self.provider.update_credential(&run.entity_id, run.secret),
            )
            .await?;

        // Not trusted either way; verification decides
        if let Err(err) = result {
            warn!(
                entity_id = %run.entity_id,
                error = %err,
                "In-place credential update failed, verifying anyway"
            );
        }
        Ok(ReconcileState::VerifyInitial)
    }

    async fn verify_initial(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::VerifyInitial;
        let outcome = self
            .bounded(
                run,
                state,
                self.provider.authenticate(&run.entity_id, run.secret),
            )
            .await?;

        let verified = match outcome {
            Ok(outcome) => outcome.into_verified(),
            Err(source) if source.is_transport() => {
                return Err(ReconcileError::ProviderUnavailable { state, source })
            }
            // Only an answered `success = false` may lead into cleanup
            Err(source) => return Err(ReconcileError::ProviderRejected { state, source }),
        };

        match verified {
            Some(identity) => {
                run.identity = Some(identity);
                Ok(ReconcileState::LinkCheck)
            }
            None => {
                info!(
                    entity_id = %run.entity_id,
                    "Existing credential did not verify, clearing and re-registering"
                );
                run.path = ReconcilePath::Reregistered;
                Ok(ReconcileState::Cleanup)
            }
        }
    }

    async fn cleanup(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::Cleanup;
        let filter = IdentityFilter {
            provider: self.provider.provider_name().to_string(),
            entity_id: run.entity_id.clone(),
        };

        let stale = self
            .bounded(run, state, self.provider.list_identities(&filter))
            .await?
            .map_err(|source| {
                if source.is_transport() {
                    ReconcileError::ProviderUnavailable { state, source }
                } else {
                    ReconcileError::CleanupFailed {
                        entity_id: run.entity_id.clone(),
                        source,
                    }
                }
            })?;

        if stale.is_empty() {
            info!(entity_id = %run.entity_id, "No existing identities to clear");
            return Ok(ReconcileState::Register);
        }

        let ids: Vec<String> = stale.into_iter().map(|identity| identity.id).collect();
        self.bounded(run, state, self.provider.delete_identities(&ids))
            .await?
            .map_err(|source| ReconcileError::CleanupFailed {
                entity_id: run.entity_id.clone(),
                source,
            })?;

        run.removed_identities = ids.len();
        info!(
            entity_id = %run.entity_id,
            removed = ids.len(),
            "Cleared stale credential identities"
        );
        Ok(ReconcileState::Register)
    }

    async fn register(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::Register;
        let outcome = self
            .bounded(
                run,
                state,
                self.provider.register_credential(&run.entity_id, run.secret),
            )
            .await?
            .map_err(|source| match source {
                ProviderError::Unavailable(_) => {
                    ReconcileError::ProviderUnavailable { state, source }
                }
                other => ReconcileError::RegistrationFailed {
                    entity_id: run.entity_id.clone(),
                    reason: other.to_string(),
                },
            })?;

        if !outcome.success {
            return Err(ReconcileError::RegistrationFailed {
                entity_id: run.entity_id.clone(),
                reason: outcome
                    .error
                    .unwrap_or_else(|| "provider refused registration".to_string()),
            });
        }

        info!(entity_id = %run.entity_id, "Registered replacement credential");
        Ok(ReconcileState::VerifyFinal)
    }

    async fn verify_final(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::VerifyFinal;
        let outcome = self
            .bounded(
                run,
                state,
                self.provider.authenticate(&run.entity_id, run.secret),
            )
            .await?;

        let verified = match outcome {
            Ok(outcome) => outcome.into_verified(),
            Err(source) if source.is_transport() => {
                return Err(ReconcileError::ProviderUnavailable { state, source })
            }
            Err(err) => {
                warn!(entity_id = %run.entity_id, error = %err, "Final verification rejected");
                None
            }
        };

        let identity = verified.ok_or_else(|| ReconcileError::FinalVerificationFailed {
            entity_id: run.entity_id.clone(),
        })?;
        run.identity = Some(identity);
        Ok(ReconcileState::LinkCheck)
    }

    async fn link_check(&self, run: &mut Run<'_>) -> Result<ReconcileState, ReconcileError> {
        let state = ReconcileState::LinkCheck;
        let Some(mut identity) = run.identity.take() else {
            return Err(ReconcileError::FinalVerificationFailed {
                entity_id: run.entity_id.clone(),
            });
        };

        if identity.is_linked_to(run.user_id) {
            run.identity = Some(identity);
            return Ok(ReconcileState::Done);
        }

        info!(
            entity_id = %run.entity_id,
            identity_id = %identity.id,
            linked_user_id = ?identity.linked_user_id,
            user_id = %run.user_id,
            "Repairing credential link"
        );

        self.bounded(
            run,
            state,
            self.provider.update_link(&identity.id, run.user_id),
        )
        .await?
        .map_err(|source| ReconcileError::LinkRepairFailed {
            identity_id: identity.id.clone(),
            user_id: run.user_id.to_string(),
            source,
        })?;

        identity.linked_user_id = Some(run.user_id.to_string());
        run.identity = Some(identity);
        run.link_repaired = true;
        Ok(ReconcileState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryUserDirectory;
    use crate::provider::{MemoryCredentialProvider, ProviderCall, ProviderFaults};
    use crate::types::User;

    fn engine_with(
        provider: Arc<MemoryCredentialProvider>,
        users: Vec<User>,
    ) -> ReconciliationEngine {
        let directory = Arc::new(MemoryUserDirectory::with_users(users));
        ReconciliationEngine::new(directory, provider)
    }

    #[tokio::test]
    async fn test_missing_user_is_fatal_before_provider_calls() {
        let provider = Arc::new(MemoryCredentialProvider::new("emailpass"));
        let engine = engine_with(provider.clone(), vec![]);

        let err = engine
            .reconcile_password("ghost", &Secret::new("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::UserNotFound { .. }));
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_error_does_not_abort() {
        let provider = Arc::new(MemoryCredentialProvider::new("emailpass"));
        let engine = engine_with(provider.clone(), vec![User::new("user_1", "a@test.com")]);

        // No identity exists, so the in-place update is rejected
        let report = engine
            .reconcile_password_with_report("user_1", &Secret::new("pw"))
            .await
            .unwrap();

        assert_eq!(report.path, ReconcilePath::Reregistered);
        assert_eq!(report.removed_identities, 0);
        assert!(report.link_repaired);
        assert_eq!(report.states.last(), Some(&ReconcileState::Done));
    }

    #[tokio::test]
    async fn test_unreachable_provider_aborts_at_first_verification() {
        let provider = Arc::new(MemoryCredentialProvider::new("emailpass").with_faults(
            ProviderFaults {
                unavailable: true,
                ..Default::default()
            },
        ));
        let engine = engine_with(provider.clone(), vec![User::new("user_1", "a@test.com")]);

        let err = engine
            .reconcile_password("user_1", &Secret::new("pw"))
            .await
            .unwrap_err();

        // The failed update is tolerated; the failed authenticate is not
        assert!(matches!(
            err,
            ReconcileError::ProviderUnavailable {
                state: ReconcileState::VerifyInitial,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(
            provider.calls().await,
            vec![
                ProviderCall::UpdateCredential {
                    entity_id: "a@test.com".to_string()
                },
                ProviderCall::Authenticate {
                    entity_id: "a@test.com".to_string()
                },
            ]
        );
    }
}
