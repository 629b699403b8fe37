// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory chains for engine tests.
//!
//! `SimulatedChain` plays either side of the bridge: it emits `Locked`,
//! `Burned` and `ProposalPassed` logs and applies `mintWrapped`, `unlock` and
//! `pauseBridge` with the same guards as the contracts (nonce replay guard,
//! relayer role, pause).

use crate::chain::{ActionSubmitter, ChainError, ChainEventSource, ChainResult};
use crate::types::{BridgeAction, EventKind, RawEvent, SubmitOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use tokio_util::sync::CancellationToken;

static INIT_TRACING: Once = Once::new();

pub fn init_for_testing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lockmint_relayer=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct ChainState {
    height: u64,
    logs: Vec<RawEvent>,
    next_lock_nonce: u64,
    next_burn_nonce: u64,
    next_proposal_id: u64,
    minted_nonces: HashSet<u64>,
    unlocked_nonces: HashSet<u64>,
    paused: bool,
    relayer_unauthorized: bool,
    vault_balance: u128,
    wrapped_supply: u128,
    wrapped_balances: HashMap<String, u128>,
    unlocked_to: HashMap<String, u128>,
    submissions: Vec<(BridgeAction, SubmitOutcome)>,
    failing_submissions: u32,
    failing_fetches: u32,
    rejecting_submissions: u32,
    crash_after: Option<(usize, CancellationToken)>,
}

impl ChainState {
    fn emit(&mut self, mut event: RawEvent) {
        self.height += 1;
        event.block_number = self.height;
        event.log_index = 0;
        event.tx_hash = format!("0x{:064x}", self.logs.len() + 1);
        self.logs.push(event);
    }

    fn accepted_count(&self) -> usize {
        self.submissions
            .iter()
            .filter(|(_, outcome)| *outcome == SubmitOutcome::Accepted)
            .count()
    }
}

pub struct SimulatedChain {
    name: String,
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ChainState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    /// `lock(amount)` on the vault. Fails while paused.
    pub fn lock(&self, user: &str, amount: u128) -> anyhow::Result<u64> {
        let mut state = self.state();
        if state.paused {
            anyhow::bail!("EnforcedPause");
        }
        let nonce = state.next_lock_nonce;
        state.next_lock_nonce += 1;
        state.vault_balance += amount;
        state.emit(transfer_log(EventKind::Locked, user, amount, nonce));
        Ok(nonce)
    }

    /// `burn(amount)` of previously minted wrapped tokens.
    pub fn burn(&self, user: &str, amount: u128) -> anyhow::Result<u64> {
        let mut state = self.state();
        let balance = state.wrapped_balances.get(user).copied().unwrap_or(0);
        if balance < amount {
            anyhow::bail!("ERC20InsufficientBalance");
        }
        state.wrapped_balances.insert(user.to_string(), balance - amount);
        state.wrapped_supply -= amount;
        let nonce = state.next_burn_nonce;
        state.next_burn_nonce += 1;
        state.emit(transfer_log(EventKind::Burned, user, amount, nonce));
        Ok(nonce)
    }

    pub fn pass_proposal(&self, payload: Vec<u8>) -> u64 {
        let mut state = self.state();
        let id = state.next_proposal_id;
        state.next_proposal_id += 1;
        state.emit(RawEvent {
            kind: EventKind::ProposalPassed,
            block_number: 0,
            log_index: 0,
            tx_hash: String::new(),
            nonce: Some(id),
            actor: None,
            amount: None,
            payload: Some(payload),
        });
        id
    }

    /// Emit an arbitrary (possibly malformed) log in a new block.
    pub fn inject_raw_event(&self, event: RawEvent) -> u64 {
        let mut state = self.state();
        state.emit(event);
        state.height
    }

    pub fn mine(&self, blocks: u64) {
        self.state().height += blocks;
    }

    pub fn height(&self) -> u64 {
        self.state().height
    }

    pub fn set_paused(&self, paused: bool) {
        self.state().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Revoke the relayer role: every later submission is unauthorized
    pub fn revoke_relayer_role(&self) {
        self.state().relayer_unauthorized = true;
    }

    pub fn grant_relayer_role(&self) {
        self.state().relayer_unauthorized = false;
    }

    /// The next `n` submissions fail with a connectivity error before reaching the chain
    pub fn fail_next_submissions(&self, n: u32) {
        self.state().failing_submissions = n;
    }

    /// The next `n` submissions are rejected with an unclassified revert
    pub fn reject_next_submissions(&self, n: u32) {
        self.state().rejecting_submissions = n;
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.state().failing_fetches = n;
    }

    /// Once `accepted` submissions have been applied, the last one loses its
    /// reply and `token` is cancelled, as if the process died mid-dispatch.
    pub fn crash_after(&self, accepted: usize, token: CancellationToken) {
        self.state().crash_after = Some((accepted, token));
    }

    pub fn submissions(&self) -> Vec<(BridgeAction, SubmitOutcome)> {
        self.state().submissions.clone()
    }

    pub fn accepted_actions(&self) -> Vec<BridgeAction> {
        self.state()
            .submissions
            .iter()
            .filter(|(_, outcome)| *outcome == SubmitOutcome::Accepted)
            .map(|(action, _)| action.clone())
            .collect()
    }

    pub fn vault_balance(&self) -> u128 {
        self.state().vault_balance
    }

    pub fn wrapped_supply(&self) -> u128 {
        self.state().wrapped_supply
    }

    pub fn wrapped_balance_of(&self, user: &str) -> u128 {
        self.state().wrapped_balances.get(user).copied().unwrap_or(0)
    }

    pub fn unlocked_to(&self, user: &str) -> u128 {
        self.state().unlocked_to.get(user).copied().unwrap_or(0)
    }

    fn apply(state: &mut ChainState, action: &BridgeAction) -> SubmitOutcome {
        if state.relayer_unauthorized {
            return SubmitOutcome::RejectedUnauthorized;
        }
        if state.rejecting_submissions > 0 {
            state.rejecting_submissions -= 1;
            return SubmitOutcome::RejectedOther("execution reverted".to_string());
        }
        match action {
            BridgeAction::MintWrapped {
                actor,
                amount,
                nonce,
            } => {
                if state.paused {
                    return SubmitOutcome::RejectedOther("EnforcedPause".to_string());
                }
                if !state.minted_nonces.insert(*nonce) {
                    return SubmitOutcome::RejectedDuplicate;
                }
                state.wrapped_supply += amount;
                *state.wrapped_balances.entry(actor.clone()).or_default() += amount;
                SubmitOutcome::Accepted
            }
            BridgeAction::Unlock {
                actor,
                amount,
                nonce,
            } => {
                if state.paused {
                    return SubmitOutcome::RejectedOther("EnforcedPause".to_string());
                }
                if state.unlocked_nonces.contains(nonce) {
                    return SubmitOutcome::RejectedDuplicate;
                }
                if state.vault_balance < *amount {
                    return SubmitOutcome::RejectedOther("insufficient vault balance".to_string());
                }
                state.unlocked_nonces.insert(*nonce);
                state.vault_balance -= amount;
                *state.unlocked_to.entry(actor.clone()).or_default() += amount;
                SubmitOutcome::Accepted
            }
            BridgeAction::Pause { .. } => {
                if state.paused {
                    // EnforcedPause on an already paused target
                    return SubmitOutcome::RejectedDuplicate;
                }
                state.paused = true;
                SubmitOutcome::Accepted
            }
        }
    }
}

fn transfer_log(kind: EventKind, user: &str, amount: u128, nonce: u64) -> RawEvent {
    RawEvent {
        kind,
        block_number: 0,
        log_index: 0,
        tx_hash: String::new(),
        nonce: Some(nonce),
        actor: Some(user.to_string()),
        amount: Some(amount),
        payload: None,
    }
}

#[async_trait::async_trait]
impl ChainEventSource for SimulatedChain {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn latest_block(&self) -> ChainResult<u64> {
        Ok(self.state().height)
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> ChainResult<Vec<RawEvent>> {
        let mut state = self.state();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(ChainError::Transient("simulated RPC outage".to_string()));
        }
        if to > state.height {
            return Err(ChainError::BeyondTip {
                requested: to,
                latest: state.height,
            });
        }
        Ok(state
            .logs
            .iter()
            .filter(|e| e.kind == kind && e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ActionSubmitter for SimulatedChain {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, action: &BridgeAction) -> ChainResult<SubmitOutcome> {
        let mut state = self.state();
        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            return Err(ChainError::Transient("simulated connection reset".to_string()));
        }
        let outcome = Self::apply(&mut state, action);
        state.submissions.push((action.clone(), outcome.clone()));
        if outcome == SubmitOutcome::Accepted {
            let crashed = match &state.crash_after {
                Some((after, token)) if state.accepted_count() >= *after => {
                    token.cancel();
                    true
                }
                _ => false,
            };
            if crashed {
                state.crash_after = None;
                return Err(ChainError::Transient("connection lost after send".to_string()));
            }
        }
        Ok(outcome)
    }
}

/// Chain A (vault, pause target) and chain B (wrapped asset, voting)
pub struct SimulatedBridge {
    pub chain_a: Arc<SimulatedChain>,
    pub chain_b: Arc<SimulatedChain>,
}

impl Default for SimulatedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBridge {
    pub fn new() -> Self {
        Self {
            chain_a: Arc::new(SimulatedChain::new("chain-a")),
            chain_b: Arc::new(SimulatedChain::new("chain-b")),
        }
    }

    /// Locked on A equals wrapped supply on B
    pub fn is_conserved(&self) -> bool {
        self.chain_a.vault_balance() == self.chain_b.wrapped_supply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_chain_guards() {
        let bridge = SimulatedBridge::new();
        let nonce = bridge.chain_a.lock("alice", 50).unwrap();
        assert_eq!(nonce, 0);
        assert_eq!(bridge.chain_a.height(), 1);

        let mint = BridgeAction::MintWrapped {
            actor: "alice".to_string(),
            amount: 50,
            nonce,
        };
        assert_eq!(
            bridge.chain_b.submit(&mint).await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            bridge.chain_b.submit(&mint).await.unwrap(),
            SubmitOutcome::RejectedDuplicate
        );
        assert!(bridge.is_conserved());

        bridge.chain_b.revoke_relayer_role();
        let other = BridgeAction::MintWrapped {
            actor: "alice".to_string(),
            amount: 1,
            nonce: 9,
        };
        assert_eq!(
            bridge.chain_b.submit(&other).await.unwrap(),
            SubmitOutcome::RejectedUnauthorized
        );

        let pause = BridgeAction::Pause { proposal_id: 0 };
        assert_eq!(
            bridge.chain_a.submit(&pause).await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            bridge.chain_a.submit(&pause).await.unwrap(),
            SubmitOutcome::RejectedDuplicate
        );
        assert!(bridge.chain_a.lock("alice", 1).is_err());
    }

    #[tokio::test]
    async fn test_simulated_fetch_bounds() {
        let chain = SimulatedChain::new("chain-a");
        chain.lock("bob", 5).unwrap();
        chain.mine(3);
        assert_eq!(chain.latest_block().await.unwrap(), 4);
        assert_eq!(
            chain.fetch_events(EventKind::Locked, 1, 4).await.unwrap().len(),
            1
        );
        assert!(chain
            .fetch_events(EventKind::Burned, 1, 4)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            chain.fetch_events(EventKind::Locked, 1, 5).await,
            Err(ChainError::BeyondTip {
                requested: 5,
                latest: 4
            })
        ));
    }
}
