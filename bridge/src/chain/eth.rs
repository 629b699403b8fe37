// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! EVM adapter for both sides of the bridge.
//!
//! One `EvmChainClient` per chain serves as event source (bridge and voting
//! contracts) and as action submitter (bridge and emergency contracts).

use super::{ActionSubmitter, ChainError, ChainEventSource, ChainResult};
use crate::types::{BridgeAction, EventKind, RawEvent, SubmitOutcome};
use ethers::abi::{Detokenize, RawLog};
use ethers::contract::{abigen, ContractCall, ContractError, EthEvent};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Filter, Log, U256, U64};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

abigen!(
    BridgeLock,
    r#"[
        function lock(uint256 amount)
        function unlock(address user, uint256 amount, uint256 nonce)
        event Locked(address indexed user, uint256 amount, uint256 nonce)
        event Unlocked(address indexed user, uint256 amount, uint256 nonce)
    ]"#
);

abigen!(
    BridgeMint,
    r#"[
        function mintWrapped(address user, uint256 amount, uint256 nonce)
        function burn(uint256 amount)
        event Minted(address indexed user, uint256 amount, uint256 nonce)
        event Burned(address indexed user, uint256 amount, uint256 nonce)
    ]"#
);

abigen!(
    GovernanceVoting,
    r#"[
        event ProposalPassed(uint256 indexed proposalId, bytes data)
    ]"#
);

abigen!(
    GovernanceEmergency,
    r#"[
        function pauseBridge()
    ]"#
);

pub type EvmSigner = SignerMiddleware<Provider<Http>, LocalWallet>;

const NONCE_ALREADY_PROCESSED: &str = "Nonce already processed";
const ACCESS_CONTROL_UNAUTHORIZED: &str = "AccessControlUnauthorizedAccount(address,bytes32)";
const ENFORCED_PAUSE: &str = "EnforcedPause()";

/// Contract addresses on one chain
#[derive(Debug, Clone)]
pub struct EvmContracts {
    /// `BridgeLock` on chain A, `BridgeMint` on chain B
    pub bridge: Address,
    /// `GovernanceVoting`, only on the chain that emits `ProposalPassed`
    pub voting: Option<Address>,
    /// `GovernanceEmergency`, only on the chain that gets paused
    pub emergency: Option<Address>,
}

pub struct EvmChainClient {
    name: String,
    provider: Provider<Http>,
    contracts: EvmContracts,
    signer: Option<Arc<EvmSigner>>,
}

impl EvmChainClient {
    /// Connects, verifies the chain id when one is expected and, when a
    /// relayer key is given, prepares a signing client for submissions.
    pub async fn new(
        name: &str,
        rpc_url: &str,
        expected_chain_id: Option<u64>,
        contracts: EvmContracts,
        relayer_key_hex: Option<&str>,
    ) -> anyhow::Result<Self> {
        let provider =
            Provider::<Http>::try_from(rpc_url)?.interval(Duration::from_millis(2000));
        let chain_id = provider.get_chainid().await?.as_u64();
        let block_number = provider.get_block_number().await?;
        match expected_chain_id {
            Some(expected) if expected != chain_id => {
                anyhow::bail!(
                    "[{}] Chain ID mismatch: expected {}, got {}",
                    name,
                    expected,
                    chain_id
                );
            }
            Some(_) => tracing::info!(
                "[{}] Connected to chain {} (verified), current block: {}",
                name,
                chain_id,
                block_number
            ),
            None => tracing::warn!(
                "[{}] Connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}",
                name,
                chain_id,
                block_number
            ),
        }

        let signer = match relayer_key_hex {
            Some(key) => {
                let wallet = key.trim().parse::<LocalWallet>()?.with_chain_id(chain_id);
                tracing::info!("[{}] Relayer address: {:?}", name, wallet.address());
                Some(Arc::new(SignerMiddleware::new(provider.clone(), wallet)))
            }
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            provider,
            contracts,
            signer,
        })
    }

    fn signer(&self) -> ChainResult<Arc<EvmSigner>> {
        self.signer
            .clone()
            .ok_or_else(|| ChainError::Other(format!("[{}] no relayer key configured", self.name)))
    }

    fn event_filter(&self, kind: EventKind) -> ChainResult<Filter> {
        let (address, topic0) = match kind {
            EventKind::Locked => (self.contracts.bridge, LockedFilter::signature()),
            EventKind::Burned => (self.contracts.bridge, BurnedFilter::signature()),
            EventKind::ProposalPassed => (
                self.contracts.voting.ok_or_else(|| {
                    ChainError::Other(format!("[{}] no voting contract configured", self.name))
                })?,
                ProposalPassedFilter::signature(),
            ),
        };
        Ok(Filter::new().address(address).topic0(topic0))
    }

    async fn send_call<D>(
        &self,
        call: ContractCall<EvmSigner, D>,
        action: &BridgeAction,
    ) -> ChainResult<SubmitOutcome>
    where
        D: Detokenize + Send + Sync,
    {
        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => return classify_contract_error(&self.name, &e, action),
        };
        let tx_hash = *pending;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))?;
        match receipt {
            Some(receipt) if receipt.status == Some(U64::from(1)) => {
                tracing::info!(
                    "[{}] {} accepted in tx {:?} at block {:?}",
                    self.name,
                    action,
                    tx_hash,
                    receipt.block_number
                );
                Ok(SubmitOutcome::Accepted)
            }
            Some(_) => Ok(SubmitOutcome::RejectedOther(format!(
                "transaction {:?} reverted",
                tx_hash
            ))),
            None => Err(ChainError::Transient(format!(
                "transaction {:?} dropped before inclusion",
                tx_hash
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ChainEventSource for EvmChainClient {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn latest_block(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ChainError::Transient(e.to_string()))
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> ChainResult<Vec<RawEvent>> {
        let latest = self.latest_block().await?;
        if to > latest {
            return Err(ChainError::BeyondTip {
                requested: to,
                latest,
            });
        }
        if from > to {
            return Ok(vec![]);
        }
        let filter = self.event_filter(kind)?.from_block(from).to_block(to);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))
            .tap_err(|e| {
                tracing::error!(
                    "[{}] get_logs failed. Filter: {:?}. Error {:?}",
                    self.name,
                    filter,
                    e
                )
            })?;
        let mut events = logs
            .into_iter()
            .map(|log| decode_log(kind, log))
            .collect::<ChainResult<Vec<_>>>()?;
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }
}

#[async_trait::async_trait]
impl ActionSubmitter for EvmChainClient {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, action: &BridgeAction) -> ChainResult<SubmitOutcome> {
        let signer = self.signer()?;
        match action {
            BridgeAction::MintWrapped {
                actor,
                amount,
                nonce,
            } => {
                let contract = BridgeMint::new(self.contracts.bridge, signer);
                let call =
                    contract.mint_wrapped(parse_address(actor)?, U256::from(*amount), U256::from(*nonce));
                self.send_call(call, action).await
            }
            BridgeAction::Unlock {
                actor,
                amount,
                nonce,
            } => {
                let contract = BridgeLock::new(self.contracts.bridge, signer);
                let call =
                    contract.unlock(parse_address(actor)?, U256::from(*amount), U256::from(*nonce));
                self.send_call(call, action).await
            }
            BridgeAction::Pause { .. } => {
                let emergency = self.contracts.emergency.ok_or_else(|| {
                    ChainError::Other(format!("[{}] no emergency contract configured", self.name))
                })?;
                let contract = GovernanceEmergency::new(emergency, signer);
                self.send_call(contract.pause_bridge(), action).await
            }
        }
    }
}

fn parse_address(actor: &str) -> ChainResult<Address> {
    actor
        .parse::<Address>()
        .map_err(|e| ChainError::Other(format!("invalid actor address {}: {}", actor, e)))
}

fn u256_to_u128(value: U256) -> Option<u128> {
    (value.bits() <= 128).then(|| value.as_u128())
}

fn u256_to_u64(value: U256) -> Option<u64> {
    (value.bits() <= 64).then(|| value.as_u64())
}

/// Converts a log into a `RawEvent`. Fields that fail to decode are left empty
/// so the engine can record the event as malformed instead of dropping it.
fn decode_log(kind: EventKind, log: Log) -> ChainResult<RawEvent> {
    let block_number = log
        .block_number
        .ok_or_else(|| ChainError::InvalidResponse("log without block_number".to_string()))?
        .as_u64();
    let mut raw = RawEvent {
        kind,
        block_number,
        log_index: log.log_index.map(|i| i.low_u64()).unwrap_or_default(),
        tx_hash: log
            .transaction_hash
            .map(|h| format!("{:?}", h))
            .unwrap_or_default(),
        nonce: None,
        actor: None,
        amount: None,
        payload: None,
    };
    let raw_log = RawLog::from(log);
    let decoded = match kind {
        EventKind::Locked => LockedFilter::decode_log(&raw_log)
            .map(|e| fill_transfer(&mut raw, e.user, e.amount, e.nonce)),
        EventKind::Burned => BurnedFilter::decode_log(&raw_log)
            .map(|e| fill_transfer(&mut raw, e.user, e.amount, e.nonce)),
        EventKind::ProposalPassed => ProposalPassedFilter::decode_log(&raw_log).map(|e| {
            raw.nonce = u256_to_u64(e.proposal_id);
            raw.payload = Some(e.data.to_vec());
        }),
    };
    if let Err(e) = decoded {
        tracing::warn!(
            "Failed to decode {} log at block {} tx {}: {:?}",
            kind.name(),
            raw.block_number,
            raw.tx_hash,
            e
        );
    }
    Ok(raw)
}

fn fill_transfer(raw: &mut RawEvent, user: Address, amount: U256, nonce: U256) {
    raw.actor = Some(ethers::utils::to_checksum(&user, None));
    raw.amount = u256_to_u128(amount);
    raw.nonce = u256_to_u64(nonce);
}

/// Maps a failed `send` to an outcome. Reverts are verdicts from the chain;
/// anything else (connectivity, signing) is transient.
fn classify_contract_error(
    chain: &str,
    err: &ContractError<EvmSigner>,
    action: &BridgeAction,
) -> ChainResult<SubmitOutcome> {
    let mut text = format!("{} {:?}", err, err);
    if let ContractError::Revert(data) = err {
        text.push_str(&format!(" 0x{}", hex::encode(data)));
    }
    if text.to_lowercase().contains("revert") {
        let outcome = classify_revert(&text, action);
        tracing::info!(
            "[{}] {} rejected as {}: {}",
            chain,
            action,
            outcome.label(),
            err
        );
        Ok(outcome)
    } else {
        Err(ChainError::Transient(err.to_string()))
    }
}

/// Classifies revert text (reason strings and/or hex encoded revert data).
pub fn classify_revert(text: &str, action: &BridgeAction) -> SubmitOutcome {
    let lower = text.to_lowercase();
    let has_selector = |signature: &str| lower.contains(&hex::encode(ethers::utils::id(signature)));

    if text.contains(NONCE_ALREADY_PROCESSED) {
        return SubmitOutcome::RejectedDuplicate;
    }
    if has_selector(ACCESS_CONTROL_UNAUTHORIZED)
        || lower.contains("accesscontrolunauthorizedaccount")
        || lower.contains("missing role")
    {
        return SubmitOutcome::RejectedUnauthorized;
    }
    let paused = has_selector(ENFORCED_PAUSE) || lower.contains("enforcedpause");
    if paused && matches!(action, BridgeAction::Pause { .. }) {
        // target already paused
        return SubmitOutcome::RejectedDuplicate;
    }
    SubmitOutcome::RejectedOther(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;
    use ethers::types::{Bytes, H256, U64};

    fn mint() -> BridgeAction {
        BridgeAction::MintWrapped {
            actor: "0x00000000000000000000000000000000000000aa".to_string(),
            amount: 100,
            nonce: 0,
        }
    }

    #[test]
    fn test_classify_duplicate_nonce() {
        let text = "(code: 3, message: execution reverted: Nonce already processed, data: None)";
        assert_eq!(classify_revert(text, &mint()), SubmitOutcome::RejectedDuplicate);
    }

    #[test]
    fn test_classify_unauthorized() {
        let selector = hex::encode(ethers::utils::id(ACCESS_CONTROL_UNAUTHORIZED));
        let text = format!("execution reverted, data: Some(String(\"0x{}0000\"))", selector);
        assert_eq!(
            classify_revert(&text, &mint()),
            SubmitOutcome::RejectedUnauthorized
        );
        assert_eq!(
            classify_revert(
                "AccessControl: account 0xabc is missing role 0xdef",
                &mint()
            ),
            SubmitOutcome::RejectedUnauthorized
        );
    }

    #[test]
    fn test_classify_enforced_pause_depends_on_action() {
        let selector = hex::encode(ethers::utils::id(ENFORCED_PAUSE));
        let text = format!("execution reverted 0x{}", selector);
        assert_eq!(
            classify_revert(&text, &BridgeAction::Pause { proposal_id: 1 }),
            SubmitOutcome::RejectedDuplicate
        );
        // a paused bridge rejects transfers; they stay retryable
        assert!(matches!(
            classify_revert(&text, &mint()),
            SubmitOutcome::RejectedOther(_)
        ));
    }

    #[test]
    fn test_classify_other() {
        assert!(matches!(
            classify_revert("execution reverted: ERC20: insufficient balance", &mint()),
            SubmitOutcome::RejectedOther(reason) if reason.contains("insufficient")
        ));
    }

    fn locked_log(amount: U256, nonce: U256) -> Log {
        let user: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        Log {
            topics: vec![LockedFilter::signature(), H256::from(user)],
            data: Bytes::from(ethers::abi::encode(&[Token::Uint(amount), Token::Uint(nonce)])),
            block_number: Some(U64::from(42)),
            log_index: Some(U256::from(3)),
            transaction_hash: Some(H256::repeat_byte(0x11)),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_locked_log() {
        let raw = decode_log(EventKind::Locked, locked_log(U256::from(500), U256::from(7))).unwrap();
        assert_eq!(raw.block_number, 42);
        assert_eq!(raw.log_index, 3);
        assert_eq!(raw.nonce, Some(7));
        assert_eq!(raw.amount, Some(500));
        assert_eq!(
            raw.actor.unwrap().to_lowercase(),
            "0x00000000000000000000000000000000000000aa"
        );
    }

    #[test]
    fn test_decode_oversized_amount_keeps_nonce() {
        let raw = decode_log(EventKind::Locked, locked_log(U256::MAX, U256::from(9))).unwrap();
        assert_eq!(raw.nonce, Some(9));
        assert_eq!(raw.amount, None);
    }

    #[test]
    fn test_decode_garbage_log() {
        let mut log = locked_log(U256::from(1), U256::from(1));
        log.data = Bytes::from(vec![0u8; 5]);
        let raw = decode_log(EventKind::Locked, log).unwrap();
        assert_eq!(raw.nonce, None);

        let mut log = locked_log(U256::from(1), U256::from(1));
        log.block_number = None;
        assert!(matches!(
            decode_log(EventKind::Locked, log),
            Err(ChainError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_decode_proposal_passed_log() {
        let log = Log {
            topics: vec![ProposalPassedFilter::signature(), H256::from_low_u64_be(4)],
            data: Bytes::from(ethers::abi::encode(&[Token::Bytes(vec![0xca, 0xfe])])),
            block_number: Some(U64::from(8)),
            ..Default::default()
        };
        let raw = decode_log(EventKind::ProposalPassed, log).unwrap();
        assert_eq!(raw.nonce, Some(4));
        assert_eq!(raw.payload, Some(vec![0xca, 0xfe]));
    }
}
