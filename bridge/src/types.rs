// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain types shared by the ledger, the chain adapters and the sync engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two ledgers the relayer bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainSide {
    /// Origin chain holding the vault (`lock` / `unlock`)
    #[serde(rename = "chain-a")]
    A,
    /// Destination chain holding the wrapped asset (`mintWrapped` / `burn`)
    #[serde(rename = "chain-b")]
    B,
}

impl ChainSide {
    pub fn other(&self) -> ChainSide {
        match self {
            ChainSide::A => ChainSide::B,
            ChainSide::B => ChainSide::A,
        }
    }
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainSide::A => write!(f, "chain-a"),
            ChainSide::B => write!(f, "chain-b"),
        }
    }
}

/// An event→action mapping. Each direction owns an independent nonce space,
/// an independent cursor and an independent watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `Locked` on chain A → `mintWrapped` on chain B
    LockToMint,
    /// `Burned` on chain B → `unlock` on chain A
    BurnToUnlock,
    /// `ProposalPassed` on the voting chain → pause on the other chain
    Governance,
}

impl Direction {
    pub const ALL: [Direction; 3] = [
        Direction::LockToMint,
        Direction::BurnToUnlock,
        Direction::Governance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::LockToMint => "lock_to_mint",
            Direction::BurnToUnlock => "burn_to_unlock",
            Direction::Governance => "governance",
        }
    }

    /// Event kind observed on the source chain for this direction
    pub fn event_kind(&self) -> EventKind {
        match self {
            Direction::LockToMint => EventKind::Locked,
            Direction::BurnToUnlock => EventKind::Burned,
            Direction::Governance => EventKind::ProposalPassed,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock_to_mint" => Ok(Direction::LockToMint),
            "burn_to_unlock" => Ok(Direction::BurnToUnlock),
            "governance" => Ok(Direction::Governance),
            other => Err(format!("Unknown direction: {}", other)),
        }
    }
}

/// Kinds of source-chain events the relayer consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Locked,
    Burned,
    ProposalPassed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Locked => "Locked",
            EventKind::Burned => "Burned",
            EventKind::ProposalPassed => "ProposalPassed",
        }
    }
}

/// Undecoded event as returned by a chain event source.
///
/// Fields are optional because the relayer must be able to record a failure
/// for an event it observed but could not fully decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub block_number: u64,
    /// Position of the log inside its block
    pub log_index: u64,
    pub tx_hash: String,
    /// Transfer nonce, or proposal id for `ProposalPassed`
    pub nonce: Option<u64>,
    pub actor: Option<String>,
    pub amount: Option<u128>,
    pub payload: Option<Vec<u8>>,
}

/// A completed lock or burn observed on its origin chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub direction: Direction,
    pub actor: String,
    pub amount: u128,
    pub nonce: u64,
    pub source_block: u64,
    pub log_index: u64,
}

/// A governance proposal that reached quorum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalPassedEvent {
    pub proposal_id: u64,
    /// Opaque to the relayer, only logged
    pub payload: Vec<u8>,
    pub source_block: u64,
}

/// A decoded event ready to be turned into exactly one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeEvent {
    Transfer(TransferEvent),
    ProposalPassed(ProposalPassedEvent),
}

/// Why a raw event could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent {
    /// Present when the nonce itself could be read, so the failure can be recorded
    pub nonce: Option<u64>,
    pub block_number: u64,
    pub reason: String,
}

impl BridgeEvent {
    /// Decode a raw event observed for `direction`.
    pub fn try_from_raw(direction: Direction, raw: &RawEvent) -> Result<Self, MalformedEvent> {
        let malformed = |reason: String| MalformedEvent {
            nonce: raw.nonce,
            block_number: raw.block_number,
            reason,
        };
        if raw.kind != direction.event_kind() {
            return Err(malformed(format!(
                "unexpected {} event for direction {}",
                raw.kind.name(),
                direction
            )));
        }
        let nonce = raw
            .nonce
            .ok_or_else(|| malformed("missing nonce".to_string()))?;

        match direction {
            Direction::LockToMint | Direction::BurnToUnlock => {
                let actor = raw
                    .actor
                    .clone()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| malformed("missing actor".to_string()))?;
                let amount = raw
                    .amount
                    .ok_or_else(|| malformed("missing amount".to_string()))?;
                if amount == 0 {
                    return Err(malformed("zero amount".to_string()));
                }
                Ok(BridgeEvent::Transfer(TransferEvent {
                    direction,
                    actor,
                    amount,
                    nonce,
                    source_block: raw.block_number,
                    log_index: raw.log_index,
                }))
            }
            Direction::Governance => Ok(BridgeEvent::ProposalPassed(ProposalPassedEvent {
                proposal_id: nonce,
                payload: raw.payload.clone().unwrap_or_default(),
                source_block: raw.block_number,
            })),
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            BridgeEvent::Transfer(e) => e.nonce,
            BridgeEvent::ProposalPassed(e) => e.proposal_id,
        }
    }

    pub fn amount(&self) -> u128 {
        match self {
            BridgeEvent::Transfer(e) => e.amount,
            BridgeEvent::ProposalPassed(_) => 0,
        }
    }

    /// The single counter-action this event authorizes on the other chain
    pub fn to_action(&self) -> BridgeAction {
        match self {
            BridgeEvent::Transfer(e) => match e.direction {
                Direction::BurnToUnlock => BridgeAction::Unlock {
                    actor: e.actor.clone(),
                    amount: e.amount,
                    nonce: e.nonce,
                },
                _ => BridgeAction::MintWrapped {
                    actor: e.actor.clone(),
                    amount: e.amount,
                    nonce: e.nonce,
                },
            },
            BridgeEvent::ProposalPassed(e) => BridgeAction::Pause {
                proposal_id: e.proposal_id,
            },
        }
    }
}

/// State-changing call submitted to a destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeAction {
    MintWrapped {
        actor: String,
        amount: u128,
        nonce: u64,
    },
    Unlock {
        actor: String,
        amount: u128,
        nonce: u64,
    },
    Pause {
        proposal_id: u64,
    },
}

impl BridgeAction {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeAction::MintWrapped { .. } => "mint_wrapped",
            BridgeAction::Unlock { .. } => "unlock",
            BridgeAction::Pause { .. } => "pause",
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            BridgeAction::MintWrapped { nonce, .. } | BridgeAction::Unlock { nonce, .. } => *nonce,
            BridgeAction::Pause { proposal_id } => *proposal_id,
        }
    }
}

impl fmt::Display for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeAction::MintWrapped {
                actor,
                amount,
                nonce,
            } => write!(f, "mintWrapped({}, {}, {})", actor, amount, nonce),
            BridgeAction::Unlock {
                actor,
                amount,
                nonce,
            } => write!(f, "unlock({}, {}, {})", actor, amount, nonce),
            BridgeAction::Pause { proposal_id } => write!(f, "pause(proposal={})", proposal_id),
        }
    }
}

/// Classified result of one submission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The destination's replay guard (or pause guard for a pause) already saw it
    RejectedDuplicate,
    /// The relayer credential lacks the required role
    RejectedUnauthorized,
    RejectedOther(String),
}

impl SubmitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Accepted => "accepted",
            SubmitOutcome::RejectedDuplicate => "duplicate",
            SubmitOutcome::RejectedUnauthorized => "unauthorized",
            SubmitOutcome::RejectedOther(_) => "other",
        }
    }
}

/// Lifecycle of a processed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Why a record ended up failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Unauthorized,
    RetriesExhausted(String),
    Malformed(String),
}

impl FailureReason {
    /// Failed records with a retryable reason are swept again on a schedule
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::RetriesExhausted(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Unauthorized => "unauthorized",
            FailureReason::RetriesExhausted(_) => "retries_exhausted",
            FailureReason::Malformed(_) => "malformed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unauthorized => write!(f, "relayer credential is not authorized"),
            FailureReason::RetriesExhausted(last) => write!(f, "retries exhausted: {}", last),
            FailureReason::Malformed(reason) => write!(f, "malformed event: {}", reason),
        }
    }
}

/// Durable dedup/state entry for one (direction, nonce) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub direction: Direction,
    pub nonce: u64,
    pub status: RecordStatus,
    pub attempts: u32,
    /// Unix timestamp (milliseconds) of the last dispatch attempt
    pub last_attempt_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Decoded event, kept so the record can be retried without re-scanning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<BridgeEvent>,
}

impl ProcessedRecord {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RecordStatus::Confirmed | RecordStatus::Failed)
    }

    /// Whether the background sweep should attempt this record again
    pub fn is_retry_candidate(&self) -> bool {
        if self.event.is_none() {
            return false;
        }
        match self.status {
            RecordStatus::Pending => true,
            RecordStatus::Failed => self
                .failure
                .as_ref()
                .map(FailureReason::is_retryable)
                .unwrap_or(false),
            RecordStatus::Confirmed => false,
        }
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
