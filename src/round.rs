use crate::{
    Result,
    ValidationError,
    catalog::PerCategory,
    ledger::{
        CallHash,
        LastWinner,
        RoundReader,
    },
};
use alloy::primitives::{
    Address,
    U256,
};
use std::fmt;
use tracing::{
    debug,
    warn,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RoundPhase {
    NoRound,
    RoundActive,
    RoundExpired,
    RoundStarting,
    RoundFinalizing,
}

impl RoundPhase {
    pub fn name(self) -> &'static str {
        match self {
            RoundPhase::NoRound => "no round",
            RoundPhase::RoundActive => "active",
            RoundPhase::RoundExpired => "expired",
            RoundPhase::RoundStarting => "starting",
            RoundPhase::RoundFinalizing => "finalizing",
        }
    }

    pub fn allows(self, action: PendingKind) -> bool {
        use RoundPhase::*;
        match action {
            PendingKind::StartRound => matches!(self, NoRound | RoundExpired),
            PendingKind::Build => self == RoundActive,
            PendingKind::Finalize => matches!(self, RoundActive | RoundExpired),
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of write-call that is waiting for a receipt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PendingKind {
    StartRound,
    Build,
    Finalize,
}

impl PendingKind {
    pub fn action(self) -> &'static str {
        match self {
            PendingKind::StartRound => "start round",
            PendingKind::Build => "build",
            PendingKind::Finalize => "finalize",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PendingCall {
    pub kind: PendingKind,
    pub hash: CallHash,
}

/// Phase from the round fields and the outstanding call, nothing else.
pub fn derive_phase(
    round_id: U256,
    deadline: u64,
    now: u64,
    pending: Option<PendingKind>,
) -> RoundPhase {
    match pending {
        Some(PendingKind::StartRound) => RoundPhase::RoundStarting,
        Some(PendingKind::Finalize) => RoundPhase::RoundFinalizing,
        Some(PendingKind::Build) | None => {
            if round_id.is_zero() {
                RoundPhase::NoRound
            } else if now < deadline {
                RoundPhase::RoundActive
            } else {
                RoundPhase::RoundExpired
            }
        }
    }
}

/// Unix time in seconds.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> u64;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Time left until the deadline.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Countdown {
    pub remaining_secs: u64,
}

impl Countdown {
    pub fn until(deadline: u64, now: u64) -> Self {
        Self {
            remaining_secs: deadline.saturating_sub(now),
        }
    }

    pub fn is_over(&self) -> bool {
        self.remaining_secs == 0
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}",
            self.remaining_secs / 60,
            self.remaining_secs % 60
        )
    }
}

/// Every round-derived read, taken as one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub round_id: U256,
    pub deadline: u64,
    pub start_time: u64,
    /// Hidden order as catalog indices.
    pub order: PerCategory<u8>,
    pub lengths: PerCategory<u64>,
    pub round_fee: U256,
    pub last_winner: LastWinner,
    pub last_finalized_round_id: U256,
    pub owner: Address,
    pub own_build_round: Option<U256>,
}

impl RoundSnapshot {
    /// Reads are awaited one after another.
    pub async fn fetch<R: RoundReader>(reader: &R) -> Result<Self> {
        let round_id = reader.current_round_id().await?;
        let deadline = reader.round_deadline().await?;
        let start_time = reader.round_start_time().await?;
        let order = reader.current_round_order().await?;
        let lengths = reader.option_lengths().await?;
        let round_fee = reader.current_round_fee().await?;
        let last_winner = reader.last_winner().await?;
        let last_finalized_round_id = reader.last_finalized_round_id().await?;
        let owner = reader.owner().await?;
        let own_build_round = reader.own_build_round().await?;
        debug!(%round_id, deadline, %last_finalized_round_id, "fetched round snapshot");
        Ok(Self {
            round_id,
            deadline,
            start_time,
            order,
            lengths,
            round_fee,
            last_winner,
            last_finalized_round_id,
            owner,
            own_build_round,
        })
    }

    pub fn exists(&self) -> bool {
        !self.round_id.is_zero()
    }

    /// Whether the signer already built in this round.
    pub fn has_own_build(&self) -> bool {
        self.exists() && self.own_build_round == Some(self.round_id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoundStateMachine {
    snapshot: Option<RoundSnapshot>,
    pending: Option<PendingCall>,
}

impl RoundStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&RoundSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn round_id(&self) -> U256 {
        self.snapshot.as_ref().map(|s| s.round_id).unwrap_or_default()
    }

    pub fn pending(&self) -> Option<&PendingCall> {
        self.pending.as_ref()
    }

    pub fn phase(&self, now: u64) -> RoundPhase {
        let (round_id, deadline) = self
            .snapshot
            .as_ref()
            .map(|s| (s.round_id, s.deadline))
            .unwrap_or_default();
        derive_phase(round_id, deadline, now, self.pending.map(|p| p.kind))
    }

    pub fn countdown(&self, now: u64) -> Countdown {
        match &self.snapshot {
            Some(s) if s.exists() => Countdown::until(s.deadline, now),
            _ => Countdown::default(),
        }
    }

    /// Replaces the mirrored round fields. Returns `true` when the round id or
    /// the last finalized round id changed from a previously applied snapshot.
    ///
    /// Within one round the mirrored deadline never decreases; a lower value
    /// from a lagging read is ignored.
    pub fn apply_snapshot(&mut self, mut snapshot: RoundSnapshot) -> bool {
        let transition = match &self.snapshot {
            Some(previous)
                if previous.round_id != snapshot.round_id
                    || previous.last_finalized_round_id
                        != snapshot.last_finalized_round_id =>
            {
                true
            }
            Some(previous) => {
                if snapshot.exists() && snapshot.deadline < previous.deadline {
                    warn!(
                        round_id = %snapshot.round_id,
                        old = previous.deadline,
                        new = snapshot.deadline,
                        "round deadline moved backwards, keeping the later one"
                    );
                    snapshot.deadline = previous.deadline;
                }
                false
            }
            None => false,
        };
        self.snapshot = Some(snapshot);
        transition
    }

    /// Gate for `action` at `now`.
    pub fn check(
        &self,
        action: PendingKind,
        now: u64,
    ) -> std::result::Result<(), ValidationError> {
        if self.pending.is_some() {
            return Err(ValidationError::CallPending);
        }
        let phase = self.phase(now);
        if !phase.allows(action) {
            return Err(ValidationError::RoundWindow {
                action: action.action(),
                phase: phase.name(),
            });
        }
        Ok(())
    }

    pub fn begin_call(&mut self, kind: PendingKind, hash: CallHash) {
        self.pending = Some(PendingCall { kind, hash });
    }

    /// Clears the outstanding call if it is `hash`.
    pub fn finish_call(&mut self, hash: CallHash) -> Option<PendingCall> {
        match self.pending {
            Some(call) if call.hash == hash => self.pending.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::snapshot;
    use alloy::primitives::B256;
    use proptest::prelude::*;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn derive_phase__follows_round_id_and_deadline() {
        assert_eq!(derive_phase(U256::ZERO, 0, NOW, None), RoundPhase::NoRound);
        assert_eq!(
            derive_phase(U256::from(1u64), NOW + 1, NOW, None),
            RoundPhase::RoundActive
        );
        assert_eq!(
            derive_phase(U256::from(1u64), NOW, NOW, None),
            RoundPhase::RoundExpired
        );
    }

    #[test]
    fn derive_phase__pending_start_and_finalize_override() {
        assert_eq!(
            derive_phase(U256::ZERO, 0, NOW, Some(PendingKind::StartRound)),
            RoundPhase::RoundStarting
        );
        assert_eq!(
            derive_phase(U256::from(4u64), NOW - 1, NOW, Some(PendingKind::Finalize)),
            RoundPhase::RoundFinalizing
        );
        assert_eq!(
            derive_phase(U256::from(4u64), NOW + 60, NOW, Some(PendingKind::Build)),
            RoundPhase::RoundActive
        );
    }

    proptest! {
        #[test]
        fn derive_phase__without_pending_depends_only_on_id_deadline_and_now(
            id in any::<u64>(),
            deadline in any::<u64>(),
            now in any::<u64>(),
        ) {
            let phase = derive_phase(U256::from(id), deadline, now, None);
            let expected = if id == 0 {
                RoundPhase::NoRound
            } else if now < deadline {
                RoundPhase::RoundActive
            } else {
                RoundPhase::RoundExpired
            };
            prop_assert_eq!(phase, expected);
            prop_assert_eq!(derive_phase(U256::from(id), deadline, now, None), phase);
        }
    }

    #[test]
    fn countdown__formats_minutes_and_seconds() {
        assert_eq!(Countdown::until(NOW + 125, NOW).to_string(), "02:05");
        assert_eq!(Countdown::until(NOW, NOW + 10).to_string(), "00:00");
        assert!(Countdown::until(NOW, NOW + 10).is_over());
    }

    #[test]
    fn check__gates_actions_by_phase() {
        // given
        let mut machine = RoundStateMachine::new();
        machine.apply_snapshot(snapshot(U256::ZERO, 0));

        // then
        assert_eq!(machine.check(PendingKind::StartRound, NOW), Ok(()));
        assert_eq!(
            machine.check(PendingKind::Build, NOW),
            Err(ValidationError::RoundWindow {
                action: "build",
                phase: "no round",
            })
        );
        assert!(machine.check(PendingKind::Finalize, NOW).is_err());

        // when
        machine.apply_snapshot(snapshot(U256::from(1u64), NOW + 30));

        // then
        assert!(machine.check(PendingKind::StartRound, NOW).is_err());
        assert_eq!(machine.check(PendingKind::Build, NOW), Ok(()));
        assert_eq!(machine.check(PendingKind::Finalize, NOW), Ok(()));
        assert!(machine.check(PendingKind::Build, NOW + 30).is_err());
        assert_eq!(machine.check(PendingKind::StartRound, NOW + 30), Ok(()));
    }

    #[test]
    fn check__rejects_everything_while_a_call_is_pending() {
        let mut machine = RoundStateMachine::new();
        machine.apply_snapshot(snapshot(U256::from(1u64), NOW + 30));
        machine.begin_call(PendingKind::Build, B256::repeat_byte(1));

        assert_eq!(
            machine.check(PendingKind::Finalize, NOW),
            Err(ValidationError::CallPending)
        );
        assert_eq!(machine.phase(NOW), RoundPhase::RoundActive);
    }

    #[test]
    fn finish_call__only_clears_matching_hash() {
        let mut machine = RoundStateMachine::new();
        machine.apply_snapshot(snapshot(U256::from(1u64), NOW - 1));
        machine.begin_call(PendingKind::Finalize, B256::repeat_byte(1));
        assert_eq!(machine.phase(NOW), RoundPhase::RoundFinalizing);

        assert_eq!(machine.finish_call(B256::repeat_byte(2)), None);
        assert!(machine.finish_call(B256::repeat_byte(1)).is_some());
        assert_eq!(machine.phase(NOW), RoundPhase::RoundExpired);
    }

    #[test]
    fn apply_snapshot__reports_round_transition() {
        // given
        let mut machine = RoundStateMachine::new();

        // when
        let first = machine.apply_snapshot(snapshot(U256::from(1u64), NOW + 30));
        let same = machine.apply_snapshot(snapshot(U256::from(1u64), NOW + 30));
        let next = machine.apply_snapshot(snapshot(U256::ZERO, 0));

        // then
        assert!(!first);
        assert!(!same);
        assert!(next);
        assert_eq!(machine.round_id(), U256::ZERO);
    }

    #[test]
    fn apply_snapshot__finalization_counts_as_transition() {
        let mut machine = RoundStateMachine::new();
        machine.apply_snapshot(snapshot(U256::from(2u64), NOW + 30));

        let mut finalized = snapshot(U256::from(2u64), NOW + 30);
        finalized.last_finalized_round_id = U256::from(2u64);

        assert!(machine.apply_snapshot(finalized));
    }

    #[test]
    fn apply_snapshot__keeps_later_deadline_within_a_round() {
        // given
        let mut machine = RoundStateMachine::new();
        machine.apply_snapshot(snapshot(U256::from(3u64), NOW + 30));

        // when
        let transition = machine.apply_snapshot(snapshot(U256::from(3u64), NOW - 5));

        // then
        assert!(!transition);
        assert_eq!(machine.snapshot().unwrap().deadline, NOW + 30);
        assert_eq!(machine.phase(NOW), RoundPhase::RoundActive);

        // an extension still applies
        machine.apply_snapshot(snapshot(U256::from(3u64), NOW + 60));
        assert_eq!(machine.snapshot().unwrap().deadline, NOW + 60);
    }

    #[test]
    fn apply_snapshot__new_round_may_have_earlier_deadline() {
        let mut machine = RoundStateMachine::new();
        machine.apply_snapshot(snapshot(U256::from(3u64), NOW + 30));

        let transition = machine.apply_snapshot(snapshot(U256::from(4u64), NOW + 10));

        assert!(transition);
        assert_eq!(machine.snapshot().unwrap().deadline, NOW + 10);
    }

    #[tokio::test]
    async fn fetch__reads_the_whole_batch() {
        // given
        let ledger = crate::test_helpers::FakeLedger::new();
        ledger.set_round(U256::from(7u64), NOW + 90, PerCategory::new(1, 2, 3));

        // when
        let snap = RoundSnapshot::fetch(&ledger).await.unwrap();

        // then
        assert_eq!(snap.round_id, U256::from(7u64));
        assert_eq!(snap.deadline, NOW + 90);
        assert_eq!(snap.order, PerCategory::new(1, 2, 3));
        assert!(snap.exists());
        assert!(!snap.has_own_build());
    }
}
