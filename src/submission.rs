use crate::{
    Result,
    ValidationError,
    catalog::{
        Category,
        PerCategory,
    },
    identifier::Identifier,
    ledger::{
        BuildArgs,
        CallHash,
        RoundWriter,
    },
    options::OptionSet,
    round::{
        PendingKind,
        RoundPhase,
    },
};
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionState {
    /// Build call waiting for its receipt.
    pub pending: Option<CallHash>,
    pub confirmed: bool,
    /// Set once a build went through; only a round transition clears it.
    pub awaiting_finalize: bool,
    pub last_error: Option<String>,
}

/// Player's selection and the build call made from it.
#[derive(Clone, Debug, Default)]
pub struct SubmissionCoordinator {
    selection: PerCategory<Option<Identifier>>,
    state: SubmissionState,
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> &PerCategory<Option<Identifier>> {
        &self.selection
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    /// Selecting the current choice again clears it; anything else replaces it.
    pub fn select(&mut self, identifier: Identifier, category: Category) {
        let slot = &mut self.selection[category];
        if *slot == Some(identifier) {
            *slot = None;
        } else {
            *slot = Some(identifier);
        }
    }

    pub fn reset(&mut self) {
        self.selection = PerCategory::default();
    }

    /// Drops the selection and the submission state, for a new round.
    pub fn clear_all(&mut self) {
        self.selection = PerCategory::default();
        self.state = SubmissionState::default();
    }

    pub fn mark_awaiting_finalize(&mut self) {
        self.state.awaiting_finalize = true;
    }

    pub fn validate(
        &self,
        phase: RoundPhase,
        options: &OptionSet,
    ) -> std::result::Result<BuildArgs, ValidationError> {
        if self.state.pending.is_some() {
            return Err(ValidationError::CallPending);
        }
        let mut chosen = PerCategory::<Identifier>::default();
        for category in Category::ALL {
            chosen[category] = self.selection[category]
                .ok_or(ValidationError::MissingSelection(category))?;
        }
        if !phase.allows(PendingKind::Build) {
            return Err(ValidationError::RoundWindow {
                action: PendingKind::Build.action(),
                phase: phase.name(),
            });
        }
        for (category, identifier) in chosen.iter() {
            if !options.contains(category, identifier) {
                return Err(ValidationError::UnknownCandidate {
                    category,
                    identifier: identifier.to_string(),
                });
            }
        }
        Ok(BuildArgs::from_selection(&chosen))
    }

    /// Validates, then sends the build call. Nothing is sent when validation
    /// fails.
    pub async fn submit<W: RoundWriter>(
        &mut self,
        writer: &W,
        phase: RoundPhase,
        options: &OptionSet,
    ) -> Result<CallHash> {
        let args = self.validate(phase, options)?;
        match writer.build_order(args).await {
            Ok(hash) => {
                info!(
                    %hash,
                    topping = %args.topping,
                    sauce = %args.sauce,
                    cheese = %args.cheese,
                    "build submitted"
                );
                self.state.pending = Some(hash);
                self.state.confirmed = false;
                self.state.awaiting_finalize = true;
                self.state.last_error = None;
                Ok(hash)
            }
            Err(e) => {
                warn!(error = %e, "build call rejected");
                self.state.last_error = Some(e.human_message());
                Err(e)
            }
        }
    }

    /// Returns `true` if `hash` was this coordinator's build call.
    pub fn on_confirmed(&mut self, hash: CallHash) -> bool {
        if self.state.pending != Some(hash) {
            return false;
        }
        self.state.pending = None;
        self.state.confirmed = true;
        true
    }

    pub fn on_failed(&mut self, hash: CallHash, message: String) -> bool {
        if self.state.pending != Some(hash) {
            return false;
        }
        self.state.pending = None;
        self.state.awaiting_finalize = false;
        self.state.last_error = Some(message);
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        Error,
        test_helpers::{
            FakeLedger,
            LedgerCall,
            option_set,
        },
    };
    use alloy::primitives::B256;

    fn id(n: u8) -> Identifier {
        Identifier::new([n; 32])
    }

    fn select_all(coordinator: &mut SubmissionCoordinator) {
        coordinator.select(id(1), Category::Sauce);
        coordinator.select(id(2), Category::Cheese);
        coordinator.select(id(3), Category::Topping);
    }

    #[test]
    fn select__twice_with_same_identifier_clears() {
        // given
        let mut coordinator = SubmissionCoordinator::new();

        // when
        coordinator.select(id(1), Category::Sauce);
        coordinator.select(id(1), Category::Sauce);

        // then
        assert_eq!(coordinator.selection().sauce, None);
    }

    #[test]
    fn select__different_identifier_replaces() {
        let mut coordinator = SubmissionCoordinator::new();
        coordinator.select(id(1), Category::Cheese);
        coordinator.select(id(2), Category::Cheese);
        assert_eq!(coordinator.selection().cheese, Some(id(2)));
        assert_eq!(coordinator.selection().sauce, None);
    }

    #[test]
    fn reset__clears_selection_but_keeps_state() {
        let mut coordinator = SubmissionCoordinator::new();
        select_all(&mut coordinator);
        coordinator.mark_awaiting_finalize();

        coordinator.reset();

        assert_eq!(coordinator.selection(), &PerCategory::default());
        assert!(coordinator.state().awaiting_finalize);
    }

    #[tokio::test]
    async fn submit__incomplete_selection_makes_no_call() {
        // given
        let ledger = FakeLedger::new();
        let options = option_set([id(1)], [id(2)], [id(3)]);
        let mut coordinator = SubmissionCoordinator::new();
        coordinator.select(id(1), Category::Sauce);
        coordinator.select(id(3), Category::Topping);

        // when
        let result = coordinator
            .submit(&ledger, RoundPhase::RoundActive, &options)
            .await;

        // then
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingSelection(
                Category::Cheese
            )))
        ));
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn submit__expired_round_makes_no_call() {
        let ledger = FakeLedger::new();
        let options = option_set([id(1)], [id(2)], [id(3)]);
        let mut coordinator = SubmissionCoordinator::new();
        select_all(&mut coordinator);

        let result = coordinator
            .submit(&ledger, RoundPhase::RoundExpired, &options)
            .await;

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::RoundWindow { .. }))
        ));
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn submit__unknown_candidate_makes_no_call() {
        let ledger = FakeLedger::new();
        let options = option_set([id(1)], [id(2)], [id(9)]);
        let mut coordinator = SubmissionCoordinator::new();
        select_all(&mut coordinator);

        let result = coordinator
            .submit(&ledger, RoundPhase::RoundActive, &options)
            .await;

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::UnknownCandidate {
                category: Category::Topping,
                ..
            }))
        ));
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn submit__sends_topping_sauce_cheese() {
        // given
        let ledger = FakeLedger::new();
        let options = option_set([id(1)], [id(2)], [id(3)]);
        let mut coordinator = SubmissionCoordinator::new();
        select_all(&mut coordinator);

        // when
        let hash = coordinator
            .submit(&ledger, RoundPhase::RoundActive, &options)
            .await
            .unwrap();

        // then
        assert_eq!(
            ledger.calls(),
            vec![LedgerCall::BuildOrder(BuildArgs {
                topping: id(3),
                sauce: id(1),
                cheese: id(2),
            })]
        );
        assert_eq!(coordinator.state().pending, Some(hash));
        assert!(coordinator.state().awaiting_finalize);
    }

    #[tokio::test]
    async fn submit__keeps_rejection_message() {
        let ledger = FakeLedger::new();
        ledger.reject_next_call("execution reverted: already built");
        let options = option_set([id(1)], [id(2)], [id(3)]);
        let mut coordinator = SubmissionCoordinator::new();
        select_all(&mut coordinator);

        let result = coordinator
            .submit(&ledger, RoundPhase::RoundActive, &options)
            .await;

        assert!(matches!(result, Err(Error::CallRejected(_))));
        assert_eq!(
            coordinator.state().last_error.as_deref(),
            Some("execution reverted: already built")
        );
        assert_eq!(coordinator.state().pending, None);
    }

    #[test]
    fn on_confirmed__ignores_other_hashes() {
        let mut coordinator = SubmissionCoordinator::new();
        coordinator.state.pending = Some(B256::repeat_byte(5));

        assert!(!coordinator.on_confirmed(B256::repeat_byte(6)));
        assert!(coordinator.on_confirmed(B256::repeat_byte(5)));
        assert!(coordinator.state().confirmed);
        assert_eq!(coordinator.state().pending, None);
    }

    #[test]
    fn clear_all__drops_selection_and_state() {
        let mut coordinator = SubmissionCoordinator::new();
        select_all(&mut coordinator);
        coordinator.mark_awaiting_finalize();

        coordinator.clear_all();

        assert_eq!(coordinator.selection(), &PerCategory::default());
        assert_eq!(coordinator.state(), &SubmissionState::default());
    }
}
