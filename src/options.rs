use crate::{
    Result,
    ValidationError,
    catalog::{
        Category,
        Ingredient,
        IngredientCatalog,
        PerCategory,
    },
    fee::{
        compute_fee,
        fee_as_number,
    },
    identifier::{
        Identifier,
        short_seed,
    },
    ledger::{
        Block,
        BlockRef,
        BlockSource,
        CreateRoundArgs,
        RoundReader,
    },
    resolver::resolve,
};
use alloy::primitives::U256;
use itertools::Itertools;
use rand::{
    Rng,
    seq::SliceRandom,
};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateOption {
    pub identifier: Identifier,
    pub fee: Option<U256>,
    pub ingredient: Option<Ingredient>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionSource {
    /// Built from raw blocks, one block per category.
    Discovery { blocks: PerCategory<u64> },
    /// Read from the contract's published option arrays.
    Round { round_id: U256 },
}

/// Which recent blocks feed discovery mode, as offsets from the latest block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockSelection {
    offsets: PerCategory<u64>,
}

impl BlockSelection {
    /// Sauce = latest, cheese = latest - 1, topping = latest - 2.
    pub fn recent() -> Self {
        Self {
            offsets: PerCategory::new(0, 1, 2),
        }
    }

    /// Three blocks drawn from the last `window + 1` blocks.
    pub fn random(window: u64, rng: &mut impl Rng) -> Self {
        Self {
            offsets: PerCategory::from_fn(|_| rng.random_range(0..=window)),
        }
    }

    pub fn block_numbers(&self, latest: u64) -> PerCategory<u64> {
        self.offsets
            .map(|_, offset| latest.saturating_sub(offset).max(1))
    }
}

impl Default for BlockSelection {
    fn default() -> Self {
        Self::recent()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionSet {
    pub source: OptionSource,
    candidates: PerCategory<Vec<CandidateOption>>,
}

impl OptionSet {
    pub fn new(source: OptionSource, candidates: PerCategory<Vec<CandidateOption>>) -> Self {
        Self { source, candidates }
    }

    pub fn candidates(&self, category: Category) -> &[CandidateOption] {
        &self.candidates[category]
    }

    pub fn find(&self, category: Category, identifier: &Identifier) -> Option<&CandidateOption> {
        self.candidates[category]
            .iter()
            .find(|c| c.identifier == *identifier)
    }

    pub fn contains(&self, category: Category, identifier: &Identifier) -> bool {
        self.find(category, identifier).is_some()
    }

    pub fn is_discovery(&self) -> bool {
        matches!(self.source, OptionSource::Discovery { .. })
    }

    /// Arguments for publishing this set as a new round. Absent fees are
    /// published as zero.
    pub fn for_create_round(&self) -> Result<CreateRoundArgs> {
        let mut args = CreateRoundArgs::default();
        for (category, list) in self.candidates.iter() {
            if list.is_empty() {
                return Err(ValidationError::EmptyOptionSet(category).into());
            }
            args.hashes[category] = list.iter().map(|c| c.identifier).collect();
            args.fees[category] = list.iter().map(|c| c.fee.unwrap_or_default()).collect();
        }
        Ok(args)
    }

    /// A shuffled copy for presentation. The set itself is left untouched.
    pub fn presented<R: Rng + ?Sized>(&self, rng: &mut R) -> PerCategory<Vec<CandidateOption>> {
        self.candidates.clone().map(|_, mut list| {
            list.shuffle(rng);
            list
        })
    }

    fn log_fees(&self) {
        let entries = Category::ALL
            .iter()
            .flat_map(|category| {
                self.candidates[*category].iter().map(move |c| {
                    format!("{category}:{}={}", c.identifier, fee_as_number(c.fee))
                })
            })
            .join(", ");
        debug!(%entries, "transaction hashes and fees (sauce -> cheese -> topping)");
    }
}

/// Assembles per-category option lists for the current mode.
#[derive(Clone, Copy, Debug)]
pub struct OptionSetAggregator<'a> {
    catalog: &'a IngredientCatalog,
}

impl<'a> OptionSetAggregator<'a> {
    pub fn new(catalog: &'a IngredientCatalog) -> Self {
        Self { catalog }
    }

    /// One candidate per transaction of `block`, resolved from the call
    /// selector.
    pub fn block_candidates(&self, block: &Block, category: Category) -> Vec<CandidateOption> {
        block
            .transactions
            .iter()
            .map(|tx| CandidateOption {
                identifier: tx.hash,
                fee: compute_fee(tx, block),
                ingredient: resolve(self.catalog, short_seed(&tx.input).as_ref(), category)
                    .cloned(),
            })
            .collect()
    }

    /// Discovery mode. Blocks are fetched one after another.
    pub async fn discover<S: BlockSource>(
        &self,
        source: &S,
        selection: BlockSelection,
    ) -> Result<OptionSet> {
        let latest = source.block(BlockRef::Latest, false).await?;
        let numbers = selection.block_numbers(latest.number);
        let mut candidates: PerCategory<Vec<CandidateOption>> = PerCategory::default();
        for category in Category::ALL {
            let number = numbers[category];
            let block = source.block(BlockRef::Number(number), true).await?;
            debug!(%category, number, txs = block.transactions.len(), "fetched block");
            candidates[category] = self.block_candidates(&block, category);
        }
        let set = OptionSet::new(OptionSource::Discovery { blocks: numbers }, candidates);
        set.log_fees();
        Ok(set)
    }

    /// Round mode: the published options, resolved from their full
    /// identifiers so the result agrees with the contract.
    pub async fn from_round<R: RoundReader>(
        &self,
        reader: &R,
        round_id: U256,
        lengths: &PerCategory<u64>,
    ) -> Result<OptionSet> {
        let mut candidates: PerCategory<Vec<CandidateOption>> = PerCategory::default();
        for category in Category::ALL {
            let len = lengths[category];
            let mut list = Vec::new();
            for index in 0..len {
                let option = reader.round_option(category, index).await?;
                list.push(CandidateOption {
                    identifier: option.identifier,
                    fee: Some(option.fee),
                    ingredient: resolve(self.catalog, Some(&option.identifier), category)
                        .cloned(),
                });
            }
            candidates[category] = list;
        }
        Ok(OptionSet::new(OptionSource::Round { round_id }, candidates))
    }
}
