use crate::{
    catalog::{
        Ingredient,
        IngredientCatalog,
        PerCategory,
    },
    round::RoundSnapshot,
};

/// The hidden target order, one ingredient per category.
pub type ComposedOrder = PerCategory<Option<Ingredient>>;

/// Looks the published order indices up in the catalog.
///
/// The contract publishes plain enum indices here, so there is no hashing
/// involved. [`crate::resolver`] must not be used for this.
pub fn compose_order(
    catalog: &IngredientCatalog,
    round: Option<&RoundSnapshot>,
) -> ComposedOrder {
    match round.filter(|r| r.exists()) {
        None => PerCategory::default(),
        Some(round) => round
            .order
            .map(|category, index| catalog.get(category, usize::from(index)).cloned()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        catalog::Category,
        test_helpers::snapshot,
    };
    use alloy::primitives::U256;

    #[test]
    fn compose_order__is_empty_without_a_round() {
        let catalog = IngredientCatalog::default();
        assert_eq!(compose_order(&catalog, None), PerCategory::default());

        let idle = snapshot(U256::ZERO, 0);
        assert_eq!(compose_order(&catalog, Some(&idle)), PerCategory::default());
    }

    #[test]
    fn compose_order__indexes_catalog_directly() {
        // given
        let catalog = IngredientCatalog::default();
        let mut round = snapshot(U256::from(3u64), 1_000);
        round.order = PerCategory::new(2, 3, 7);

        // when
        let order = compose_order(&catalog, Some(&round));

        // then
        assert_eq!(order[Category::Sauce].as_ref().unwrap().id, "pesto");
        assert_eq!(order[Category::Cheese].as_ref().unwrap().id, "ricotta");
        assert_eq!(order[Category::Topping].as_ref().unwrap().id, "pineapple");
    }

    #[test]
    fn compose_order__leaves_out_of_range_index_absent() {
        let catalog = IngredientCatalog::default();
        let mut round = snapshot(U256::from(1u64), 1_000);
        // cheese has 4 entries; 9 is not reduced modulo the length
        round.order = PerCategory::new(0, 9, 0);

        let order = compose_order(&catalog, Some(&round));

        assert_eq!(order.cheese, None);
        assert_eq!(order.sauce.unwrap().id, "tomato");
    }
}
