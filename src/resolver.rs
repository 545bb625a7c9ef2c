use crate::{
    catalog::{
        Category,
        Ingredient,
        IngredientCatalog,
    },
    identifier::Identifier,
};
use alloy::primitives::U256;

/// Index of `identifier` in a catalog of `len` entries: `identifier mod len`.
///
/// Same formula as the contract's `hashToSauce`/`hashToCheese`/`hashToTopping`.
pub fn resolve_index(identifier: &Identifier, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let index = identifier.as_u256() % U256::from(len);
    // index < len, so it always fits
    usize::try_from(index).ok()
}

pub fn resolve<'a>(
    catalog: &'a IngredientCatalog,
    identifier: Option<&Identifier>,
    category: Category,
) -> Option<&'a Ingredient> {
    let index = resolve_index(identifier?, catalog.len(category))?;
    catalog.get(category, index)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::catalog::PerCategory;
    use proptest::prelude::*;

    #[test]
    fn resolve__picks_second_entry_for_nine_mod_eight() {
        // given
        let catalog = IngredientCatalog::default();
        let id: Identifier = "0x09".parse().unwrap();

        // when
        let sauce = resolve(&catalog, Some(&id), Category::Sauce).unwrap();

        // then
        assert_eq!(sauce.id, "alfredo");
    }

    #[test]
    fn resolve__is_width_agnostic_after_normalization() {
        let catalog = IngredientCatalog::default();
        let seed = Identifier::from_selector([0, 0, 0, 9]);
        let full: Identifier = "9".parse().unwrap();
        assert_eq!(
            resolve(&catalog, Some(&seed), Category::Cheese),
            resolve(&catalog, Some(&full), Category::Cheese)
        );
    }

    #[test]
    fn resolve__is_absent_for_empty_catalog_or_missing_identifier() {
        let catalog = IngredientCatalog::new(PerCategory::new(
            IngredientCatalog::default().ingredients(Category::Sauce).to_vec(),
            Vec::new(),
            Vec::new(),
        ))
        .unwrap();
        let id = Identifier::new([0xff; 32]);
        assert_eq!(resolve(&catalog, Some(&id), Category::Cheese), None);
        assert_eq!(resolve(&catalog, None, Category::Sauce), None);
    }

    #[test]
    fn resolve_index__uses_full_256_bit_value() {
        // 2^255 mod 3 == 2
        let id = Identifier::from(U256::from(1u64) << 255usize);
        assert_eq!(resolve_index(&id, 3), Some(2));
    }

    proptest! {
        #[test]
        fn resolve_index__matches_big_integer_modulo(
            bytes in any::<[u8; 32]>(),
            len in 1usize..64,
        ) {
            let id = Identifier::new(bytes);
            let expected = U256::from_be_bytes(bytes) % U256::from(len);
            let index = resolve_index(&id, len).unwrap();
            prop_assert_eq!(U256::from(index), expected);
            prop_assert_eq!(resolve_index(&id, len), Some(index));
        }
    }
}
