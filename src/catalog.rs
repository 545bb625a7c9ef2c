use crate::{
    Error,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    ops::{
        Index,
        IndexMut,
    },
    path::Path,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sauce,
    Cheese,
    Topping,
}

impl Category {
    /// Declaration order. The build call uses a different order, see
    /// [`crate::ledger::BuildArgs`].
    pub const ALL: [Category; 3] = [Category::Sauce, Category::Cheese, Category::Topping];

    pub fn name(self) -> &'static str {
        match self {
            Category::Sauce => "sauce",
            Category::Cheese => "cheese",
            Category::Topping => "topping",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per category.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerCategory<T> {
    pub sauce: T,
    pub cheese: T,
    pub topping: T,
}

impl<T> PerCategory<T> {
    pub fn new(sauce: T, cheese: T, topping: T) -> Self {
        Self {
            sauce,
            cheese,
            topping,
        }
    }

    pub fn from_fn(mut f: impl FnMut(Category) -> T) -> Self {
        Self {
            sauce: f(Category::Sauce),
            cheese: f(Category::Cheese),
            topping: f(Category::Topping),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Category, T) -> U) -> PerCategory<U> {
        PerCategory {
            sauce: f(Category::Sauce, self.sauce),
            cheese: f(Category::Cheese, self.cheese),
            topping: f(Category::Topping, self.topping),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &T)> {
        Category::ALL.into_iter().map(move |category| (category, &self[category]))
    }
}

impl<T> Index<Category> for PerCategory<T> {
    type Output = T;

    fn index(&self, category: Category) -> &T {
        match category {
            Category::Sauce => &self.sauce,
            Category::Cheese => &self.cheese,
            Category::Topping => &self.topping,
        }
    }
}

impl<T> IndexMut<Category> for PerCategory<T> {
    fn index_mut(&mut self, category: Category) -> &mut T {
        match category {
            Category::Sauce => &mut self.sauce,
            Category::Cheese => &mut self.cheese,
            Category::Topping => &mut self.topping,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub label: String,
    pub icon: String,
    pub category: Category,
}

impl Ingredient {
    pub fn new(category: Category, id: &str, label: &str, icon: &str) -> Self {
        Self {
            id: id.to_owned(),
            label: label.to_owned(),
            icon: icon.to_owned(),
            category,
        }
    }
}

impl fmt::Display for Ingredient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.icon, self.label)
    }
}

/// The selectable ingredients of each category.
///
/// Index order matters: it has to match the contract's enum order, since the
/// contract publishes the hidden order as plain indices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientCatalog {
    entries: PerCategory<Vec<Ingredient>>,
}

impl IngredientCatalog {
    pub fn new(entries: PerCategory<Vec<Ingredient>>) -> Result<Self> {
        for (category, list) in entries.iter() {
            if let Some(bad) = list.iter().find(|i| i.category != category) {
                return Err(Error::Config(format!(
                    "ingredient '{}' is tagged {} but listed under {}",
                    bad.id, bad.category, category
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read catalog {}: {e}", path.display()))
        })?;
        let entries: PerCategory<Vec<Ingredient>> = serde_json::from_slice(&data)
            .map_err(|e| {
                Error::Config(format!("invalid catalog {}: {e}", path.display()))
            })?;
        Self::new(entries)
    }

    pub fn ingredients(&self, category: Category) -> &[Ingredient] {
        &self.entries[category]
    }

    pub fn len(&self, category: Category) -> usize {
        self.entries[category].len()
    }

    pub fn is_empty(&self, category: Category) -> bool {
        self.entries[category].is_empty()
    }

    pub fn get(&self, category: Category, index: usize) -> Option<&Ingredient> {
        self.entries[category].get(index)
    }
}

impl Default for IngredientCatalog {
    fn default() -> Self {
        use Category::*;
        let sauce = [
            ("tomato", "Tomato", "🍅"),
            ("alfredo", "Alfredo", "🥛"),
            ("pesto", "Pesto", "🌿"),
            ("bbq", "BBQ", "🍖"),
            ("buffalo", "Buffalo", "🌶️"),
            ("garlic", "Garlic", "🧄"),
            ("white", "White", "⚪"),
            ("marinara", "Marinara", "🥫"),
        ];
        let cheese = [
            ("mozzarella", "Mozzarella", "🧀"),
            ("cheddar", "Cheddar", "🧀"),
            ("parmesan", "Parmesan", "🧀"),
            ("ricotta", "Ricotta", "🧀"),
        ];
        let topping = [
            ("pepperoni", "Pepperoni", "🍖"),
            ("mushrooms", "Mushrooms", "🍄"),
            ("onions", "Onions", "🧅"),
            ("sausage", "Sausage", "🌭"),
            ("bacon", "Bacon", "🥓"),
            ("olives", "Olives", "🫒"),
            ("peppers", "Peppers", "🫑"),
            ("pineapple", "Pineapple", "🍍"),
        ];
        let build = |category: Category, items: &[(&str, &str, &str)]| {
            items
                .iter()
                .map(|(id, label, icon)| Ingredient::new(category, id, label, icon))
                .collect::<Vec<_>>()
        };
        Self {
            entries: PerCategory::new(
                build(Sauce, &sauce),
                build(Cheese, &cheese),
                build(Topping, &topping),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn default__matches_contract_enum_lengths() {
        let catalog = IngredientCatalog::default();
        assert_eq!(catalog.len(Category::Sauce), 8);
        assert_eq!(catalog.len(Category::Cheese), 4);
        assert_eq!(catalog.len(Category::Topping), 8);
        assert_eq!(catalog.get(Category::Topping, 7).unwrap().id, "pineapple");
    }

    #[test]
    fn new__rejects_ingredient_listed_under_wrong_category() {
        // given
        let entries = PerCategory::new(
            vec![Ingredient::new(Category::Cheese, "cheddar", "Cheddar", "🧀")],
            Vec::new(),
            Vec::new(),
        );

        // when
        let result = IngredientCatalog::new(entries);

        // then
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load__reads_json_catalog() {
        // given
        let path = std::env::temp_dir()
            .join(format!("pizza-forge-catalog-{}.json", std::process::id()));
        let entries = PerCategory::new(
            vec![Ingredient::new(Category::Sauce, "tomato", "Tomato", "🍅")],
            vec![Ingredient::new(Category::Cheese, "feta", "Feta", "🧀")],
            Vec::new(),
        );
        fs::write(&path, serde_json::to_vec(&entries).unwrap()).unwrap();

        // when
        let catalog = IngredientCatalog::load(&path).unwrap();
        let _ = fs::remove_file(&path);

        // then
        assert_eq!(catalog.len(Category::Cheese), 1);
        assert!(catalog.is_empty(Category::Topping));
    }

    #[test]
    fn per_category__indexes_by_category() {
        let mut counts = PerCategory::from_fn(|c| c.name().len());
        counts[Category::Topping] += 1;
        assert_eq!(counts, PerCategory::new(5, 6, 8));
    }
}
