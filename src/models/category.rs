use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Primary product category as published by the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    Vegetables,
    Fruit,
    MeatPoultryEggs,
    Seafood,
    GrainOil,
    SoyProducts,
    Seasonings,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Vegetables,
        Category::Fruit,
        Category::MeatPoultryEggs,
        Category::Seafood,
        Category::GrainOil,
        Category::SoyProducts,
        Category::Seasonings,
    ];

    /// Name used by the site, in the `prodCat` parameter and in exports.
    pub fn name(self) -> &'static str {
        match self {
            Category::Vegetables => "蔬菜",
            Category::Fruit => "水果",
            Category::MeatPoultryEggs => "肉禽蛋",
            Category::Seafood => "水产",
            Category::GrainOil => "粮油",
            Category::SoyProducts => "豆制品",
            Category::Seasonings => "调料",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| AppError::InvalidCategory(s.to_string()))
    }
}

impl TryFrom<String> for Category {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.name().to_string()
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Set of categories a run is restricted to. Empty means "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    categories: BTreeSet<Category>,
}

impl CategoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Exact match on the site's category name.
    pub fn allows(&self, category_name: &str) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|c| c.name() == category_name)
    }

    /// A single-category filter can also be pushed down to the site.
    pub fn single(&self) -> Option<Category> {
        match self.categories.len() {
            1 => self.categories.iter().next().copied(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories.iter().copied()
    }
}

impl FromIterator<Category> for CategoryFilter {
    fn from_iter<T: IntoIterator<Item = Category>>(iter: T) -> Self {
        Self {
            categories: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.categories.is_empty() {
            return f.write_str("全部");
        }
        let names: Vec<&str> = self.categories.iter().map(|c| c.name()).collect();
        f.write_str(&names.join(","))
    }
}
