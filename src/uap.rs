//! User Application Profiles.
//!
//! A UAP describes, per category, the ordered list of data items a record
//! may carry and the wire shape of each item. Profiles are produced by an
//! external loader and handed to the codec as an immutable
//! [`CategoryRegistry`]; nothing in this crate reads profile source files.

use std::collections::HashMap;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// ASTERIX category number, e.g. 48 for monoradar target reports.
pub type Category = u8;

/// Wire shape of a single data item.
///
/// The set is closed on purpose: the codec matches on it exhaustively, and
/// every shape a standard category uses maps onto one of these six.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// A constant number of bytes.
    Fixed { len: usize },
    /// Fixed-size groups chained by a continuation bit in the low-order
    /// position of each group's final byte; set means another group follows.
    Extended { group_len: usize },
    /// A leading length byte followed by that many payload bytes.
    Variable,
    /// A leading repetition count byte followed by that many identically
    /// shaped sub-items.
    Repetitive { item: Box<FieldSpec> },
    /// A secondary presence bitmap selecting which of the declared
    /// subfields follow.
    Compound { parts: Vec<FieldSpec> },
    /// A leading length byte counting the whole item including itself. The
    /// payload stays raw unless a sub-interpretation is declared.
    Explicit { inner: Option<Box<FieldSpec>> },
}

/// Declaration of one data item within a category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Item identifier, e.g. `"010"` for I048/010.
    pub id: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        FieldSpec {
            id: id.into(),
            kind,
        }
    }
}

/// Ordered field layout for one category.
///
/// Field order matters: the first FSPEC presence bit refers to the first
/// field in `fields`, and encoded records emit fields in this order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub category: Category,
    pub fields: Vec<FieldSpec>,
}

impl CategorySpec {
    pub fn new(category: Category, fields: Vec<FieldSpec>) -> Self {
        CategorySpec { category, fields }
    }

    /// Look up a top-level field declaration by identifier.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Check the layout for structural defects: duplicate identifiers at
    /// any one level, zero-length fixed or extended items, and compound
    /// items with no subfields.
    ///
    /// The codec assumes validated specs; feeding it an invalid one gives
    /// errors blamed on the data rather than the profile.
    ///
    /// # Errors
    /// [`Error::InvalidSpec`] naming the first defect found.
    pub fn validate(&self) -> Result<()> {
        validate_level(self.category, &self.fields)
    }
}

fn validate_level(category: Category, fields: &[FieldSpec]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for field in fields {
        if !seen.insert(&field.id) {
            return Err(Error::InvalidSpec {
                category,
                reason: format!("duplicate item identifier {}", field.id),
            });
        }
        validate_field(category, field)?;
    }
    Ok(())
}

fn validate_field(category: Category, field: &FieldSpec) -> Result<()> {
    match &field.kind {
        FieldKind::Fixed { len: 0 } => Err(Error::InvalidSpec {
            category,
            reason: format!("fixed item {} has zero length", field.id),
        }),
        FieldKind::Extended { group_len: 0 } => Err(Error::InvalidSpec {
            category,
            reason: format!("extended item {} has zero group length", field.id),
        }),
        FieldKind::Repetitive { item } => validate_field(category, item),
        FieldKind::Compound { parts } => {
            if parts.is_empty() {
                return Err(Error::InvalidSpec {
                    category,
                    reason: format!("compound item {} declares no subfields", field.id),
                });
            }
            validate_level(category, parts)
        }
        FieldKind::Explicit { inner: Some(inner) } => validate_field(category, inner),
        _ => Ok(()),
    }
}

/// Lookup table of category specs, built once at startup and shared
/// read-only with every codec call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryRegistry {
    specs: HashMap<Category, CategorySpec>,
}

impl CategoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        CategoryRegistry::default()
    }

    /// Build a registry from a collection of specs. Later specs replace
    /// earlier ones for the same category.
    pub fn from_specs<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = CategorySpec>,
    {
        let mut registry = CategoryRegistry::new();
        for spec in specs {
            registry.register(spec);
        }
        registry
    }

    /// Register `spec`, returning the spec it replaces, if any.
    pub fn register(&mut self, spec: CategorySpec) -> Option<CategorySpec> {
        self.specs.insert(spec.category, spec)
    }

    #[must_use]
    pub fn get(&self, category: Category) -> Option<&CategorySpec> {
        self.specs.get(&category)
    }

    /// Registered category numbers in ascending order.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let mut cats: Vec<Category> = self.specs.keys().copied().collect();
        cats.sort_unstable();
        cats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
