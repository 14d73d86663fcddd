// src/conversation/listing.rs
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A field of a step-by-step form. `ALL` is the collection order.
pub trait FormField: Copy + Eq + 'static {
    const ALL: &'static [Self];

    fn label(self) -> &'static str;

    fn question(self) -> &'static str;

    /// Fields that accept "-" for "not provided".
    fn optional(self) -> bool {
        false
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }

    fn first() -> Self {
        Self::ALL[0]
    }

    /// 1-based step number.
    fn number(self) -> usize {
        self.index() + 1
    }

    fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

/// Job listing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingField {
    Position,
    Company,
    Location,
    Salary,
    Experience,
    Description,
    Requirements,
    Conditions,
    Contact,
}

impl FormField for ListingField {
    const ALL: &'static [Self] = &[
        Self::Position,
        Self::Company,
        Self::Location,
        Self::Salary,
        Self::Experience,
        Self::Description,
        Self::Requirements,
        Self::Conditions,
        Self::Contact,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Position => "🧑‍💻 Position",
            Self::Company => "🏢 Company",
            Self::Location => "📍 Location",
            Self::Salary => "💰 Salary",
            Self::Experience => "🧪 Experience",
            Self::Description => "📝 Description",
            Self::Requirements => "✅ Requirements",
            Self::Conditions => "🎁 Conditions",
            Self::Contact => "📬 Contact",
        }
    }

    fn question(self) -> &'static str {
        match self {
            Self::Position => "What is the position title?",
            Self::Company => "Which company is hiring?",
            Self::Location => "Where is the job located (city, remote, hybrid)?",
            Self::Salary => "What is the salary range?",
            Self::Experience => "How much experience is required?",
            Self::Description => "Describe the role and its main tasks.",
            Self::Requirements => "List the key requirements.",
            Self::Conditions => "What are the working conditions and benefits?",
            Self::Contact => "How should candidates apply (contact)?",
        }
    }
}

/// Advertisement fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdField {
    Title,
    Brand,
    Description,
    Offer,
    Link,
    Contact,
}

impl FormField for AdField {
    const ALL: &'static [Self] = &[
        Self::Title,
        Self::Brand,
        Self::Description,
        Self::Offer,
        Self::Link,
        Self::Contact,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Title => "🔖 Title",
            Self::Brand => "🏷️ Brand",
            Self::Description => "📝 Description",
            Self::Offer => "🎁 Offer",
            Self::Link => "🔗 Link",
            Self::Contact => "📞 Contact",
        }
    }

    fn question(self) -> &'static str {
        match self {
            Self::Title => "What is the headline?",
            Self::Brand => "Which brand or company is it for?",
            Self::Description => "Briefly describe the product or service.",
            Self::Offer => "What is the offer (discount, bonus, benefits)?",
            Self::Link => "Link to the offer (send - if there is none).",
            Self::Contact => "Contact for questions?",
        }
    }

    fn optional(self) -> bool {
        self == Self::Link
    }
}

/// A form being assembled field by field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form<F> {
    values: Vec<Option<String>>,
    _fields: PhantomData<F>,
}

pub type Listing = Form<ListingField>;
pub type Ad = Form<AdField>;

impl<F: FormField> Default for Form<F> {
    fn default() -> Self {
        Self {
            values: vec![None; F::ALL.len()],
            _fields: PhantomData,
        }
    }
}

impl<F: FormField> Form<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optional fields store "-" as an empty value.
    pub fn set(&mut self, field: F, value: &str) {
        let value = value.trim();
        let value = if field.optional() && value == "-" { "" } else { value };
        self.values[field.index()] = Some(value.to_string());
    }

    pub fn get(&self, field: F) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|v| v.is_some())
    }

    /// Labelled lines, one per non-empty field, in collection order.
    pub fn render(&self) -> String {
        F::ALL
            .iter()
            .filter_map(|f| {
                self.get(*f)
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{}: {}", f.label(), v))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
