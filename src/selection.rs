//! Answers collected while the user walks the questionnaire.

use serde::Serialize;
use std::fmt;

use crate::resolver::Resolver;

/// Joins answer keys into a composite lookup key.
pub const KEY_SEP: char = '.';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    gender: Option<String>,
    age: Option<String>,
    lifestyle: Option<String>,
    refinement: Option<u8>,
}

impl Selection {
    pub fn with_gender(&self, gender: &str) -> Self {
        Self {
            gender: Some(gender.to_string()),
            ..self.clone()
        }
    }

    pub fn with_age(&self, age: &str) -> Self {
        Self {
            age: Some(age.to_string()),
            ..self.clone()
        }
    }

    pub fn with_lifestyle(&self, lifestyle: &str) -> Self {
        Self {
            lifestyle: Some(lifestyle.to_string()),
            ..self.clone()
        }
    }

    pub fn with_refinement_option(&self, option: u8) -> Self {
        Self {
            refinement: Some(option),
            ..self.clone()
        }
    }

    pub fn gender(&self) -> Option<&str> {
        self.gender.as_deref()
    }

    pub fn age(&self) -> Option<&str> {
        self.age.as_deref()
    }

    pub fn lifestyle(&self) -> Option<&str> {
        self.lifestyle.as_deref()
    }

    pub fn refinement_option(&self) -> Option<u8> {
        self.refinement
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `gender.age.lifestyle`, once all three answers are present.
pub fn triple_key(selection: &Selection) -> Option<CompositeKey> {
    let gender = selection.gender()?;
    let age = selection.age()?;
    let lifestyle = selection.lifestyle()?;
    Some(CompositeKey(format!(
        "{gender}{KEY_SEP}{age}{KEY_SEP}{lifestyle}"
    )))
}

/// Full result key. With the refinement step enabled the option number is
/// appended and required.
pub fn composite_key(selection: &Selection, resolver: &Resolver) -> Option<CompositeKey> {
    let triple = triple_key(selection)?;
    if !resolver.refinement_enabled() {
        return Some(triple);
    }
    let option = selection.refinement_option()?;
    Some(CompositeKey(format!("{triple}{KEY_SEP}{option}")))
}

pub fn refinement_arity(selection: &Selection, resolver: &Resolver) -> Option<u8> {
    let triple = triple_key(selection)?;
    resolver.arity(&triple)
}
