//! Localized text

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Language code → text, used for names and descriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct I18nString(BTreeMap<String, String>);

impl I18nString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-language text
    pub fn create(language: impl Into<String>, text: impl Into<String>) -> Self {
        let mut s = Self::new();
        s.set(language, text);
        s
    }

    pub fn set(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.0.insert(language.into().to_lowercase(), text.into());
    }

    pub fn with(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.set(language, text);
        self
    }

    pub fn get(&self, language: &str) -> Option<&str> {
        self.0.get(&language.to_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for I18nString {
    /// English first, otherwise the first language in code order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get("en").or_else(|| self.0.values().next().map(String::as_str)) {
            Some(text) => write!(f, "{}", text),
            None => Ok(()),
        }
    }
}
