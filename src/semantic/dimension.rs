//! Dimension Definition
//!
//! A dimension is a grouping key: one or more columns of a catalog table that a
//! metric can be broken down by ("by category", "per country").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDef {
    pub name: String,
    pub label: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl DimensionDef {
    pub fn new(name: &str, label: &str, table: &str, columns: &[&str], synonyms: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            synonyms,
        }
    }

    /// Output alias of one grouped column.
    ///
    /// Single-column dimensions use the dimension name, wider ones prefix each
    /// column with it (`stream_id`, `stream_title`).
    pub fn alias_for(&self, column: &str) -> String {
        if self.columns.len() == 1 {
            self.name.clone()
        } else {
            format!("{}_{}", self.name, column)
        }
    }
}

/// Expand grouping nouns into the phrases streamers use for them.
///
/// `grouping_phrases(&["category"], &["categories"])` yields "by category",
/// "per category", ..., plus the bare plural "categories".
pub fn grouping_phrases(singular: &[&str], plural: &[&str]) -> Vec<String> {
    const CUES: [&str; 8] = ["by", "per", "each", "every", "across", "for each", "which", "what"];

    let mut phrases = Vec::new();
    for noun in singular {
        for cue in CUES {
            phrases.push(format!("{} {}", cue, noun));
        }
    }
    for noun in plural {
        phrases.push(format!("by {}", noun));
        phrases.push(format!("across {}", noun));
        phrases.push(noun.to_string());
    }
    phrases
}
