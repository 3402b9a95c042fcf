use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared::{error::BotError, protocol::TransformEvent};
use thiserror::Error;

pub const COMMAND_GET_ORIGINAL_PHOTO: &str = "Get original photo";
pub const COMMAND_RESET: &str = "<Reset>";
pub const COMMAND_RETRY: &str = "<Retry>";
pub const COMMAND_START: &str = "/start";

const RESERVED_LABELS: [&str; 4] = [
    COMMAND_GET_ORIGINAL_PHOTO,
    COMMAND_RESET,
    COMMAND_RETRY,
    COMMAND_START,
];

/// Reply keyboard layout, row by row.
pub type Keyboard = Vec<Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub label: String,
    pub layer: String,
    pub unit: u32,
}

impl CatalogEntry {
    pub fn new(label: impl Into<String>, layer: impl Into<String>, unit: u32) -> Self {
        Self {
            label: label.into(),
            layer: layer.into(),
            unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog has no transforms")]
    Empty,
    #[error("catalog row {row} is empty")]
    EmptyRow { row: usize },
    #[error("catalog row {row} contains an empty label")]
    EmptyLabel { row: usize },
    #[error("transform label {0:?} is used more than once")]
    DuplicateLabel(String),
    #[error("transform label {0:?} is reserved for a control command")]
    ReservedLabel(String),
    #[error("transform {label:?} has no layer name")]
    MissingLayer { label: String },
}

/// Immutable menu of transforms, grouped into presentation rows.
#[derive(Debug, Clone)]
pub struct TransformCatalog {
    rows: Vec<Vec<CatalogEntry>>,
    index: HashMap<String, (usize, usize)>,
}

impl TransformCatalog {
    pub fn new(rows: Vec<Vec<CatalogEntry>>) -> Result<Self, CatalogError> {
        if rows.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::new();
        for (row_idx, row) in rows.iter().enumerate() {
            if row.is_empty() {
                return Err(CatalogError::EmptyRow { row: row_idx });
            }
            for (col_idx, entry) in row.iter().enumerate() {
                if entry.label.trim().is_empty() {
                    return Err(CatalogError::EmptyLabel { row: row_idx });
                }
                if RESERVED_LABELS.contains(&entry.label.as_str()) {
                    return Err(CatalogError::ReservedLabel(entry.label.clone()));
                }
                if entry.layer.trim().is_empty() {
                    return Err(CatalogError::MissingLayer {
                        label: entry.label.clone(),
                    });
                }
                if index
                    .insert(entry.label.clone(), (row_idx, col_idx))
                    .is_some()
                {
                    return Err(CatalogError::DuplicateLabel(entry.label.clone()));
                }
            }
        }

        Ok(Self { rows, index })
    }

    pub fn builtin() -> Result<Self, CatalogError> {
        Self::new(builtin_rows())
    }

    pub fn lookup(&self, label: &str) -> Result<&CatalogEntry, BotError> {
        self.index
            .get(label)
            .map(|&(row, col)| &self.rows[row][col])
            .ok_or_else(|| BotError::NotFound {
                label: label.to_string(),
            })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(label)
    }

    pub fn rows(&self) -> &[Vec<CatalogEntry>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Control row, every transform row, then the original-photo row.
    pub fn keyboard(&self) -> Keyboard {
        let mut keyboard = Vec::with_capacity(self.rows.len() + 2);
        keyboard.push(vec![COMMAND_RESET.to_string(), COMMAND_RETRY.to_string()]);
        keyboard.extend(
            self.rows
                .iter()
                .map(|row| row.iter().map(|entry| entry.label.clone()).collect()),
        );
        keyboard.push(vec![COMMAND_GET_ORIGINAL_PHOTO.to_string()]);
        keyboard
    }

    /// Maps the text of a chat message onto the dispatcher's event alphabet.
    pub fn classify(&self, text: &str) -> TransformEvent {
        if text == COMMAND_START || text.starts_with("/start ") || text.starts_with("/start@") {
            return TransformEvent::Start;
        }
        if text == COMMAND_RESET {
            return TransformEvent::Reset;
        }
        if text == COMMAND_GET_ORIGINAL_PHOTO || text == COMMAND_RETRY || self.contains(text) {
            return TransformEvent::Command {
                label: text.to_string(),
            };
        }
        TransformEvent::Unknown {
            text: Some(text.to_string()),
        }
    }
}

const BUILTIN: &[&[(&str, &str, u32)]] = &[
    // buildings
    &[
        ("🏠 1", "mixed4d_3x3_bottleneck_pre_relu", 65),
        ("🏠 2", "mixed4d_3x3_bottleneck_pre_relu", 66),
        ("🏠 3", "mixed4b_3x3_pre_relu", 95),
        ("🏠 4", "mixed4e_pool_reduce_pre_relu", 26),
        ("🏠 5", "mixed4c_pool_reduce_pre_relu", 29),
    ],
    // flowers
    &[
        ("🌻 1", "mixed4d_3x3_bottleneck_pre_relu", 139),
        ("🌻 2", "mixed4c_3x3_pre_relu", 83),
        ("🌻 3", "mixed4c_3x3_pre_relu", 230),
        ("🌻 4", "mixed4d_3x3_pre_relu", 88),
        ("🌻 5", "mixed4c_pool_reduce_pre_relu", 41),
    ],
    // animals
    &[
        ("🐻 1", "mixed5a_5x5_pre_relu", 11),
        ("🐻 2", "mixed4e_pool_reduce_pre_relu", 27),
        ("🐻 3", "mixed5a_1x1_pre_relu", 0),
        ("🐻 4", "mixed5a_1x1_pre_relu", 1),
        ("🐻 5", "mixed5a_1x1_pre_relu", 81),
    ],
    // dogs
    &[
        ("🐕 1", "mixed4b_5x5_pre_relu", 55),
        ("🐕 2", "mixed4e_pool_reduce_pre_relu", 29),
        ("🐕 3", "mixed5a_3x3_bottleneck_pre_relu", 100),
        ("🐕 4", "mixed5a_1x1_pre_relu", 47),
        ("🐕 5", "mixed5a_1x1_pre_relu", 175),
    ],
    &[
        ("🐈 1", "mixed4d_5x5_pre_relu", 1),
        ("🐈 2", "mixed4e_pool_reduce_pre_relu", 105),
        ("🦋 1", "mixed5a_1x1_pre_relu", 63),
        ("🐟 1", "mixed5a_1x1_pre_relu", 158),
        ("🐒 1", "mixed5a_pool_reduce_pre_relu", 53),
    ],
    // birds
    &[
        ("🐦 1", "mixed5b_3x3_bottleneck_pre_relu", 91),
        ("🐦 2", "mixed5b_3x3_bottleneck_pre_relu", 166),
        ("🐦 3", "mixed5b_3x3_bottleneck_pre_relu", 167),
        ("🐦 4", "mixed4e_pool_reduce_pre_relu", 50),
        ("🐦 5", "mixed4e_pool_reduce_pre_relu", 57),
    ],
    &[
        ("🌟 1", "mixed3b_3x3_bottleneck_pre_relu", 109),
        ("⚽ 1", "mixed5a_1x1_pre_relu", 9),
        ("🎡 1", "mixed4c_pool_reduce_pre_relu", 1),
        ("🚗 1", "mixed4c_5x5_pre_relu", 14),
        ("🚗 2", "mixed4c_5x5_pre_relu", 63),
    ],
    &[
        ("🌪️ 1", "mixed4d_3x3_bottleneck_pre_relu", 84),
        ("🎆 1", "mixed4d_3x3_bottleneck_pre_relu", 50),
        ("Stones", "mixed4d_3x3_bottleneck_pre_relu", 38),
        ("⛰️ 1", "mixed4d_3x3_bottleneck_pre_relu", 142),
        ("✂️👂", "mixed4d_3x3_bottleneck_pre_relu", 1),
    ],
    // fears
    &[
        ("😱 1", "mixed5a_3x3_pre_relu", 174),
        ("😱 2", "mixed5a_3x3_pre_relu", 190),
        ("😱 3", "mixed4d_3x3_bottleneck_pre_relu", 88),
        ("😱 4", "mixed4e_pool_reduce_pre_relu", 101),
        ("😱 5", "mixed5a_1x1_pre_relu", 3),
    ],
];

pub fn builtin_rows() -> Vec<Vec<CatalogEntry>> {
    BUILTIN
        .iter()
        .map(|row| {
            row.iter()
                .map(|&(label, layer, unit)| CatalogEntry::new(label, layer, unit))
                .collect()
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
