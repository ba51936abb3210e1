//! Name cleaning for drivers that reject `%`, `(` and `)` in identifiers.

use tracing::info;

use crate::error::{Result, UpsertError};
use crate::frame::Frame;
use crate::schema::BAD_NAME_CHARS;

/// What each forbidden character is replaced with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadCharReplacements {
    /// Replacement for `%`.
    pub percent: String,
    /// Replacement for `(`.
    pub open_paren: String,
    /// Replacement for `)`.
    pub close_paren: String,
}

impl BadCharReplacements {
    /// Same replacement for all three characters.
    #[must_use]
    pub fn uniform(replacement: impl Into<String>) -> Self {
        let replacement = replacement.into();
        Self {
            percent: replacement.clone(),
            open_paren: replacement.clone(),
            close_paren: replacement,
        }
    }

    fn validate(&self) -> Result<()> {
        for replacement in [&self.percent, &self.open_paren, &self.close_paren] {
            if replacement.contains(BAD_NAME_CHARS) {
                return Err(UpsertError::InvalidArgument(format!(
                    "replacement {replacement:?} contains one of the characters it replaces"
                )));
            }
        }
        Ok(())
    }

    fn clean(&self, name: &str) -> String {
        let mut cleaned = String::with_capacity(name.len());
        for c in name.chars() {
            match c {
                '%' => cleaned.push_str(&self.percent),
                '(' => cleaned.push_str(&self.open_paren),
                ')' => cleaned.push_str(&self.close_paren),
                other => cleaned.push(other),
            }
        }
        cleaned
    }
}

/// Returns a copy of `frame` with `%`, `(` and `)` replaced in every key
/// level and column name.
///
/// ```rust
/// use oxide_upsert::prelude::*;
///
/// let frame = Frame::new(
///     vec![Column::new("id", [1_i64])],
///     vec![Column::new("total (%)", [0.5])],
/// )
/// .unwrap();
/// let fixed = fix_bad_column_names(&frame, &BadCharReplacements::default()).unwrap();
/// assert_eq!(fixed.column_names(), vec!["total "]);
/// ```
///
/// # Errors
///
/// Fails if a key level is unnamed, if names collide before or after the
/// replacement, or if a replacement contains one of the replaced characters.
pub fn fix_bad_column_names(frame: &Frame, replacements: &BadCharReplacements) -> Result<Frame> {
    replacements.validate()?;

    let unnamed: Vec<usize> = frame
        .index_names()
        .iter()
        .enumerate()
        .filter(|(_, name)| name.is_none())
        .map(|(i, _)| i)
        .collect();
    if !unnamed.is_empty() {
        return Err(UpsertError::UnnamedIndexLevels {
            positions: unnamed,
        });
    }

    let labels = frame.duplicated_labels();
    if !labels.is_empty() {
        return Err(UpsertError::DuplicateLabels { labels });
    }

    for label in frame.labels() {
        let cleaned = replacements.clean(label);
        if cleaned != label {
            info!(from = %label, to = %cleaned, "Renamed column");
        }
    }

    let fixed = frame.rename_labels(|name| replacements.clean(name));
    let labels = fixed.duplicated_labels();
    if !labels.is_empty() {
        return Err(UpsertError::DuplicateLabels { labels });
    }
    Ok(fixed)
}
