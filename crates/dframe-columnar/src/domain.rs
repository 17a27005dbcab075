#![forbid(unsafe_code)]

use crate::error::FrameError;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered, distinct string levels backing a categorical column.
///
/// A stored categorical cell is an index (`code`) into this list. Two frames may hold the same
/// labels under different codes, so anything comparing categorical cells across frames must go
/// through [`Domain::level`] rather than comparing codes.
///
/// Serialized as the level list in code order; a list with repeated labels does not load.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(try_from = "Vec<Arc<str>>")]
pub struct Domain {
    levels: Vec<Arc<str>>,
    codes: HashMap<Arc<str>, u32>,
}

impl Domain {
    pub const MAX_LEVELS: u64 = u32::MAX as u64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Build a domain from `levels`, keeping the first occurrence of each label.
    pub fn from_levels<I, S>(levels: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut domain = Self::new();
        for level in levels {
            domain.intern(level.into())?;
        }
        Some(domain)
    }

    /// Return the code for `level`, appending it when unseen.
    ///
    /// Existing codes never move. Returns `None` once the domain is full.
    pub fn intern(&mut self, level: Arc<str>) -> Option<u32> {
        if let Some(code) = self.codes.get(level.as_ref()) {
            return Some(*code);
        }
        if self.levels.len() as u64 >= Self::MAX_LEVELS {
            return None;
        }

        let code = self.levels.len() as u32;
        self.levels.push(level.clone());
        self.codes.insert(level, code);
        Some(code)
    }

    pub fn level(&self, code: u32) -> Option<&Arc<str>> {
        self.levels.get(code as usize)
    }

    pub fn code_of(&self, level: &str) -> Option<u32> {
        self.codes.get(level).copied()
    }

    pub fn levels(&self) -> &[Arc<str>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<str>> + '_ {
        self.levels.iter()
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels
    }
}

impl Eq for Domain {}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.levels)
    }
}

impl TryFrom<Vec<Arc<str>>> for Domain {
    type Error = FrameError;

    fn try_from(levels: Vec<Arc<str>>) -> Result<Self, FrameError> {
        let mut domain = Self::new();
        for level in levels {
            let next = domain.len();
            match domain.intern(level.clone()) {
                Some(code) if code as usize == next => {}
                Some(_) => {
                    return Err(FrameError::DuplicateLevel {
                        level: level.to_string(),
                    })
                }
                None => {
                    return Err(FrameError::DomainOverflow {
                        column: "<decoded>".to_string(),
                        max: Self::MAX_LEVELS,
                    })
                }
            }
        }
        Ok(domain)
    }
}
