//! Datasets: pattern matching across several databases at once.

use async_trait::async_trait;

use crate::error::Result;
use crate::flake::ord::{FlakeOrder, Spot};
use crate::flake::Flake;

use super::async_db::DbHandle;
use super::range::Pattern;
use super::Matcher;

/// A composite matcher over a collection of underlying databases. Results
/// from every source merge into one spot-ordered, deduplicated run.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    sources: Vec<DbHandle>,
}

impl Dataset {
    /// Empty dataset.
    pub fn new() -> Dataset {
        Dataset::default()
    }

    /// Adds a source database.
    pub fn with_source(mut self, source: DbHandle) -> Dataset {
        self.sources.push(source);
        self
    }

    /// Number of composed sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True when the dataset has no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl Matcher for Dataset {
    async fn match_pattern(&self, pattern: &Pattern) -> Result<Vec<Flake>> {
        let mut merged: Vec<Flake> = Vec::new();
        for source in &self.sources {
            merged.extend(source.match_pattern(pattern).await?);
        }
        merged.sort_by(|a, b| Spot::cmp(a, b));
        merged.dedup_by(|a, b| Spot::cmp(a, b) == std::cmp::Ordering::Equal);
        Ok(merged)
    }
}
