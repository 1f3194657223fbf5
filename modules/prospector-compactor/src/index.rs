use serde::Serialize;

use prospector_common::keys;
use prospector_common::{ShardStrategy, PROSPECT_COLUMNS};

use crate::error::{CompactionError, Result};

/// How two rows with the same primary key are reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", content = "column", rename_all = "snake_case")]
pub enum MergeRule {
    /// The row seen last wins.
    Replace,
    /// The row with the greater value in this column wins; ties go to the
    /// row seen last.
    LatestByColumn(String),
}

/// How input files are laid out under the input prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Any `.usv` file below the prefix; no re-bucketing.
    Flat,
    /// `{shard}/{lat}/{lon}/{file}.usv`, re-bucketed onto the 0.1 degree grid.
    GeoGrid,
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub input_prefix: String,
    pub index_prefix: String,
    pub columns: Vec<String>,
    pub key_column: String,
    pub merge_rule: MergeRule,
    pub shard_strategy: ShardStrategy,
    pub layout: Layout,
}

impl IndexSpec {
    pub const PROSPECTS: &'static str = "google-maps-prospects";

    /// Business listings dropped by list scrapes.
    pub fn prospects(campaign: &str) -> Self {
        Self {
            name: Self::PROSPECTS.to_string(),
            input_prefix: keys::results_prefix(campaign),
            index_prefix: keys::index_prefix(campaign, Self::PROSPECTS),
            columns: PROSPECT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            key_column: "place_id".to_string(),
            merge_rule: MergeRule::LatestByColumn("updated_at".to_string()),
            shard_strategy: ShardStrategy::Place,
            layout: Layout::GeoGrid,
        }
    }

    pub fn checkpoint_key(&self) -> String {
        format!("{}checkpoint.usv", self.index_prefix)
    }

    pub fn schema_key(&self) -> String {
        format!("{}checkpoint.schema.json", self.index_prefix)
    }

    pub fn lock_key(&self) -> String {
        format!("{}compact.lock", self.index_prefix)
    }

    pub fn key_index(&self) -> Result<usize> {
        self.column_index(&self.key_column)
    }

    /// Column consulted by `LatestByColumn`, if any.
    pub fn rule_index(&self) -> Result<Option<usize>> {
        match &self.merge_rule {
            MergeRule::Replace => Ok(None),
            MergeRule::LatestByColumn(column) => self.column_index(column).map(Some),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input_prefix.ends_with('/') || !self.index_prefix.ends_with('/') {
            return Err(CompactionError::InvalidIndex(format!(
                "{}: prefixes must end with '/'",
                self.name
            )));
        }
        if self.checkpoint_key().starts_with(&self.input_prefix) {
            return Err(CompactionError::InvalidIndex(format!(
                "{}: checkpoint may not live under the input prefix",
                self.name
            )));
        }
        self.key_index()?;
        self.rule_index()?;
        Ok(())
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                CompactionError::InvalidIndex(format!("{}: no column named {column}", self.name))
            })
    }
}
