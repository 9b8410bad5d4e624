use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};
use shipyard_common::{Feature, PrSummary, SdlcLifecycle};

use super::ShipyardDb;
use crate::util::{now_rfc3339, short_id, slugify};

/// Fields supplied when a feature is created. Slug and branch are derived.
#[derive(Debug, Clone)]
pub struct NewFeature {
    pub name: String,
    pub description: String,
    pub repository_path: String,
    pub lifecycle: SdlcLifecycle,
    pub parent_id: Option<String>,
    pub push: bool,
    pub open_pr: bool,
}

const FEATURE_COLUMNS: &str = "id, name, slug, description, repository_path, branch, lifecycle, parent_id, agent_run_id, spec_path, push, open_pr, pr, created_at, updated_at";

impl ShipyardDb {
    pub fn insert_feature(&self, new: &NewFeature) -> Result<Feature> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut slug = slugify(&new.name, 40);
        if slug.is_empty() {
            slug = "feature".to_string();
        }
        let taken: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM features WHERE slug = ?1)",
                params![slug],
                |row| row.get(0),
            )
            .context("Failed to check slug uniqueness")?;
        if taken {
            slug = format!("{}-{}", slug, short_id(&id));
        }
        let branch = format!("feat/{}", slug);
        let now = now_rfc3339();

        self.conn
            .execute(
                "INSERT INTO features (id, name, slug, description, repository_path, branch, lifecycle, parent_id, push, open_pr, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id,
                    new.name,
                    slug,
                    new.description,
                    new.repository_path,
                    branch,
                    new.lifecycle.as_str(),
                    new.parent_id,
                    new.push,
                    new.open_pr,
                    now
                ],
            )
            .context("Failed to insert feature")?;
        self.get_feature(&id)?
            .context("Feature not found after insert")
    }

    pub fn get_feature(&self, id: &str) -> Result<Option<Feature>> {
        let sql = format!("SELECT {} FROM features WHERE id = ?1", FEATURE_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], FeatureRow::from_row)
            .optional()
            .context("Failed to query feature")?;
        row.map(FeatureRow::into_feature).transpose()
    }

    /// Look a feature up by full id, id prefix, or slug.
    pub fn find_feature(&self, key: &str) -> Result<Option<Feature>> {
        if let Some(feature) = self.get_feature(key)? {
            return Ok(Some(feature));
        }
        let sql = format!(
            "SELECT {} FROM features WHERE slug = ?1 OR id LIKE ?2 || '%' ORDER BY created_at LIMIT 2",
            FEATURE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare find_feature")?;
        let rows = stmt
            .query_map(params![key, key], FeatureRow::from_row)
            .context("Failed to query features")?;
        let mut matches = Vec::new();
        for row in rows {
            matches.push(row.context("Failed to read feature row")?.into_feature()?);
        }
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => anyhow::bail!("Feature key '{}' is ambiguous", key),
        }
    }

    pub fn list_features(&self) -> Result<Vec<Feature>> {
        self.query_features(
            &format!("SELECT {} FROM features ORDER BY created_at", FEATURE_COLUMNS),
            params![],
        )
    }

    /// Direct children only.
    pub fn list_children(&self, parent_id: &str) -> Result<Vec<Feature>> {
        self.query_features(
            &format!(
                "SELECT {} FROM features WHERE parent_id = ?1 ORDER BY created_at",
                FEATURE_COLUMNS
            ),
            params![parent_id],
        )
    }

    fn query_features(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Feature>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare feature query")?;
        let rows = stmt
            .query_map(args, FeatureRow::from_row)
            .context("Failed to query features")?;
        let mut features = Vec::new();
        for row in rows {
            features.push(row.context("Failed to read feature row")?.into_feature()?);
        }
        Ok(features)
    }

    pub fn set_lifecycle(&self, id: &str, lifecycle: SdlcLifecycle) -> Result<Feature> {
        self.conn
            .execute(
                "UPDATE features SET lifecycle = ?1, updated_at = ?2 WHERE id = ?3",
                params![lifecycle.as_str(), now_rfc3339(), id],
            )
            .context("Failed to update feature lifecycle")?;
        self.get_feature(id)?
            .context("Feature not found after lifecycle update")
    }

    /// Move a `Blocked` feature to `Started`. Returns false when it was not blocked.
    pub fn unblock_feature(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE features SET lifecycle = 'started', updated_at = ?1 WHERE id = ?2 AND lifecycle = 'blocked'",
                params![now_rfc3339(), id],
            )
            .context("Failed to unblock feature")?;
        Ok(changed == 1)
    }

    pub fn set_feature_run(&self, id: &str, run_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE features SET agent_run_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![run_id, now_rfc3339(), id],
            )
            .context("Failed to link run to feature")?;
        Ok(())
    }

    pub fn set_spec_path(&self, id: &str, spec_path: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE features SET spec_path = ?1, updated_at = ?2 WHERE id = ?3",
                params![spec_path, now_rfc3339(), id],
            )
            .context("Failed to set feature spec path")?;
        Ok(())
    }

    pub fn set_feature_pr(&self, id: &str, pr: Option<&PrSummary>) -> Result<()> {
        let json = pr
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize PR summary")?;
        self.conn
            .execute(
                "UPDATE features SET pr = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, now_rfc3339(), id],
            )
            .context("Failed to update feature PR")?;
        Ok(())
    }
}

/// Intermediate row struct for reading features before converting the
/// lifecycle and PR columns into typed values.
struct FeatureRow {
    id: String,
    name: String,
    slug: String,
    description: String,
    repository_path: String,
    branch: String,
    lifecycle: String,
    parent_id: Option<String>,
    agent_run_id: Option<String>,
    spec_path: Option<String>,
    push: bool,
    open_pr: bool,
    pr: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FeatureRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            repository_path: row.get(4)?,
            branch: row.get(5)?,
            lifecycle: row.get(6)?,
            parent_id: row.get(7)?,
            agent_run_id: row.get(8)?,
            spec_path: row.get(9)?,
            push: row.get(10)?,
            open_pr: row.get(11)?,
            pr: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_feature(self) -> Result<Feature> {
        let lifecycle = SdlcLifecycle::from_str(&self.lifecycle)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse feature lifecycle")?;
        let pr = self
            .pr
            .as_deref()
            .map(serde_json::from_str::<PrSummary>)
            .transpose()
            .context("Failed to parse feature PR JSON")?;
        Ok(Feature {
            id: self.id,
            name: self.name,
            slug: self.slug,
            description: self.description,
            repository_path: self.repository_path,
            branch: self.branch,
            lifecycle,
            parent_id: self.parent_id,
            agent_run_id: self.agent_run_id,
            spec_path: self.spec_path,
            push: self.push,
            open_pr: self.open_pr,
            pr,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
