//! Indicator catalog.
//!
//! A registry of indicator definitions that an operator can enable or
//! disable at runtime without a code deployment. Ids are globally unique
//! and stable across releases because result caches are keyed by them.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::IndicatorSummary;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::indicators::params::IndicatorParams;
use crate::indicators::query::CohortQuery;
use crate::periods::ReportingPeriod;

/// The pluggable computation contract.
///
/// A definition turns (period, params) into a numerator cohort and an
/// optional denominator cohort. Building a query is fallible so a
/// definition can reject parameters it cannot work with.
pub trait IndicatorCompute: Send + Sync {
    fn numerator(
        &self,
        period: &ReportingPeriod,
        params: &IndicatorParams,
    ) -> AnalyticsResult<CohortQuery>;

    fn denominator(
        &self,
        _period: &ReportingPeriod,
        _params: &IndicatorParams,
    ) -> AnalyticsResult<Option<CohortQuery>> {
        Ok(None)
    }
}

type QueryFn =
    Box<dyn Fn(&ReportingPeriod, &IndicatorParams) -> AnalyticsResult<CohortQuery> + Send + Sync>;

/// [`IndicatorCompute`] built from closures. All builtin definitions use
/// this; external callers may register their own trait impls instead.
pub struct CohortIndicator {
    numerator: QueryFn,
    denominator: Option<QueryFn>,
}

impl CohortIndicator {
    pub fn count(
        numerator: impl Fn(&ReportingPeriod, &IndicatorParams) -> AnalyticsResult<CohortQuery>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            numerator: Box::new(numerator),
            denominator: None,
        }
    }

    pub fn ratio(
        numerator: impl Fn(&ReportingPeriod, &IndicatorParams) -> AnalyticsResult<CohortQuery>
            + Send
            + Sync
            + 'static,
        denominator: impl Fn(&ReportingPeriod, &IndicatorParams) -> AnalyticsResult<CohortQuery>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            numerator: Box::new(numerator),
            denominator: Some(Box::new(denominator)),
        }
    }
}

impl IndicatorCompute for CohortIndicator {
    fn numerator(
        &self,
        period: &ReportingPeriod,
        params: &IndicatorParams,
    ) -> AnalyticsResult<CohortQuery> {
        (self.numerator)(period, params)
    }

    fn denominator(
        &self,
        period: &ReportingPeriod,
        params: &IndicatorParams,
    ) -> AnalyticsResult<Option<CohortQuery>> {
        match &self.denominator {
            Some(f) => Ok(Some(f(period, params)?)),
            None => Ok(None),
        }
    }
}

/// One catalog entry.
#[derive(Clone)]
pub struct IndicatorDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub compute: Arc<dyn IndicatorCompute>,
}

impl IndicatorDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        compute: impl IndicatorCompute + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            compute: Arc::new(compute),
        }
    }
}

impl std::fmt::Debug for IndicatorDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Persistence seam for operator-set active flags, implemented by the
/// storage backends so a toggle survives a restart.
#[async_trait]
pub trait IndicatorFlagStore: Send + Sync {
    async fn load_flags(&self) -> AnalyticsResult<HashMap<String, bool>>;
    async fn store_flag(&self, indicator_id: &str, active: bool) -> AnalyticsResult<()>;
}

/// Registry of indicator definitions with runtime active flags.
pub struct IndicatorCatalog {
    definitions: Vec<IndicatorDefinition>,
    index: HashMap<String, usize>,
    active: RwLock<HashMap<String, bool>>,
    store: Option<Arc<dyn IndicatorFlagStore>>,
}

impl IndicatorCatalog {
    /// Build a catalog from definitions, all initially active.
    pub fn new(definitions: Vec<IndicatorDefinition>) -> Self {
        let index = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        let active = definitions.iter().map(|d| (d.id.clone(), true)).collect();
        Self {
            definitions,
            index,
            active: RwLock::new(active),
            store: None,
        }
    }

    /// Catalog seeded with the builtin program indicators.
    pub fn builtin() -> Self {
        Self::new(super::defs::builtin_definitions())
    }

    /// Attach a flag store. Call [`IndicatorCatalog::sync_flags`] afterwards
    /// to pick up persisted operator toggles.
    pub fn with_flag_store(mut self, store: Arc<dyn IndicatorFlagStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Overlay persisted flags onto the in-memory state. Flags for ids the
    /// catalog no longer knows are ignored.
    pub async fn sync_flags(&self) -> AnalyticsResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let persisted = store.load_flags().await?;
        let mut active = self.active.write();
        for (id, flag) in persisted {
            if self.index.contains_key(&id) {
                active.insert(id, flag);
            }
        }
        Ok(())
    }

    /// Register an additional definition (active by default).
    ///
    /// # Returns
    /// * `Err(Validation)` if the id is already taken
    pub fn register(&mut self, definition: IndicatorDefinition) -> AnalyticsResult<()> {
        if self.index.contains_key(&definition.id) {
            return Err(AnalyticsError::validation(format!(
                "Indicator id already registered: {}",
                definition.id
            )));
        }
        self.active.write().insert(definition.id.clone(), true);
        self.index
            .insert(definition.id.clone(), self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    /// All definitions with their current active flag.
    pub fn list(&self) -> Vec<IndicatorSummary> {
        let active = self.active.read();
        self.definitions
            .iter()
            .map(|d| IndicatorSummary {
                id: d.id.clone(),
                name: d.name.clone(),
                description: d.description.clone(),
                is_active: active.get(&d.id).copied().unwrap_or(false),
            })
            .collect()
    }

    /// Definitions currently enabled, in registration order.
    pub fn list_active(&self) -> Vec<IndicatorDefinition> {
        let active = self.active.read();
        self.definitions
            .iter()
            .filter(|d| active.get(&d.id).copied().unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Look up one definition.
    ///
    /// # Returns
    /// * `Err(UnknownIndicator)` if the id is not in the catalog
    pub fn get(&self, id: &str) -> AnalyticsResult<IndicatorDefinition> {
        self.index
            .get(id)
            .map(|&i| self.definitions[i].clone())
            .ok_or_else(|| AnalyticsError::unknown_indicator(id))
    }

    /// Whether the indicator is currently enabled.
    pub fn is_active(&self, id: &str) -> bool {
        self.active.read().get(id).copied().unwrap_or(false)
    }

    /// Enable or disable one indicator, persisting through the flag store
    /// when one is attached.
    pub async fn set_active(&self, id: &str, active: bool) -> AnalyticsResult<()> {
        if !self.index.contains_key(id) {
            return Err(AnalyticsError::unknown_indicator(id));
        }
        self.active.write().insert(id.to_string(), active);
        if let Some(store) = &self.store {
            store.store_flag(id, active).await?;
        }
        Ok(())
    }

    /// Enable or disable several indicators at once (admin surface).
    pub async fn set_many_active(&self, ids: &[String], active: bool) -> AnalyticsResult<()> {
        for id in ids {
            self.set_active(id, active).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::query::CohortQuery;

    fn test_catalog() -> IndicatorCatalog {
        IndicatorCatalog::new(vec![
            IndicatorDefinition::new(
                "a",
                "Indicator A",
                "",
                CohortIndicator::count(|p, _| Ok(CohortQuery::new(p.end_date))),
            ),
            IndicatorDefinition::new(
                "b",
                "Indicator B",
                "",
                CohortIndicator::count(|p, _| Ok(CohortQuery::new(p.end_date))),
            ),
        ])
    }

    #[tokio::test]
    async fn test_set_active_and_listing() {
        let catalog = test_catalog();
        assert_eq!(catalog.list_active().len(), 2);

        catalog.set_active("b", false).await.unwrap();
        assert!(!catalog.is_active("b"));
        let active = catalog.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");

        // flag change does not delete the definition
        assert!(catalog.get("b").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_id_rejected() {
        let catalog = test_catalog();
        assert!(matches!(
            catalog.get("nope"),
            Err(AnalyticsError::UnknownIndicator { .. })
        ));
        assert!(matches!(
            catalog.set_active("nope", true).await,
            Err(AnalyticsError::UnknownIndicator { .. })
        ));
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut catalog = test_catalog();
        let dup = IndicatorDefinition::new(
            "a",
            "Duplicate",
            "",
            CohortIndicator::count(|p, _| Ok(CohortQuery::new(p.end_date))),
        );
        assert!(catalog.register(dup).is_err());
    }
}
