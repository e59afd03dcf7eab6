//! Query Engine
//!
//! Orchestrates one natural-language question end to end:
//!
//! 1. Resolve the prompt against a tenant-scoped catalog snapshot
//! 2. Synthesize parameterized SQL for the plan
//! 3. Validate the SQL independently of the synthesizer
//! 4. Execute under the row cap and deadline
//! 5. Compose the answer and record exactly one `nl_queries` row
//!
//! Any stage failure short-circuits to step 5 with the error; the only `Err`
//! a caller sees is a failure to write that record.

use crate::ambiguity::choose;
use crate::answer::{AnswerComposer, AnswerRequest, Answered, QueryOutcome};
use crate::compiler::{SqlDialect, SqlSynthesizer};
use crate::config::EngineConfig;
use crate::db::{open_store, QueryHistoryRepository};
use crate::error::{NlqError, Result};
use crate::execution::{AnalyticsStore, NlQueryRecord, QueryExecutor};
use crate::intent::{IntentResolver, QueryPlan};
use crate::security::{QueryGuards, SqlValidator};
use crate::semantic::{load_catalog, Catalog, CatalogHandle, ScopedCatalog, TenantId};
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub struct QueryEngine {
    catalog: Arc<CatalogHandle>,
    store: Arc<dyn AnalyticsStore>,
    executor: QueryExecutor,
    composer: AnswerComposer,
    guards: QueryGuards,
    dialect: SqlDialect,
}

impl QueryEngine {
    pub fn new(catalog: Arc<CatalogHandle>, store: Arc<dyn AnalyticsStore>, guards: QueryGuards) -> Self {
        Self {
            dialect: store.dialect(),
            executor: QueryExecutor::new(Arc::clone(&store), guards.clone()),
            composer: AnswerComposer::new(QueryHistoryRepository::new(Arc::clone(&store))),
            catalog,
            store,
            guards,
        }
    }

    /// Load the catalog and open the store named by the configuration.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let catalog = load_catalog(config)?;
        let store = open_store(config).await?;
        Ok(Self::new(Arc::new(CatalogHandle::new(catalog)), store, config.guards()))
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn AnalyticsStore> {
        &self.store
    }

    /// Swap in a new catalog; in-flight questions keep the snapshot they took.
    pub fn reload_catalog(&self, catalog: Catalog) {
        self.catalog.swap(catalog);
        info!("catalog reloaded");
    }

    pub async fn resolve_query(
        &self,
        tenant: TenantId,
        prompt: &str,
        now: NaiveDateTime,
    ) -> Result<QueryOutcome> {
        self.resolve(tenant, prompt, now, None, None).await
    }

    /// As [`Self::resolve_query`], giving up on execution after `deadline`.
    pub async fn resolve_query_with_deadline(
        &self,
        tenant: TenantId,
        prompt: &str,
        now: NaiveDateTime,
        deadline: Duration,
    ) -> Result<QueryOutcome> {
        self.resolve(tenant, prompt, now, Some(deadline), None).await
    }

    /// Resolve `prompt`; if it is ambiguous, answer the reading at 1-based
    /// position `choice` instead of returning the candidates.
    pub async fn resolve_query_with_choice(
        &self,
        tenant: TenantId,
        prompt: &str,
        now: NaiveDateTime,
        choice: usize,
    ) -> Result<QueryOutcome> {
        self.resolve(tenant, prompt, now, None, Some(choice)).await
    }

    /// Answer `prompt` with a plan the caller already holds, typically one of
    /// the candidates from an earlier ambiguous outcome.
    pub async fn resolve_plan(
        &self,
        tenant: TenantId,
        prompt: &str,
        plan: &QueryPlan,
        deadline: Option<Duration>,
    ) -> Result<QueryOutcome> {
        let request_id = Uuid::new_v4();
        let span = info_span!("nl_query", request_id = %request_id, tenant = %tenant);
        async move {
            let catalog = self.catalog.current().scoped(tenant);
            let answered = self.answer_plan(&catalog, plan, deadline).await;
            self.record(request_id, tenant, prompt, answered).await
        }
        .instrument(span)
        .await
    }

    /// A tenant's past questions, newest first.
    pub async fn history(&self, tenant: TenantId, limit: usize) -> Result<Vec<NlQueryRecord>> {
        self.composer.history().recent(tenant, limit).await
    }

    pub async fn health_check(&self) -> Result<bool> {
        Ok(self.store.health_check().await?)
    }

    async fn resolve(
        &self,
        tenant: TenantId,
        prompt: &str,
        now: NaiveDateTime,
        deadline: Option<Duration>,
        choice: Option<usize>,
    ) -> Result<QueryOutcome> {
        let request_id = Uuid::new_v4();
        let span = info_span!("nl_query", request_id = %request_id, tenant = %tenant);
        async move {
            info!(prompt = %prompt, "resolving question");
            let catalog = self.catalog.current().scoped(tenant);

            let plan = match (IntentResolver::new(&catalog, now).resolve(prompt), choice) {
                (Err(NlqError::IntentAmbiguous { candidates, .. }), Some(choice)) => {
                    choose(&candidates, choice)
                }
                (resolved, _) => resolved,
            };
            let answered = match plan {
                Ok(plan) => {
                    info!(plan = %plan.describe(&catalog), "resolved plan");
                    self.answer_plan(&catalog, &plan, deadline).await
                }
                Err(err) => Err(err),
            };
            self.record(request_id, tenant, prompt, answered).await
        }
        .instrument(span)
        .await
    }

    async fn answer_plan(
        &self,
        catalog: &ScopedCatalog,
        plan: &QueryPlan,
        deadline: Option<Duration>,
    ) -> Result<Answered> {
        let query = SqlSynthesizer::new(catalog, self.dialect, &self.guards).synthesize(plan)?;
        info!(sql = %query.sql, "synthesized sql");
        let validated = SqlValidator::new(catalog).validate(query)?;
        let result = self.executor.execute(&validated, deadline).await?;
        Ok(Answered {
            sql: validated.sql().to_string(),
            payload: AnswerComposer::compose(catalog, plan, result),
        })
    }

    async fn record(
        &self,
        request_id: Uuid,
        tenant: TenantId,
        prompt: &str,
        answered: Result<Answered>,
    ) -> Result<QueryOutcome> {
        let request = AnswerRequest {
            request_id,
            tenant,
            prompt,
            created_at: Utc::now().naive_utc(),
        };
        self.composer.finish(&request, answered).await
    }
}
