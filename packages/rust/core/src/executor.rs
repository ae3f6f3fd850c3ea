//! Binds aligned entities and runs the synthesized query.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use medgraph_shared::{MedGraphError, Result};
use medgraph_storage::{QueryRow, Storage};

use crate::align::ResolvedEntity;

pub struct QueryExecutor {
    storage: Arc<Storage>,
    timeout: Duration,
}

impl QueryExecutor {
    /// Each query is interrupted once it runs longer than `timeout`.
    pub fn new(storage: Arc<Storage>, timeout: Duration) -> Self {
        Self { storage, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `query` with each resolved value bound to its parameter.
    ///
    /// Rows come back exactly as the store returns them.
    #[instrument(skip_all, fields(params = entities.len()))]
    pub async fn execute(&self, query: &str, entities: &[ResolvedEntity]) -> Result<Vec<QueryRow>> {
        let params: Vec<(String, String)> = entities
            .iter()
            .map(|e| (e.param_name.clone(), e.value.clone()))
            .collect();

        let rows = self
            .storage
            .within("execute", self.timeout, self.storage.query_rows(query, &params))
            .await
            .map_err(|e| match e {
                MedGraphError::Storage(msg) => MedGraphError::Execution(msg),
                other => other,
            })?;
        debug!(rows = rows.len(), "query executed");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_storage;
    use medgraph_shared::{Label, NodeId};

    fn resolved(param: &str, value: &str) -> ResolvedEntity {
        ResolvedEntity {
            param_name: param.into(),
            label: Label::Disease,
            raw: value.into(),
            value: value.into(),
            node_id: Some(NodeId::from("disease_1")),
            score: 1.0,
        }
    }

    #[tokio::test]
    async fn binds_parameters_and_keeps_store_order() {
        let executor = QueryExecutor::new(seeded_storage().await, Duration::from_secs(5));
        let rows = executor
            .execute(
                "SELECT s.name AS symptom FROM nodes d \
                 JOIN relations r ON r.rel_type = 'HAVE' AND r.start_id = d.id \
                 JOIN nodes s ON s.label = 'Symptom' AND s.id = r.end_id \
                 WHERE d.label = 'Disease' AND d.name = :param_0 ORDER BY s.name DESC",
                &[resolved("param_0", "感冒")],
            )
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().filter_map(|r| r["symptom"].as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(names.len(), 2);
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn store_faults_are_execution_errors() {
        let executor = QueryExecutor::new(seeded_storage().await, Duration::from_secs(5));
        let err = executor
            .execute("SELECT * FROM no_such_table", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MedGraphError::Execution(_)));

        let err = executor.execute("DROP TABLE nodes", &[]).await.unwrap_err();
        assert!(matches!(err, MedGraphError::Execution(_)));
    }

    #[tokio::test]
    async fn runaway_query_times_out() {
        let executor = QueryExecutor::new(seeded_storage().await, Duration::from_millis(50));
        let err = executor
            .execute(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 200000000) \
                 SELECT count(*) AS n FROM c",
                &[],
            )
            .await
            .unwrap_err();
        assert!(
            matches!(&err, MedGraphError::Timeout { stage, .. } if stage == "execute"),
            "{err}"
        );
    }
}
