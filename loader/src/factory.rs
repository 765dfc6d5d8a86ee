//! Connection factory
//!
//! Opens a pool for the downstream target and checks instrumented
//! connections out of it. Acquisition is all or nothing: if any step fails,
//! everything acquired so far, the pool included, is closed before the error
//! is returned.

use std::sync::Arc;

use dm_async_utils::Context;

use crate::config::LoaderConfig;
use crate::conn::DbConn;
use crate::driver::{BaseDb, DbProvider};
use crate::error::{DbError, ErrorScope, Result};
use crate::faults::{FaultInjector, faults_from_config};
use crate::metrics::{LoaderMetrics, NoopMetrics};

/// Builds [`DbConn`]s sharing one metrics sink and one fault injector.
#[derive(Clone)]
pub struct ConnFactory {
    provider: Arc<dyn DbProvider>,
    metrics: Arc<dyn LoaderMetrics>,
    faults: Option<Arc<dyn FaultInjector>>,
}

impl ConnFactory {
    pub fn new(provider: Arc<dyn DbProvider>) -> Self {
        Self {
            provider,
            metrics: Arc::new(NoopMetrics),
            faults: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn LoaderMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Override the injector derived from each config's `faults` section.
    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Open a pool and one connection from it.
    pub async fn create_conn(
        &self,
        ctx: &Context,
        cfg: Arc<LoaderConfig>,
    ) -> Result<(Arc<dyn BaseDb>, DbConn)> {
        let (db, mut conns) = self.create_conns(ctx, cfg, 1).await?;
        match conns.pop() {
            Some(conn) => Ok((db, conn)),
            None => {
                close_db(db.as_ref()).await;
                Err(DbError::from("no connection acquired").with_scope(ErrorScope::Internal))
            }
        }
    }

    /// Open a pool and `n` independent connections from it, one per worker.
    pub async fn create_conns(
        &self,
        ctx: &Context,
        cfg: Arc<LoaderConfig>,
        n: usize,
    ) -> Result<(Arc<dyn BaseDb>, Vec<DbConn>)> {
        let db = self
            .provider
            .apply(&cfg.to)
            .await
            .map_err(downstream_driver_error)?;

        let faults = self
            .faults
            .clone()
            .unwrap_or_else(|| faults_from_config(&cfg.faults));

        let mut conns = Vec::with_capacity(n);
        for index in 0..n {
            match db.get_base_conn(ctx).await {
                Ok(base) => conns.push(DbConn::new(
                    base,
                    Arc::clone(&cfg),
                    Arc::clone(&self.metrics),
                    Arc::clone(&faults),
                )),
                Err(err) => {
                    let err = downstream_driver_error(err);
                    tracing::warn!(
                        task = %cfg.name,
                        acquired = index,
                        requested = n,
                        error = %err,
                        "failed to acquire connection, releasing pool"
                    );
                    for mut conn in conns {
                        if let Err(close_err) = conn.close().await {
                            tracing::error!(task = %cfg.name, error = %close_err, "failed to close connection");
                        }
                    }
                    close_db(db.as_ref()).await;
                    return Err(err);
                }
            }
        }

        tracing::debug!(task = %cfg.name, count = n, "acquired connections");
        Ok((db, conns))
    }
}

fn downstream_driver_error(err: DbError) -> DbError {
    if err.scope() != ErrorScope::NotSet {
        return err;
    }
    err.adapt_driver().with_scope(ErrorScope::Downstream)
}

async fn close_db(db: &dyn BaseDb) {
    if let Err(err) = db.close().await {
        tracing::error!(error = %err, "failed to close db");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Unreachable;

    #[async_trait]
    impl DbProvider for Unreachable {
        async fn apply(&self, _cfg: &DbConfig) -> Result<Arc<dyn BaseDb>> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into())
        }
    }

    #[test]
    fn driver_errors_are_scoped_downstream_once() {
        let err = downstream_driver_error(DbError::BadConnection);
        assert_eq!(err.scope(), ErrorScope::Downstream);
        assert!(matches!(err.root_cause(), DbError::BadConnection));
        assert!(err.to_string().contains("database driver error"));

        let again = downstream_driver_error(err);
        assert_eq!(
            again.to_string(),
            "[scope: downstream] database driver error: driver: bad connection"
        );
    }

    #[tokio::test]
    async fn provider_failure_is_downstream_scoped() {
        let factory = ConnFactory::new(Arc::new(Unreachable));
        let Err(err) = factory
            .create_conn(&Context::new(), Arc::new(LoaderConfig::new("t")))
            .await
        else {
            panic!("provider failure must surface");
        };

        assert_eq!(err.scope(), ErrorScope::Downstream);
        assert!(matches!(err.root_cause(), DbError::Io(_)));
    }
}
