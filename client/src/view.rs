//! `View`: a stateless description of a query — text, language, and an
//! optional namespace — that can be executed any number of times, each
//! execution producing its own independent [`ResultSet`].

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use tw_client_core::RpcEngine;

use crate::error::Result;
use crate::result_set::ResultSet;
use crate::types::{ExecuteQueryResult, Restriction};

/// A named, parameter-free query definition. `T` is the row type each
/// execution's [`ResultSet`] will decode into.
#[derive(Debug)]
pub struct View<T> {
    engine: Arc<RpcEngine>,
    query: String,
    language: String,
    namespace: Option<String>,
    default_restriction: Restriction,
    _row: PhantomData<fn() -> T>,
}

impl<T> View<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(
        engine: Arc<RpcEngine>,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
        default_restriction: Restriction,
    ) -> Self {
        View {
            engine,
            query: query.into(),
            language: language.into(),
            namespace,
            default_restriction,
            _row: PhantomData,
        }
    }

    /// The query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The query language (`"sql"` or `"fol"`).
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Executes the view, optionally restricted, and returns a fresh
    /// forward-only cursor over the result. `restriction` overrides the
    /// client's default row/time limits when given.
    pub async fn execute(&self, restriction: Option<Restriction>) -> Result<ResultSet<T>> {
        let restriction = restriction.unwrap_or(self.default_restriction);
        let params = json!({
            "query": self.query,
            "language": self.language,
            "namespace": self.namespace,
            "limit": restriction.limit,
            "timelimit": restriction.timelimit,
        });
        let result: ExecuteQueryResult<T> =
            self.engine.call("execute-query", params).await?;
        Ok(ResultSet::from_initial(Arc::clone(&self.engine), result, restriction))
    }
}
