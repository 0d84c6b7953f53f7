//! Shared test fixtures: a scripted in-memory connection

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tributary_rdbc::connection::Connection;
use tributary_rdbc::types::Row;
use tributary_rdbc::{Error, Result, Value};

/// Connection answering queries from registered rules.
///
/// Rules are matched by substring in registration order. Queued failures
/// for a pattern are returned first, one per call.
#[derive(Default)]
pub struct ScriptedConnection {
    rules: Vec<(String, Vec<Row>)>,
    failures: Mutex<Vec<(String, VecDeque<Error>)>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries containing `pattern` with `rows`
    pub fn on(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.rules.push((pattern.to_string(), rows));
        self
    }

    /// Fail queries containing `pattern` with the given errors, once each
    pub fn fail_times(self, pattern: &str, errors: Vec<Error>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), errors.into_iter().collect()));
        self
    }

    /// Statements seen so far
    pub fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn answer(&self, sql: &str) -> Result<Vec<Row>> {
        self.log.lock().unwrap().push(sql.to_string());
        for (pattern, queue) in self.failures.lock().unwrap().iter_mut() {
            if sql.contains(pattern.as_str()) {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
        }
        Ok(self
            .rules
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.answer(sql)
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        self.answer(sql).map(|rows| rows.len() as u64)
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build a row of text values; `None` becomes NULL
pub fn row(pairs: &[(&str, Option<&str>)]) -> Row {
    Row::from_pairs(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(Value::from).unwrap_or(Value::Null))),
    )
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tributary_rdbc=debug")
        .with_test_writer()
        .try_init();
}
