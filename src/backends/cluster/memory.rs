// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local cluster transport.
//!
//! Keeps indices, aliases, documents and scroll cursors in memory and
//! evaluates the subset of the query DSL the cluster compiler emits:
//!
//! ```text
//! match_all  match  match_phrase  multi_match  dis_max  bool
//! term  terms  prefix  range  exists          + terms aggregations
//! ```
//!
//! Scoring is a boost-weighted count of matched query tokens, which keeps
//! ranking deterministic. Fields analysed with the edge-n-gram analyzer match
//! by token prefix. Aggregate columns (`_all_text`, `_all_text_boost_*`)
//! resolve through the `copy_to` entries of the stored mapping.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};

use super::transport::{AliasAction, BulkAction, ClusterTransport, TransportError};
use crate::index::{ALL_FIELD_NAME, EDGENGRAMS_FIELD_NAME};

const DEFAULT_SIZE: usize = 10;

fn bad_request(reason: impl Into<String>) -> TransportError {
    TransportError::Status {
        status: 400,
        body: reason.into(),
    }
}

#[derive(Debug, Default)]
struct StoredIndex {
    settings: Value,
    properties: Map<String, Value>,
    documents: Vec<(String, Value)>,
}

impl StoredIndex {
    fn upsert(&mut self, id: &str, document: Value) {
        match self.documents.iter_mut().find(|(doc_id, _)| doc_id == id) {
            Some(slot) => slot.1 = document,
            None => self.documents.push((id.to_string(), document)),
        }
    }
}

struct ScrollCursor {
    remaining: Vec<Value>,
    size: usize,
}

struct Match {
    index: String,
    id: String,
    document: Value,
    score: f64,
}

#[derive(Default)]
struct ClusterState {
    indices: BTreeMap<String, StoredIndex>,
    aliases: BTreeMap<String, Vec<String>>,
    scrolls: HashMap<String, ScrollCursor>,
}

impl ClusterState {
    /// Concrete indices behind an index or alias name
    fn resolve(&self, name: &str) -> Result<Vec<String>, TransportError> {
        if self.indices.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }
        match self.aliases.get(name) {
            Some(targets) if !targets.is_empty() => Ok(targets.clone()),
            _ => Err(TransportError::NotFound(name.to_string())),
        }
    }

    /// Single write target behind `name`
    fn write_target(&mut self, name: &str) -> Result<&mut StoredIndex, TransportError> {
        let targets = self.resolve(name)?;
        if targets.len() > 1 {
            return Err(bad_request(format!(
                "alias [{name}] has more than one index associated with it, can't execute a single index op"
            )));
        }
        self.indices
            .get_mut(&targets[0])
            .ok_or_else(|| TransportError::NotFound(name.to_string()))
    }

    fn matching(&self, name: &str, query: &Value) -> Result<Vec<Match>, TransportError> {
        let mut out = Vec::new();
        for index_name in self.resolve(name)? {
            let Some(index) = self.indices.get(&index_name) else {
                continue;
            };
            let evaluator = Evaluator {
                properties: &index.properties,
            };
            for (id, document) in &index.documents {
                if let Some(score) = evaluator.score(query, document)? {
                    out.push(Match {
                        index: index_name.clone(),
                        id: id.clone(),
                        document: document.clone(),
                        score,
                    });
                }
            }
        }
        Ok(out)
    }

    fn remove_index(&mut self, name: &str) {
        self.indices.remove(name);
        for targets in self.aliases.values_mut() {
            targets.retain(|target| target != name);
        }
        self.aliases.retain(|_, targets| !targets.is_empty());
    }
}

/// In-memory [`ClusterTransport`]
#[derive(Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    requests: Mutex<Vec<String>>,
    next_scroll: AtomicU64,
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, operation: &str, target: &str) {
        self.requests.lock().push(format!("{operation} {target}"));
    }

    /// Every request received so far, as `"<operation> <target>"`
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Concrete index names, sorted
    #[must_use]
    pub fn indices(&self) -> Vec<String> {
        self.state.read().indices.keys().cloned().collect()
    }

    #[must_use]
    pub fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.state.read().aliases.get(alias).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn settings(&self, index: &str) -> Option<Value> {
        self.state.read().indices.get(index).map(|i| i.settings.clone())
    }

    /// Stored `properties` of an index
    #[must_use]
    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.state
            .read()
            .indices
            .get(index)
            .map(|i| Value::Object(i.properties.clone()))
    }

    /// Documents of an index or alias in insertion order
    #[must_use]
    pub fn documents(&self, name: &str) -> Vec<(String, Value)> {
        let state = self.state.read();
        let Ok(targets) = state.resolve(name) else {
            return Vec::new();
        };
        targets
            .iter()
            .filter_map(|target| state.indices.get(target))
            .flat_map(|index| index.documents.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn document(&self, name: &str, id: &str) -> Option<Value> {
        self.documents(name)
            .into_iter()
            .find(|(doc_id, _)| doc_id == id)
            .map(|(_, doc)| doc)
    }

    /// Scroll cursors not yet cleared
    #[must_use]
    pub fn open_scrolls(&self) -> usize {
        self.state.read().scrolls.len()
    }
}

fn render_hit(hit: &Match, body: &Value, sorted: bool) -> Value {
    let mut rendered = Map::new();
    rendered.insert("_index".into(), json!(hit.index));
    rendered.insert("_id".into(), json!(hit.id));
    rendered.insert("_score".into(), if sorted { Value::Null } else { json!(hit.score) });

    if body.get("_source") != Some(&Value::Bool(false)) {
        rendered.insert("_source".into(), hit.document.clone());
    }
    if body.get("stored_fields").is_some() {
        let pk = hit.document.get("pk").cloned().unwrap_or(Value::Null);
        rendered.insert("fields".into(), json!({ "pk": [pk] }));
    }
    Value::Object(rendered)
}

fn sort_keys(sort: &Value) -> Result<Vec<(String, bool)>, TransportError> {
    let entries = match sort {
        Value::Array(entries) => entries.iter().collect(),
        other => vec![other],
    };
    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Value::String(column) => keys.push((column.clone(), false)),
            Value::Object(map) => {
                for (column, order) in map {
                    let order = order
                        .as_str()
                        .or_else(|| order.get("order").and_then(Value::as_str))
                        .unwrap_or("asc");
                    keys.push((column.clone(), order == "desc"));
                }
            }
            other => return Err(bad_request(format!("malformed sort entry {other}"))),
        }
    }
    Ok(keys)
}

fn sort_matches(matches: &mut [Match], sort: Option<&Value>) -> Result<(), TransportError> {
    let Some(sort) = sort else {
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        return Ok(());
    };

    let keys = sort_keys(sort)?;
    matches.sort_by(|a, b| {
        for (column, descending) in &keys {
            let left = flatten(values_at(&a.document, column)).into_iter().next();
            let right = flatten(values_at(&b.document, column)).into_iter().next();
            let ordering = match (left, right) {
                (None, None) => Ordering::Equal,
                // Missing values sort last either way
                (None, Some(_)) => return Ordering::Greater,
                (Some(_), None) => return Ordering::Less,
                (Some(l), Some(r)) => {
                    let ordering = compare_values(l, r).unwrap_or(Ordering::Equal);
                    if *descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn aggregate(aggregations: &Value, matches: &[Match]) -> Result<Value, TransportError> {
    let aggregations = aggregations
        .as_object()
        .ok_or_else(|| bad_request("aggregations must be an object"))?;

    let mut out = Map::new();
    for (name, spec) in aggregations {
        let terms = spec
            .get("terms")
            .ok_or_else(|| bad_request(format!("unsupported aggregation [{name}]")))?;
        let column = terms
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request(format!("terms aggregation [{name}] needs a field")))?;

        let mut buckets: Vec<(Value, u64)> = Vec::new();
        let mut missing_count = 0u64;
        for hit in matches {
            let values = flatten(values_at(&hit.document, column));
            let values: Vec<&Value> = values.into_iter().filter(|v| !v.is_null()).collect();
            if values.is_empty() {
                missing_count += 1;
                continue;
            }
            for value in values {
                match buckets.iter_mut().find(|(key, _)| loosely_equal(key, value)) {
                    Some(bucket) => bucket.1 += 1,
                    None => buckets.push((value.clone(), 1)),
                }
            }
        }

        buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| text_of(&a.0).cmp(&text_of(&b.0))));
        if let Some(missing) = terms.get("missing") {
            buckets.push((missing.clone(), missing_count));
        }

        let rendered: Vec<Value> = buckets
            .into_iter()
            .map(|(key, count)| json!({"key": key, "doc_count": count}))
            .collect();
        out.insert(name.clone(), json!({ "buckets": rendered }));
    }
    Ok(Value::Object(out))
}

fn body_usize(body: &Value, key: &str) -> Option<usize> {
    body.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

#[async_trait]
impl ClusterTransport for InMemoryCluster {
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), TransportError> {
        self.log("create_index", index);
        let mut state = self.state.write();
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(bad_request(format!("resource_already_exists_exception: index [{index}]")));
        }

        let mut stored = StoredIndex {
            settings: body.get("settings").cloned().unwrap_or_else(|| json!({})),
            ..StoredIndex::default()
        };
        if let Some(properties) = body.pointer("/mappings/properties").and_then(Value::as_object) {
            stored.properties = properties.clone();
        }
        state.indices.insert(index.to_string(), stored);
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), TransportError> {
        self.log("delete_index", index);
        let mut state = self.state.write();
        if state.indices.contains_key(index) {
            state.remove_index(index);
            return Ok(());
        }
        match state.aliases.remove(index) {
            Some(targets) => {
                for target in targets {
                    state.remove_index(&target);
                }
                Ok(())
            }
            None => Err(TransportError::NotFound(index.to_string())),
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, TransportError> {
        self.log("index_exists", index);
        let state = self.state.read();
        Ok(state.indices.contains_key(index) || state.aliases.contains_key(index))
    }

    async fn refresh_index(&self, index: &str) -> Result<(), TransportError> {
        self.log("refresh_index", index);
        self.state.read().resolve(index).map(|_| ())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), TransportError> {
        self.log("put_mapping", index);
        let properties = mapping
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| bad_request("mapping must carry properties"))?;

        let mut state = self.state.write();
        for target in state.resolve(index)? {
            if let Some(stored) = state.indices.get_mut(&target) {
                for (name, field) in properties {
                    stored.properties.insert(name.clone(), field.clone());
                }
            }
        }
        Ok(())
    }

    async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<(), TransportError> {
        self.log("index_document", index);
        let mut state = self.state.write();
        state.write_target(index)?.upsert(id, document.clone());
        Ok(())
    }

    async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<(), TransportError> {
        self.log("bulk", index);
        let mut state = self.state.write();
        let target = state.write_target(index)?;
        for action in actions {
            target.upsert(&action.id, action.document.clone());
        }
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<(), TransportError> {
        self.log("delete_document", index);
        let mut state = self.state.write();
        let target = state.write_target(index)?;
        let before = target.documents.len();
        target.documents.retain(|(doc_id, _)| doc_id != id);
        if target.documents.len() == before {
            return Err(TransportError::NotFound(format!("{index}/{id}")));
        }
        Ok(())
    }

    async fn search(&self, index: &str, body: &Value, scroll: Option<&str>) -> Result<Value, TransportError> {
        self.log("search", index);
        let mut state = self.state.write();

        let query = body.get("query").cloned().unwrap_or_else(|| json!({"match_all": {}}));
        let mut matches = state.matching(index, &query)?;
        let sort = body.get("sort");
        sort_matches(&mut matches, sort)?;

        let aggregations = match body.get("aggregations").or_else(|| body.get("aggs")) {
            Some(aggs) => Some(aggregate(aggs, &matches)?),
            None => None,
        };

        let total = matches.len();
        let size = body_usize(body, "size").unwrap_or(DEFAULT_SIZE);
        let mut rendered: Vec<Value> = matches
            .iter()
            .map(|hit| render_hit(hit, body, sort.is_some()))
            .collect();

        let mut response = json!({
            "timed_out": false,
            "hits": {"total": {"value": total, "relation": "eq"}, "hits": []},
        });

        let page: Vec<Value> = match scroll {
            Some(_) => {
                let page: Vec<Value> = rendered.drain(..size.min(rendered.len())).collect();
                let id = format!("scroll-{}", self.next_scroll.fetch_add(1, AtomicOrdering::Relaxed));
                state.scrolls.insert(
                    id.clone(),
                    ScrollCursor {
                        remaining: rendered,
                        size,
                    },
                );
                response["_scroll_id"] = json!(id);
                page
            }
            None => {
                let from = body_usize(body, "from").unwrap_or(0);
                rendered.into_iter().skip(from).take(size).collect()
            }
        };
        response["hits"]["hits"] = Value::Array(page);
        if let Some(aggregations) = aggregations {
            response["aggregations"] = aggregations;
        }
        Ok(response)
    }

    async fn count(&self, index: &str, body: &Value) -> Result<u64, TransportError> {
        self.log("count", index);
        let query = body.get("query").cloned().unwrap_or_else(|| json!({"match_all": {}}));
        let matches = self.state.read().matching(index, &query)?;
        Ok(matches.len() as u64)
    }

    async fn scroll(&self, scroll_id: &str, _keep_alive: &str) -> Result<Value, TransportError> {
        self.log("scroll", scroll_id);
        let mut state = self.state.write();
        let cursor = state
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| TransportError::NotFound(scroll_id.to_string()))?;
        let take = cursor.size.min(cursor.remaining.len());
        let page: Vec<Value> = cursor.remaining.drain(..take).collect();
        Ok(json!({"_scroll_id": scroll_id, "hits": {"hits": page}}))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransportError> {
        self.log("clear_scroll", scroll_id);
        match self.state.write().scrolls.remove(scroll_id) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotFound(scroll_id.to_string())),
        }
    }

    async fn alias_exists(&self, name: &str) -> Result<bool, TransportError> {
        self.log("alias_exists", name);
        Ok(self.state.read().aliases.contains_key(name))
    }

    async fn get_alias(&self, name: &str) -> Result<Vec<String>, TransportError> {
        self.log("get_alias", name);
        self.state
            .read()
            .aliases
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(name.to_string()))
    }

    async fn put_alias(&self, index: &str, name: &str) -> Result<(), TransportError> {
        self.log("put_alias", name);
        self.apply_aliases(&[AliasAction::Add {
            index: index.to_string(),
            alias: name.to_string(),
        }])
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), TransportError> {
        self.log("update_aliases", &actions.len().to_string());
        self.apply_aliases(actions)
    }
}

impl InMemoryCluster {
    /// Validate every action, then apply them under one lock
    fn apply_aliases(&self, actions: &[AliasAction]) -> Result<(), TransportError> {
        let mut state = self.state.write();
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !state.indices.contains_key(index) {
                        return Err(TransportError::NotFound(index.clone()));
                    }
                    if state.indices.contains_key(alias) {
                        return Err(bad_request(format!(
                            "invalid_alias_name_exception: an index exists with the same name as the alias [{alias}]"
                        )));
                    }
                }
                AliasAction::Remove { index, alias } => {
                    let known = state
                        .aliases
                        .get(alias)
                        .is_some_and(|targets| targets.contains(index));
                    if !known {
                        return Err(TransportError::NotFound(format!("{alias} -> {index}")));
                    }
                }
            }
        }

        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    let targets = state.aliases.entry(alias.clone()).or_default();
                    if !targets.contains(index) {
                        targets.push(index.clone());
                    }
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(targets) = state.aliases.get_mut(alias) {
                        targets.retain(|target| target != index);
                    }
                }
            }
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

fn single_entry<'v>(value: &'v Value) -> Result<(&'v str, &'v Value), TransportError> {
    match value.as_object() {
        Some(map) if map.len() == 1 => map
            .iter()
            .next()
            .map(|(key, inner)| (key.as_str(), inner))
            .ok_or_else(|| bad_request("empty clause")),
        _ => Err(bad_request(format!("expected a single-key clause, got {value}"))),
    }
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn boost_of(value: &Value) -> f64 {
    value.get("boost").and_then(Value::as_f64).unwrap_or(1.0)
}

/// Values under a column, following nested objects and arrays for dotted paths.
fn values_at<'v>(document: &'v Value, path: &str) -> Vec<&'v Value> {
    if let Some(value) = document.get(path) {
        return vec![value];
    }
    let mut current = vec![document];
    for part in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(part)),
                Value::Array(items) => next.extend(items.iter().filter_map(|item| item.get(part))),
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn flatten(values: Vec<&Value>) -> Vec<&Value> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Value::Array(items) => out.extend(flatten(items.iter().collect())),
            other => out.push(other),
        }
    }
    out
}

fn push_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|item| push_text(item, out)),
        Value::Object(map) => map.values().for_each(|item| push_text(item, out)),
        _ => {}
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || (!a.is_null() && !b.is_null() && text_of(a) == text_of(b))
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => {
            let (x, y) = (text_of(a), text_of(b));
            match (x.parse::<f64>(), y.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y),
                _ => Some(x.cmp(&y)),
            }
        }
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (previous[j] + cost).min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

/// Edit distance allowed by `fuzziness: AUTO`
fn auto_fuzziness(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

struct MatchParams {
    query: String,
    require_all: bool,
    fuzzy: bool,
    boost: f64,
}

impl MatchParams {
    fn from_spec(spec: &Value) -> Result<Self, TransportError> {
        match spec {
            Value::String(query) => Ok(Self {
                query: query.clone(),
                require_all: false,
                fuzzy: false,
                boost: 1.0,
            }),
            Value::Object(map) => Ok(Self {
                query: map
                    .get("query")
                    .map(text_of)
                    .ok_or_else(|| bad_request("match clause needs a query"))?,
                require_all: map
                    .get("operator")
                    .and_then(Value::as_str)
                    .is_some_and(|op| op.eq_ignore_ascii_case("and")),
                fuzzy: map.contains_key("fuzziness"),
                boost: boost_of(spec),
            }),
            other => Ok(Self {
                query: text_of(other),
                require_all: false,
                fuzzy: false,
                boost: 1.0,
            }),
        }
    }
}

struct Evaluator<'a> {
    properties: &'a Map<String, Value>,
}

impl Evaluator<'_> {
    /// `Some(score)` when `query` matches `document`
    fn score(&self, query: &Value, document: &Value) -> Result<Option<f64>, TransportError> {
        let (kind, body) = single_entry(query)?;
        match kind {
            "match_all" => Ok(Some(boost_of(body))),
            "match" => self.match_clause(body, document, false),
            "match_phrase" => self.match_clause(body, document, true),
            "multi_match" => self.multi_match(body, document),
            "dis_max" => {
                let mut best: Option<f64> = None;
                for child in clauses(body.get("queries")) {
                    if let Some(score) = self.score(child, document)? {
                        best = Some(best.map_or(score, |b| b.max(score)));
                    }
                }
                Ok(best)
            }
            "bool" => self.bool_clause(body, document),
            "term" | "terms" | "prefix" | "range" | "exists" => {
                Ok(filter_matches(kind, body, document)?.then_some(1.0))
            }
            other => Err(bad_request(format!("unknown query [{other}]"))),
        }
    }

    fn bool_clause(&self, body: &Value, document: &Value) -> Result<Option<f64>, TransportError> {
        let must = clauses(body.get("must"));
        let filter = clauses(body.get("filter"));
        let should = clauses(body.get("should"));
        let must_not = clauses(body.get("must_not"));

        let mut score = 0.0;
        for clause in &must {
            match self.score(clause, document)? {
                Some(s) => score += s,
                None => return Ok(None),
            }
        }
        for clause in &filter {
            if self.score(clause, document)?.is_none() {
                return Ok(None);
            }
        }
        for clause in &must_not {
            if self.score(clause, document)?.is_some() {
                return Ok(None);
            }
        }

        let mut should_matched = 0;
        for clause in &should {
            if let Some(s) = self.score(clause, document)? {
                score += s;
                should_matched += 1;
            }
        }
        if !should.is_empty() && must.is_empty() && filter.is_empty() && should_matched == 0 {
            return Ok(None);
        }
        Ok(Some(score * boost_of(body)))
    }

    fn match_clause(&self, body: &Value, document: &Value, phrase: bool) -> Result<Option<f64>, TransportError> {
        let (column, spec) = single_entry(body)?;
        let params = MatchParams::from_spec(spec)?;

        // Keyword column: exact value match
        if column == "content_type" {
            let hit = flatten(values_at(document, column))
                .iter()
                .any(|value| value.as_str() == Some(params.query.as_str()));
            return Ok(hit.then_some(params.boost));
        }

        let score = if phrase {
            self.phrase_score(column, &params.query, document)
        } else {
            self.text_score(column, &params, document)
        };
        Ok(score.map(|s| s * params.boost))
    }

    fn multi_match(&self, body: &Value, document: &Value) -> Result<Option<f64>, TransportError> {
        let params = MatchParams::from_spec(body)?;
        let phrase = body.get("type").and_then(Value::as_str) == Some("phrase");

        let mut best: Option<f64> = None;
        for field in clauses(body.get("fields")) {
            let field = text_of(field);
            let (column, field_boost) = match field.split_once('^') {
                Some((column, boost)) => (column.to_string(), boost.parse::<f64>().unwrap_or(1.0)),
                None => (field.clone(), 1.0),
            };
            let score = if phrase {
                self.phrase_score(&column, &params.query, document)
            } else {
                self.text_score(&column, &params, document)
            };
            if let Some(score) = score {
                let score = score * field_boost;
                best = Some(best.map_or(score, |b| b.max(score)));
            }
        }
        Ok(best.map(|s| s * params.boost))
    }

    fn text_score(&self, column: &str, params: &MatchParams, document: &Value) -> Option<f64> {
        let terms = tokenize(&params.query);
        if terms.is_empty() {
            return None;
        }
        let tokens: Vec<String> = self
            .field_texts(column, document)
            .iter()
            .flat_map(|text| tokenize(text))
            .collect();
        let prefix = self.is_edgengram(column);

        let matched = terms
            .iter()
            .filter(|term| {
                tokens.iter().any(|token| {
                    if prefix {
                        token.starts_with(term.as_str())
                    } else if params.fuzzy {
                        levenshtein(token, term) <= auto_fuzziness(term)
                    } else {
                        token == *term
                    }
                })
            })
            .count();

        let matches = if params.require_all {
            matched == terms.len()
        } else {
            matched > 0
        };
        matches.then_some(matched as f64)
    }

    fn phrase_score(&self, column: &str, query: &str, document: &Value) -> Option<f64> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return None;
        }
        let found = self.field_texts(column, document).iter().any(|text| {
            let tokens = tokenize(text);
            tokens.windows(terms.len()).any(|window| window == terms.as_slice())
        });
        found.then_some(terms.len() as f64)
    }

    fn is_edgengram(&self, column: &str) -> bool {
        column == EDGENGRAMS_FIELD_NAME
            || column.ends_with(EDGENGRAMS_FIELD_NAME)
            || self
                .properties
                .get(column)
                .and_then(|field| field.get("analyzer"))
                .and_then(Value::as_str)
                == Some("edgengram_analyzer")
    }

    /// Text indexed under `column`. Aggregate columns gather their `copy_to` sources.
    fn field_texts(&self, column: &str, document: &Value) -> Vec<String> {
        let mut out = Vec::new();
        if !column.starts_with(ALL_FIELD_NAME) {
            for value in values_at(document, column) {
                push_text(value, &mut out);
            }
            return out;
        }

        let mut sources = Vec::new();
        copy_sources(self.properties, column, "", &mut sources);
        if sources.is_empty() && column == ALL_FIELD_NAME {
            // No mapping: every text value but the bookkeeping columns
            if let Some(map) = document.as_object() {
                for (key, value) in map {
                    if key != "pk" && key != "content_type" && key != EDGENGRAMS_FIELD_NAME {
                        push_text(value, &mut out);
                    }
                }
            }
            return out;
        }
        for path in sources {
            for value in values_at(document, &path) {
                push_text(value, &mut out);
            }
        }
        out
    }
}

fn copy_sources(properties: &Map<String, Value>, target: &str, prefix: &str, out: &mut Vec<String>) {
    for (name, field) in properties {
        let copies = clauses(field.get("copy_to"))
            .into_iter()
            .any(|copy| copy.as_str() == Some(target));
        if copies {
            out.push(format!("{prefix}{name}"));
        }
        if let Some(nested) = field.get("properties").and_then(Value::as_object) {
            copy_sources(nested, target, &format!("{prefix}{name}."), out);
        }
    }
}

fn filter_matches(kind: &str, body: &Value, document: &Value) -> Result<bool, TransportError> {
    if kind == "exists" {
        let column = body
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request("exists needs a field"))?;
        return Ok(flatten(values_at(document, column)).iter().any(|v| !v.is_null()));
    }

    let (column, spec) = single_entry(body)?;
    let values = flatten(values_at(document, column));
    let spec = match (kind, spec.get("value")) {
        ("term" | "prefix", Some(value)) => value,
        _ => spec,
    };

    Ok(match kind {
        "term" => values.iter().any(|value| loosely_equal(value, spec)),
        "terms" => {
            let wanted = clauses(Some(spec));
            values
                .iter()
                .any(|value| wanted.iter().any(|w| loosely_equal(value, w)))
        }
        "prefix" => {
            let prefix = text_of(spec);
            values
                .iter()
                .any(|value| value.as_str().is_some_and(|s| s.starts_with(&prefix)))
        }
        "range" => {
            let bounds = spec
                .as_object()
                .ok_or_else(|| bad_request(format!("malformed range on [{column}]")))?;
            values.iter().any(|value| {
                bounds.iter().all(|(op, bound)| {
                    let ordering = compare_values(value, bound);
                    match op.as_str() {
                        "gt" => ordering == Some(Ordering::Greater),
                        "gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                        "lt" => ordering == Some(Ordering::Less),
                        "lte" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                        _ => true,
                    }
                })
            })
        }
        _ => false,
    })
}
