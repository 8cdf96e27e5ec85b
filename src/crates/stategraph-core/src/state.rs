//! Channel schema and reducer system
//!
//! Graph state is a JSON object whose top-level keys are **channels**. Each
//! channel has a reducer that decides how a node's write is merged into the
//! current value. Nodes return *partial* updates: channels they do not mention
//! are left untouched.
//!
//! # Built-in Reducers
//!
//! | Reducer | Behavior | Commutative | Use Case |
//! |---------|----------|-------------|----------|
//! | [`OverwriteReducer`] | Last write wins (default) | no | status, names, dates |
//! | [`AppendReducer`] | Concatenate arrays in order | no | message history, logs |
//! | [`SumReducer`] | Add numbers | yes | counters |
//! | [`CustomReducer`] | Any pure closure | declared | domain merges |
//!
//! Reducers are bound per channel with [`ReducerKind`] when the graph is built,
//! and the binding is fixed once the graph is compiled.
//!
//! # Super-step merging
//!
//! When several nodes run in one super-step, their updates are merged in
//! invocation order by [`ChannelSchema::merge_step`]. Two writes to the same
//! channel in one step are only accepted if that channel's reducer is
//! commutative; otherwise the result would depend on scheduling order and the
//! merge is rejected with [`StateError::ConflictingWrites`].
//!
//! ```rust
//! use stategraph_core::state::{ChannelSchema, ReducerKind};
//! use serde_json::json;
//!
//! let mut schema = ChannelSchema::new();
//! schema.add_channel("messages", ReducerKind::Append).unwrap();
//!
//! let mut state = schema.initial_state(&json!({"messages": ["hi"], "name": "Ada"})).unwrap();
//! schema.apply(&mut state, &json!({"messages": ["hello"]})).unwrap();
//! schema.apply(&mut state, &json!({"name": "Grace"})).unwrap();
//!
//! assert_eq!(state, json!({"messages": ["hi", "hello"], "name": "Grace"}));
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by reducers and state-shape checks
#[derive(Debug, Error)]
pub enum StateError {
    /// State or update is not shaped as expected (e.g. not an object)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer encountered incompatible types or failed to merge
    #[error("Reducer '{reducer}' failed on channel '{channel}': {message}")]
    ReducerError {
        reducer: String,
        channel: String,
        message: String,
    },

    /// A channel was bound to a reducer twice
    #[error("Channel '{0}' already has a reducer")]
    DuplicateChannel(String),

    /// Several writes to one channel in a super-step through an order-dependent reducer
    #[error("Channel '{channel}' written by {writers:?} in one super-step, but reducer '{reducer}' is not commutative")]
    ConflictingWrites {
        channel: String,
        reducer: String,
        writers: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Merges an update into the current value of a channel
///
/// Reducers must be pure: the same inputs always give the same output and no
/// side effects happen. A channel that has never been written holds `Null`.
pub trait Reducer: Send + Sync {
    /// Merge `update` into `current`
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String>;

    /// Human-readable name, used in errors and logs
    fn name(&self) -> &str;

    /// Whether merging two updates in either order gives the same result
    fn is_commutative(&self) -> bool {
        false
    }
}

/// Last write wins
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Ordered concatenation
///
/// - **Array + Array**: concatenates, preserving order
/// - **Array + single value**: pushes the value
/// - **Null + anything**: starts a new array
///
/// Items are never deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut result = match current {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => {
                return Err(format!(
                    "current value must be an array, got {}",
                    json_type(other)
                ))
            }
        };
        match update {
            Value::Array(items) => result.extend(items.iter().cloned()),
            single => result.push(single.clone()),
        }
        Ok(Value::Array(result))
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Numeric addition; integers stay integers
#[derive(Debug, Clone, Copy, Default)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        match (current, update) {
            (Value::Null, Value::Number(_)) => Ok(update.clone()),
            (Value::Number(a), Value::Number(b)) => {
                if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                    if let Some(sum) = a.checked_add(b) {
                        return Ok(Value::from(sum));
                    }
                }
                let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                serde_json::Number::from_f64(a + b)
                    .map(Value::Number)
                    .ok_or_else(|| "sum is not a finite number".to_string())
            }
            (current, update) => Err(format!(
                "cannot add {} to {}",
                json_type(update),
                json_type(current)
            )),
        }
    }

    fn name(&self) -> &str {
        "sum"
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

type ReduceFn = dyn Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync;

/// Reducer backed by a user closure
#[derive(Clone)]
pub struct CustomReducer {
    name: String,
    func: Arc<ReduceFn>,
    commutative: bool,
}

impl CustomReducer {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            commutative: false,
        }
    }

    /// Declare that the closure is order-independent, allowing fan-out writes
    pub fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }
}

impl fmt::Debug for CustomReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomReducer")
            .field("name", &self.name)
            .field("commutative", &self.commutative)
            .finish()
    }
}

impl Reducer for CustomReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        (self.func)(current, update)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_commutative(&self) -> bool {
        self.commutative
    }
}

/// Reducer binding for a channel
#[derive(Clone)]
pub enum ReducerKind {
    /// Last write wins
    Overwrite,
    /// Ordered concatenation
    Append,
    /// Any other reducer
    Custom(Arc<dyn Reducer>),
}

impl ReducerKind {
    /// Bind a closure as a custom reducer
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        ReducerKind::Custom(Arc::new(CustomReducer::new(name, func)))
    }

    /// Numeric sum, a commutative custom reducer
    pub fn sum() -> Self {
        ReducerKind::Custom(Arc::new(SumReducer))
    }

    fn into_reducer(self) -> Arc<dyn Reducer> {
        match self {
            ReducerKind::Overwrite => Arc::new(OverwriteReducer),
            ReducerKind::Append => Arc::new(AppendReducer),
            ReducerKind::Custom(reducer) => reducer,
        }
    }
}

impl fmt::Debug for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerKind::Overwrite => f.write_str("Overwrite"),
            ReducerKind::Append => f.write_str("Append"),
            ReducerKind::Custom(r) => f.debug_tuple("Custom").field(&r.name()).finish(),
        }
    }
}

/// Registry binding channel names to reducers
///
/// Channels without an explicit binding use [`OverwriteReducer`].
#[derive(Clone, Default)]
pub struct ChannelSchema {
    channels: HashMap<String, Arc<dyn Reducer>>,
}

impl ChannelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a reducer to a channel
    pub fn add_channel(&mut self, name: impl Into<String>, kind: ReducerKind) -> Result<()> {
        let name = name.into();
        if self.channels.contains_key(&name) {
            return Err(StateError::DuplicateChannel(name));
        }
        self.channels.insert(name, kind.into_reducer());
        Ok(())
    }

    /// Reducer used for a channel
    pub fn reducer_for(&self, channel: &str) -> &dyn Reducer {
        match self.channels.get(channel) {
            Some(reducer) => reducer.as_ref(),
            None => &OverwriteReducer,
        }
    }

    /// Channels with an explicit binding, sorted by name
    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// First declared channel whose reducer is order-dependent
    pub fn first_non_commutative(&self) -> Option<(&str, &str)> {
        let mut names = self.channel_names();
        names.retain(|name| !self.reducer_for(name).is_commutative());
        names
            .first()
            .map(|name| (*name, self.reducer_for(name).name()))
    }

    /// Build a thread's first state by merging `input` into empty channels
    ///
    /// A `null` input gives an empty state.
    pub fn initial_state(&self, input: &Value) -> Result<Value> {
        let mut state = Value::Object(Map::new());
        if !input.is_null() {
            self.apply(&mut state, input)?;
        }
        Ok(state)
    }

    /// Merge a partial update into `state` channel by channel
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("state must be an object".to_string()))?;
        let update_obj = as_update(update)?;
        let null = Value::Null;

        for (channel, value) in update_obj {
            let reducer = self.reducer_for(channel);
            let current = state_obj.get(channel).unwrap_or(&null);
            let merged = reducer
                .reduce(current, value)
                .map_err(|message| StateError::ReducerError {
                    reducer: reducer.name().to_string(),
                    channel: channel.clone(),
                    message,
                })?;
            state_obj.insert(channel.clone(), merged);
        }
        Ok(())
    }

    /// Merge the updates of one super-step into a copy of `state`
    ///
    /// `updates` pairs each writer (node name) with its partial update, in
    /// invocation order. The input state is left untouched so the caller can
    /// commit the result only after it has been persisted.
    pub fn merge_step(&self, state: &Value, updates: &[(String, Value)]) -> Result<Value> {
        let mut writers: HashMap<&str, Vec<String>> = HashMap::new();
        for (writer, update) in updates {
            for channel in as_update(update)?.keys() {
                writers
                    .entry(channel.as_str())
                    .or_default()
                    .push(writer.clone());
            }
        }

        let mut conflicts: Vec<(&str, Vec<String>)> = writers
            .into_iter()
            .filter(|(channel, w)| w.len() > 1 && !self.reducer_for(channel).is_commutative())
            .collect();
        conflicts.sort_by(|a, b| a.0.cmp(b.0));
        if let Some((channel, writers)) = conflicts.into_iter().next() {
            return Err(StateError::ConflictingWrites {
                channel: channel.to_string(),
                reducer: self.reducer_for(channel).name().to_string(),
                writers,
            });
        }

        let mut next = state.clone();
        for (_, update) in updates {
            self.apply(&mut next, update)?;
        }
        Ok(next)
    }
}

impl fmt::Debug for ChannelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for name in self.channel_names() {
            map.entry(&name, &self.reducer_for(name).name());
        }
        map.finish()
    }
}

/// View an update as a channel map; `null` is an empty update
fn as_update(update: &Value) -> Result<&Map<String, Value>> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    match update {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(EMPTY.get_or_init(Map::new)),
        other => Err(StateError::InvalidState(format!(
            "update must be an object of channel values, got {}",
            json_type(other)
        ))),
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
