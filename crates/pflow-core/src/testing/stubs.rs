//! Deterministic stub nodes.

use serde_json::{Map, Value};

use crate::error::{EngineError, ErrorCategory, ErrorSource, Result};
use crate::ir::DEFAULT_ACTION;
use crate::node::{Action, BoxedNode, Node, Params};
use crate::store::{LlmCallRecord, SharedStore};
use crate::template::resolver::interpolate_value;

/// Echoes its `msg` param as a string under `text`.
#[derive(Debug, Clone, Default)]
pub struct EchoNode {
    params: Params,
}

impl Node for EchoNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(self.params.get("msg").cloned().unwrap_or(Value::Null))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        Ok(Value::String(interpolate_value(&prep_result)))
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        shared.insert("text", exec_result);
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Doubles an integer `x`; refuses anything that is not an integer.
#[derive(Debug, Clone, Default)]
pub struct MathNode {
    params: Params,
}

impl Node for MathNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(self.params.get("x").cloned().unwrap_or(Value::Null))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        let x = prep_result.as_i64().ok_or_else(|| {
            EngineError::new(
                ErrorSource::Node,
                ErrorCategory::ValidationError,
                format!("x must be an integer, got {}", prep_result),
            )
        })?;
        Ok(Value::from(x * 2))
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        shared.insert("result", exec_result);
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Squares the value bound under a store key (default `item`); fails on
/// non-numeric values. Optionally records one LLM usage record per run.
#[derive(Debug, Clone)]
pub struct SquareNode {
    source_key: String,
    record_llm: bool,
}

impl Default for SquareNode {
    fn default() -> Self {
        Self {
            source_key: "item".to_string(),
            record_llm: false,
        }
    }
}

impl SquareNode {
    pub fn reading_from(key: &str) -> Self {
        Self {
            source_key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn with_llm_usage() -> Self {
        Self {
            record_llm: true,
            ..Self::default()
        }
    }
}

impl Node for SquareNode {
    fn set_params(&mut self, _params: Params) -> Result<()> {
        Ok(())
    }

    fn prep(&mut self, shared: &SharedStore) -> Result<Value> {
        Ok(shared.get(&self.source_key).cloned().unwrap_or(Value::Null))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        let n = prep_result.as_i64().ok_or_else(|| {
            EngineError::runtime(format!("cannot square non-numeric value {}", prep_result))
        })?;
        Ok(Value::from(n * n))
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        if self.record_llm {
            shared.coordination.llm_calls.push(LlmCallRecord {
                model: "stub-small".to_string(),
                input_tokens: 12,
                output_tokens: 4,
                cost_usd: 0.0002,
                node_id: None,
            });
        }
        shared.insert("result", exec_result);
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Pretends to run a shell command. `echo <text>` yields `<text>\n` on
/// stdout exactly like a real shell, including the trailing newline.
#[derive(Debug, Clone, Default)]
pub struct ShellStubNode {
    params: Params,
}

impl Node for ShellStubNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(self.params.get("cmd").cloned().unwrap_or(Value::Null))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        let cmd = prep_result
            .as_str()
            .ok_or_else(|| EngineError::runtime("cmd must be a string"))?;
        let stdout = match cmd.strip_prefix("echo ") {
            Some(rest) => {
                let text = rest.trim().trim_matches('\'').trim_matches('"');
                format!("{}\n", text)
            }
            None => String::new(),
        };
        Ok(serde_json::json!({"stdout": stdout, "exit_code": 0}))
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        if let Value::Object(map) = exec_result {
            for (key, value) in map {
                shared.insert(key, value);
            }
        }
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Sums a list param `xs` into `total`.
#[derive(Debug, Clone, Default)]
pub struct ListSumNode {
    params: Params,
}

impl Node for ListSumNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(self.params.get("xs").cloned().unwrap_or(Value::Null))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        let items = prep_result.as_array().ok_or_else(|| {
            EngineError::new(
                ErrorSource::Node,
                ErrorCategory::ValidationError,
                format!("xs must be an array, got {}", prep_result),
            )
        })?;
        let total: i64 = items.iter().filter_map(Value::as_i64).sum();
        Ok(Value::from(total))
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        shared.insert("total", exec_result);
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Returns the action named by its `action` param; `default` otherwise.
#[derive(Debug, Clone, Default)]
pub struct ActionNode {
    params: Params,
}

impl Node for ActionNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(Value::Null)
    }

    fn exec(&mut self, _prep_result: Value) -> Result<Value> {
        Ok(Value::Null)
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        _exec_result: Value,
    ) -> Result<Action> {
        let action = self
            .params
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ACTION)
            .to_string();
        shared.insert("status", Value::String(action.clone()));
        Ok(action)
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Fakes an LLM round-trip: writes `answer` and records usage.
#[derive(Debug, Clone, Default)]
pub struct LlmStubNode {
    params: Params,
}

impl Node for LlmStubNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(self.params.get("prompt").cloned().unwrap_or(Value::Null))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        Ok(Value::String(format!(
            "stubbed answer to: {}",
            interpolate_value(&prep_result)
        )))
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        shared.coordination.llm_calls.push(LlmCallRecord {
            model: "stub-large".to_string(),
            input_tokens: 40,
            output_tokens: 16,
            cost_usd: 0.0008,
            node_id: None,
        });
        shared.insert("answer", exec_result);
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Captures whatever params it is handed; `prep` returns them. Useful for
/// asserting what the wrapper chain forwarded.
#[derive(Debug, Clone, Default)]
pub struct CaptureParamsNode {
    params: Params,
}

impl Node for CaptureParamsNode {
    fn set_params(&mut self, params: Params) -> Result<()> {
        self.params = params;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(Value::Object(self.params.clone()))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        Ok(prep_result)
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        shared.insert("params", exec_result);
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Writes a configured set of keys in `post`. Builders add probing of a
/// store key, a fixed exec output, or a deliberate failure.
#[derive(Debug, Clone)]
pub struct WriteKeysNode {
    writes: Map<String, Value>,
    probe: Option<String>,
    probed: Option<Value>,
    exec_output: Value,
    fail_message: Option<String>,
}

impl WriteKeysNode {
    pub fn new(writes: Value) -> Self {
        Self {
            writes: writes.as_object().cloned().unwrap_or_default(),
            probe: None,
            probed: None,
            exec_output: Value::Null,
            fail_message: None,
        }
    }

    /// Echo `shared[key]` back out as `<key>_seen`.
    pub fn probing(mut self, key: &str) -> Self {
        self.probe = Some(key.to_string());
        self
    }

    /// Fixed exec output, e.g. a canned API response.
    pub fn with_exec_output(mut self, output: Value) -> Self {
        self.exec_output = output;
        self
    }

    /// Record an llm call, then fail in `post`.
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_message = Some(message.to_string());
        self
    }
}

impl Node for WriteKeysNode {
    fn set_params(&mut self, _params: Params) -> Result<()> {
        Ok(())
    }

    fn prep(&mut self, shared: &SharedStore) -> Result<Value> {
        if let Some(key) = &self.probe {
            self.probed = shared.get(key).cloned();
        }
        Ok(Value::Null)
    }

    fn exec(&mut self, _prep_result: Value) -> Result<Value> {
        Ok(self.exec_output.clone())
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        _exec_result: Value,
    ) -> Result<Action> {
        if let Some(message) = &self.fail_message {
            shared.coordination.llm_calls.push(LlmCallRecord {
                model: "stub-small".to_string(),
                input_tokens: 1,
                output_tokens: 1,
                cost_usd: 0.0,
                node_id: None,
            });
            return Err(EngineError::runtime(message.clone()));
        }
        for (key, value) in &self.writes {
            shared.insert(key.clone(), value.clone());
        }
        if let (Some(key), Some(value)) = (&self.probe, &self.probed) {
            shared.insert(format!("{}_seen", key), value.clone());
        }
        Ok(DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}
