//! Caller-facing operation catalog.
//!
//! A fixed set of named operations, each with a declared JSON input schema,
//! dispatched against the [`Swarm`] facade. Every operation returns either
//! a success payload or a structured error payload; nothing panics or
//! propagates an error past this boundary.

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::boomerang::BoomerangOptions;
use crate::errors::SwarmError;
use crate::swarm::Swarm;
use crate::types::{AgentType, TaskStatus};

/// A named operation with its input schema.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    /// Operation name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// JSON schema of the operation input.
    pub input_schema: Value,
}

/// The fixed operation catalog.
pub static CATALOG: Lazy<Vec<OperationSpec>> = Lazy::new(|| {
    vec![
        OperationSpec {
            name: "list_agents",
            description: "List agents, optionally filtered by capability type",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_type": {"type": "string"}
                }
            }),
        },
        OperationSpec {
            name: "get_agent_status",
            description: "Get one agent's status and statistics",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"}
                },
                "required": ["agent_id"]
            }),
        },
        OperationSpec {
            name: "delegate_task",
            description: "Create a task and delegate it to the best available agent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string"},
                    "agent_type": {"type": "string"},
                    "priority": {"type": "integer", "minimum": 1, "maximum": 5}
                },
                "required": ["description", "agent_type"]
            }),
        },
        OperationSpec {
            name: "get_task",
            description: "Get one task by id",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"}
                },
                "required": ["task_id"]
            }),
        },
        OperationSpec {
            name: "list_tasks",
            description: "List tasks, optionally filtered by status and capability type",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string"},
                    "agent_type": {"type": "string"}
                }
            }),
        },
        OperationSpec {
            name: "create_team",
            description: "Create a worker pool of one capability type",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_type": {"type": "string"},
                    "min_workers": {"type": "integer", "minimum": 0},
                    "max_workers": {"type": "integer", "minimum": 1},
                    "strategy": {"type": "string"}
                },
                "required": ["agent_type", "min_workers", "max_workers"]
            }),
        },
        OperationSpec {
            name: "execute_phase_workflow",
            description: "Create a five-phase workflow for a project description and run it",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string"},
                    "requirements": {"type": "array", "items": {"type": "string"}},
                    "constraints": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["description"]
            }),
        },
        OperationSpec {
            name: "send_boomerang",
            description: "Send a task's output back to an agent for refinement",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"},
                    "target_agent": {"type": "string"},
                    "feedback": {"type": "string"},
                    "max_refinements": {"type": "integer", "minimum": 1}
                },
                "required": ["task_id", "target_agent", "feedback"]
            }),
        },
        OperationSpec {
            name: "integrate_external",
            description: "Invoke a tool on a registered external collaborator",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collaborator": {"type": "string"},
                    "tool": {"type": "string"},
                    "arguments": {"type": "object"}
                },
                "required": ["collaborator", "tool"]
            }),
        },
        OperationSpec {
            name: "get_capabilities",
            description: "List every agent capability type with its tags",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        OperationSpec {
            name: "share_knowledge",
            description: "Store a knowledge value in memory and log the sharing message",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "topic": {"type": "string"},
                    "content": {},
                    "importance": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "from": {"type": "string"}
                },
                "required": ["key", "topic", "content"]
            }),
        },
    ]
});

/// Wrap a payload in the success envelope.
fn success(payload: Value) -> Value {
    json!({"success": true, "result": payload})
}

/// Wrap an error in the error envelope.
fn error_payload(err: &SwarmError) -> Value {
    json!({
        "success": false,
        "error": {"code": err.code(), "message": err.to_string()}
    })
}

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, SwarmError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SwarmError::Validation(format!("missing required field '{}'", field)))
}

fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Value::as_str)
}

fn parse_uuid(value: &str, field: &str) -> Result<Uuid, SwarmError> {
    Uuid::parse_str(value)
        .map_err(|_| SwarmError::Validation(format!("'{}' is not a valid id: {}", field, value)))
}

fn parse_agent_type(value: &str) -> Result<AgentType, SwarmError> {
    AgentType::parse(value)
        .ok_or_else(|| SwarmError::Validation(format!("unknown agent type: {}", value)))
}

fn parse_status(value: &str) -> Result<TaskStatus, SwarmError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| SwarmError::Validation(format!("unknown task status: {}", value)))
}

fn string_list(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

impl Swarm {
    /// Execute a cataloged operation by name.
    ///
    /// Always returns a JSON envelope: `{"success": true, "result": ...}`
    /// or `{"success": false, "error": {"code", "message"}}`.
    pub async fn execute_operation(&self, name: &str, args: Value) -> Value {
        match self.dispatch(name, args).await {
            Ok(payload) => success(payload),
            Err(err) => {
                log::warn!("operation {} failed: {}", name, err);
                error_payload(&err)
            }
        }
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, SwarmError> {
        match name {
            "list_agents" => {
                let agent_type = optional_str(&args, "agent_type")
                    .map(parse_agent_type)
                    .transpose()?;
                let orchestrator = self.orchestrator();
                let orchestrator = orchestrator.lock().await;
                let agents = orchestrator.pools().agents_snapshot(agent_type);
                Ok(json!({"agents": agents, "count": agents.len()}))
            }
            "get_agent_status" => {
                let agent_id = parse_uuid(require_str(&args, "agent_id")?, "agent_id")?;
                let orchestrator = self.orchestrator();
                let orchestrator = orchestrator.lock().await;
                let agent = orchestrator.pools().agent(agent_id).ok_or(SwarmError::NotFound {
                    kind: "agent",
                    id: agent_id.to_string(),
                })?;
                Ok(json!({
                    "agent_id": agent.id,
                    "name": agent.name,
                    "status": agent.status,
                    "current_load": agent.current_load(),
                    "stats": agent.stats,
                }))
            }
            "delegate_task" => {
                let description = require_str(&args, "description")?.to_string();
                let agent_type = parse_agent_type(require_str(&args, "agent_type")?)?;
                let priority = args.get("priority").and_then(Value::as_u64).unwrap_or(3) as u8;
                let orchestrator = self.orchestrator();
                let mut orchestrator = orchestrator.lock().await;
                let task_id = orchestrator.create_task(description, agent_type, priority, vec![]);
                let task = orchestrator.delegate_task(task_id, None).await?;
                Ok(json!({"task": task}))
            }
            "get_task" => {
                let task_id = parse_uuid(require_str(&args, "task_id")?, "task_id")?;
                let orchestrator = self.orchestrator();
                let orchestrator = orchestrator.lock().await;
                let task = orchestrator
                    .task(task_id)
                    .or_else(|| self.workflows().read().task(task_id))
                    .ok_or(SwarmError::NotFound { kind: "task", id: task_id.to_string() })?;
                Ok(json!({"task": task}))
            }
            "list_tasks" => {
                let status = optional_str(&args, "status").map(parse_status).transpose()?;
                let agent_type = optional_str(&args, "agent_type")
                    .map(parse_agent_type)
                    .transpose()?;
                let orchestrator = self.orchestrator();
                let orchestrator = orchestrator.lock().await;
                let tasks = orchestrator.list_tasks(status, agent_type);
                Ok(json!({"tasks": tasks, "count": tasks.len()}))
            }
            "create_team" => {
                let agent_type = parse_agent_type(require_str(&args, "agent_type")?)?;
                let min_workers = args
                    .get("min_workers")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| SwarmError::Validation("missing required field 'min_workers'".into()))?
                    as usize;
                let max_workers = args
                    .get("max_workers")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| SwarmError::Validation("missing required field 'max_workers'".into()))?
                    as usize;
                let strategy = match optional_str(&args, "strategy") {
                    Some(s) => serde_json::from_value(Value::String(s.to_string()))
                        .map_err(|_| SwarmError::Validation(format!("unknown strategy: {}", s)))?,
                    None => self.config().load_balance_strategy,
                };
                let orchestrator = self.orchestrator();
                let mut orchestrator = orchestrator.lock().await;
                let pool_id = orchestrator
                    .pools_mut()
                    .create_pool(agent_type, min_workers, max_workers, strategy)?;
                Ok(json!({"pool_id": pool_id, "agent_type": agent_type}))
            }
            "execute_phase_workflow" => {
                let description = require_str(&args, "description")?.to_string();
                let requirements = string_list(&args, "requirements");
                let constraints = string_list(&args, "constraints");
                let workflow_id = self
                    .workflows()
                    .write()
                    .create_workflow(description, requirements, constraints)?;
                let status = self.run_workflow(workflow_id).await?;
                let summary = self.workflows().read().compile_final_results(workflow_id)?;
                Ok(json!({"workflow_id": workflow_id, "status": status, "summary": summary}))
            }
            "send_boomerang" => {
                let task_id = parse_uuid(require_str(&args, "task_id")?, "task_id")?;
                let target_agent = parse_uuid(require_str(&args, "target_agent")?, "target_agent")?;
                let feedback = require_str(&args, "feedback")?;
                let max_refinements =
                    args.get("max_refinements").and_then(Value::as_u64).map(|v| v as u32);

                let task = {
                    let orchestrator = self.orchestrator();
                    let orchestrator = orchestrator.lock().await;
                    orchestrator
                        .task(task_id)
                        .ok_or(SwarmError::NotFound { kind: "task", id: task_id.to_string() })?
                };
                let boomerang_id = self.boomerangs().write().send_boomerang(
                    &task,
                    target_agent,
                    feedback,
                    BoomerangOptions { max_refinements, ..Default::default() },
                )?;
                let boomerangs = self.boomerangs();
                let boomerangs = boomerangs.read();
                let boomerang = boomerangs.boomerang(boomerang_id).expect("just created");
                Ok(json!({
                    "boomerang_id": boomerang_id,
                    "category": boomerang.category,
                    "priority": boomerang.priority,
                    "target_quality": boomerang.target_quality,
                }))
            }
            "integrate_external" => {
                let collaborator_name = require_str(&args, "collaborator")?;
                let tool = require_str(&args, "tool")?;
                let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let client = self.collaborator(collaborator_name).ok_or(SwarmError::NotFound {
                    kind: "collaborator",
                    id: collaborator_name.to_string(),
                })?;
                let response = client.call(tool, arguments).await?;
                Ok(json!({"content": response.content}))
            }
            "get_capabilities" => {
                let capabilities: Vec<Value> = AgentType::ALL
                    .iter()
                    .map(|t| {
                        json!({
                            "agent_type": t,
                            "description": t.description(),
                            "capabilities": t.capabilities(),
                        })
                    })
                    .collect();
                Ok(json!({"capabilities": capabilities}))
            }
            "share_knowledge" => {
                let key = require_str(&args, "key")?.to_string();
                let topic = require_str(&args, "topic")?.to_string();
                let content = args
                    .get("content")
                    .cloned()
                    .ok_or_else(|| SwarmError::Validation("missing required field 'content'".into()))?;
                let importance = args.get("importance").and_then(Value::as_f64).unwrap_or(0.5);
                let from = optional_str(&args, "from").map(|s| s.to_string());
                let message = self.share_knowledge(key, topic, content, importance, from)?;
                Ok(json!({"message_id": message.id, "topic": message.topic}))
            }
            other => Err(SwarmError::Validation(format!("unknown operation: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmConfig;
    use crate::orchestrator::FnExecutor;
    use crate::persistence::InMemoryStore;
    use std::sync::Arc;

    fn swarm() -> Swarm {
        Swarm::new(
            SwarmConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(FnExecutor::echo(0.9)),
        )
        .unwrap()
    }

    #[test]
    fn test_catalog_is_complete() {
        let names: Vec<&str> = CATALOG.iter().map(|op| op.name).collect();
        assert_eq!(names.len(), 11);
        assert!(names.contains(&"delegate_task"));
        assert!(names.contains(&"share_knowledge"));
        for op in CATALOG.iter() {
            assert!(op.input_schema.get("type").is_some());
        }
    }

    #[tokio::test]
    async fn test_list_agents_operation() {
        let swarm = swarm();
        let result = swarm
            .execute_operation("list_agents", json!({"agent_type": "research"}))
            .await;
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["result"]["count"], json!(1));
    }

    #[tokio::test]
    async fn test_delegate_task_operation_round_trip() {
        let swarm = swarm();
        let result = swarm
            .execute_operation(
                "delegate_task",
                json!({"description": "map the codebase", "agent_type": "research"}),
            )
            .await;
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["result"]["task"]["status"], json!("completed"));

        let task_id = result["result"]["task"]["id"].as_str().unwrap().to_string();
        let fetched = swarm
            .execute_operation("get_task", json!({"task_id": task_id}))
            .await;
        assert_eq!(fetched["result"]["task"]["id"].as_str().unwrap(), task_id);
    }

    #[tokio::test]
    async fn test_unknown_operation_returns_error_payload() {
        let swarm = swarm();
        let result = swarm.execute_operation("explode", json!({})).await;
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["error"]["code"], json!("validation"));
    }

    #[tokio::test]
    async fn test_missing_field_is_validation_error() {
        let swarm = swarm();
        let result = swarm.execute_operation("get_agent_status", json!({})).await;
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["error"]["code"], json!("validation"));
    }

    #[tokio::test]
    async fn test_create_team_and_capabilities() {
        let swarm = swarm();
        let result = swarm
            .execute_operation(
                "create_team",
                json!({"agent_type": "debugger", "min_workers": 1, "max_workers": 3}),
            )
            .await;
        assert_eq!(result["success"], json!(true));

        let caps = swarm.execute_operation("get_capabilities", json!({})).await;
        let list = caps["result"]["capabilities"].as_array().unwrap();
        assert_eq!(list.len(), AgentType::ALL.len());
    }

    #[tokio::test]
    async fn test_send_boomerang_operation() {
        let swarm = swarm();
        let delegated = swarm
            .execute_operation(
                "delegate_task",
                json!({"description": "draft the report", "agent_type": "review"}),
            )
            .await;
        assert_eq!(delegated["success"], json!(true));
        let task = &delegated["result"]["task"];
        let agent_id = task["assigned_agent"].as_str().unwrap();
        let result = swarm
            .execute_operation(
                "send_boomerang",
                json!({
                    "task_id": task["id"],
                    "target_agent": agent_id,
                    "feedback": "critical bug, please fix ASAP",
                }),
            )
            .await;
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["result"]["category"], json!("error_correction"));
        assert_eq!(result["result"]["priority"], json!(4));
    }
}
