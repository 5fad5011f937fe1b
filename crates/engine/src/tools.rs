//! The tool surface: named, typed operations served over both REST and MCP.
//!
//! Each tool has an argument struct (unknown fields rejected), a
//! hand-written JSON schema, and a result shape. [`dispatch`] validates the
//! arguments and routes to the [`Coordinator`]; transports never reach the
//! coordinator directly with untyped input.

use crate::coordinator::Coordinator;
use crate::error::{EngineError, EngineResult};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// A tool's name, human description, and argument schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn sandbox_id_property() -> Value {
    json!({"type": "string", "description": "Sandbox id returned by create_sandbox"})
}

/// All tools, in the order they are listed to clients.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "create_sandbox",
            description: "Create a new Python sandbox and return its id for subsequent operations.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Optional display name"}
                },
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "list_sandboxes",
            description: "List your sandboxes with their names and timestamps.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "delete_sandbox",
            description: "Delete a sandbox, its container, and every file it published.",
            input_schema: json!({
                "type": "object",
                "properties": {"id": sandbox_id_property()},
                "required": ["id"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "execute_python_code",
            description: "Run Python code in a sandbox; returns stdout, stderr, and links to any files the code produced.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id_property(),
                    "code": {"type": "string", "description": "Python source to execute"}
                },
                "required": ["sandbox_id", "code"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "install_package_in_sandbox",
            description: "Start installing a Python package in a sandbox; poll check_package_installation_status for the outcome.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id_property(),
                    "package_name": {"type": "string", "description": "Package to install"}
                },
                "required": ["sandbox_id", "package_name"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "check_package_installation_status",
            description: "Check the status of a package installation (installing, success, or failed).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id_property(),
                    "package_name": {"type": "string", "description": "Package to check"}
                },
                "required": ["sandbox_id", "package_name"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "execute_terminal_command",
            description: "Run a shell command in a sandbox; returns stdout, stderr, and the exit code.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id_property(),
                    "command": {"type": "string", "description": "Shell command to execute"}
                },
                "required": ["sandbox_id", "command"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "upload_file_to_sandbox",
            description: "Copy a broker-host file into a sandbox (default destination: /app/results).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sandbox_id": sandbox_id_property(),
                    "local_file_path": {"type": "string", "description": "Path on the broker host"},
                    "dest_path": {"type": "string", "description": "Destination directory in the sandbox"}
                },
                "required": ["sandbox_id", "local_file_path"],
                "additionalProperties": false
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateSandboxArgs {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListSandboxesArgs {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteSandboxArgs {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecutePythonCodeArgs {
    sandbox_id: Uuid,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageArgs {
    sandbox_id: Uuid,
    package_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecuteTerminalArgs {
    sandbox_id: Uuid,
    command: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UploadFileArgs {
    sandbox_id: Uuid,
    local_file_path: String,
    dest_path: Option<String>,
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> EngineResult<T> {
    serde_json::from_value(args).map_err(|e| EngineError::InvalidArgument(e.to_string()))
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

/// Validate arguments and invoke a tool on behalf of `user_id`.
pub async fn dispatch(
    coordinator: &Coordinator,
    user_id: Uuid,
    tool: &str,
    args: Value,
) -> EngineResult<Value> {
    match tool {
        "create_sandbox" => {
            let args: CreateSandboxArgs = parse_args(args)?;
            let sandbox = coordinator.create_sandbox(user_id, args.name).await?;
            Ok(json!({"id": sandbox.sandbox_id, "name": sandbox.name}))
        }
        "list_sandboxes" => {
            let _args: ListSandboxesArgs = parse_args(args)?;
            let sandboxes = coordinator.list_sandboxes(user_id).await?;
            let listed: Vec<Value> = sandboxes
                .iter()
                .map(|s| {
                    json!({
                        "id": s.sandbox_id,
                        "name": s.name,
                        "created_at": rfc3339(s.created_at),
                        "last_used_at": rfc3339(s.last_used_at),
                    })
                })
                .collect();
            Ok(json!({"sandboxes": listed}))
        }
        "delete_sandbox" => {
            let args: DeleteSandboxArgs = parse_args(args)?;
            coordinator.delete_sandbox(user_id, args.id).await?;
            Ok(json!({"ok": true}))
        }
        "execute_python_code" => {
            let args: ExecutePythonCodeArgs = parse_args(args)?;
            let result = coordinator
                .execute_code(user_id, args.sandbox_id, &args.code)
                .await?;
            Ok(json!({
                "stdout": result.stdout,
                "stderr": result.stderr,
                "file_links": result.file_links,
            }))
        }
        "install_package_in_sandbox" => {
            let args: PackageArgs = parse_args(args)?;
            let started = coordinator
                .install_package(user_id, args.sandbox_id, &args.package_name)
                .await?;
            Ok(json!({"status": started.status, "record_id": started.record_id}))
        }
        "check_package_installation_status" => {
            let args: PackageArgs = parse_args(args)?;
            let record = coordinator
                .check_package_status(user_id, args.sandbox_id, &args.package_name)
                .await?;
            let detail = match record.state {
                crate::install::InstallState::Failed => record.stderr_tail.clone(),
                _ => record.stdout_tail.clone(),
            };
            Ok(json!({
                "status": record.state.as_str(),
                "detail": detail,
                "started_at": rfc3339(record.started_at),
                "finished_at": record.finished_at.map(rfc3339),
            }))
        }
        "execute_terminal_command" => {
            let args: ExecuteTerminalArgs = parse_args(args)?;
            let result = coordinator
                .execute_terminal(user_id, args.sandbox_id, &args.command)
                .await?;
            Ok(json!({
                "stdout": result.stdout,
                "stderr": result.stderr,
                "exit_code": result.exit_code,
            }))
        }
        "upload_file_to_sandbox" => {
            let args: UploadFileArgs = parse_args(args)?;
            let path = coordinator
                .upload_file(
                    user_id,
                    args.sandbox_id,
                    &args.local_file_path,
                    args.dest_path.as_deref(),
                )
                .await?;
            Ok(json!({"path_in_container": path}))
        }
        other => Err(EngineError::NotFound(format!("no such tool: {other}"))),
    }
}
