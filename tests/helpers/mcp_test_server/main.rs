//! MCP test server binary for integration tests
//!
//! This binary implements a small MCP server that communicates over
//! stdin/stdout using newline-delimited JSON. Integration tests spawn it
//! through the stdio transport to exercise a real child process.
//!
//! # Handled Methods
//!
//! - `initialize` -- advertises tools, resources and prompts.
//! - `notifications/initialized` -- swallowed.
//! - `ping` -- empty result.
//! - `tools/list` -- `echo`, `fail`, `slow`, `notify`, served one page at a
//!   time (two tools per page) to exercise cursors.
//! - `tools/call`:
//!   - `echo` returns `arguments.message`
//!   - `fail` returns `isError: true`
//!   - `slow` sleeps `arguments.ms` (default 500) before answering
//!   - `notify` emits `notifications/message` and then answers
//!   - anything else is a `-32601` error naming the tool
//! - `resources/list` / `resources/read` -- one text resource,
//!   `test://greeting`; unknown URIs give `-32002`.
//! - `prompts/list` / `prompts/get` -- one prompt, `greet`, with a `name`
//!   argument.
//!
//! On startup a non-JSON banner line is written to stdout and a line to
//! stderr. Both must be tolerated by the client.
//!
//! # Environment
//!
//! - `MCP_TEST_SERVER_PROTOCOL` -- protocol version to report.
//! - `MCP_TEST_SERVER_EXIT_ON` -- exit immediately when this method arrives.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{json, Value};

const PAGE_SIZE: usize = 2;

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    eprintln!("mcp_test_server: ready");
    let _ = writeln!(out, "mcp_test_server starting (this line is not JSON)");
    let _ = out.flush();

    let protocol =
        std::env::var("MCP_TEST_SERVER_PROTOCOL").unwrap_or_else(|_| "2025-11-25".to_string());
    let exit_on = std::env::var("MCP_TEST_SERVER_EXIT_ON").ok();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&Value::Null, -32700, "Parse error");
                if write_line(&mut out, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        if exit_on.as_deref() == Some(method) {
            std::process::exit(3);
        }

        // Notifications carry no id and get no reply.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let response = match method {
            "initialize" => handle_initialize(&id, &protocol),
            "ping" => make_result(&id, json!({})),
            "tools/list" => handle_tools_list(&id, &params),
            "tools/call" => handle_tools_call(&id, &params, &mut out),
            "resources/list" => handle_resources_list(&id),
            "resources/read" => handle_resources_read(&id, &params),
            "prompts/list" => handle_prompts_list(&id),
            "prompts/get" => handle_prompts_get(&id, &params),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if write_line(&mut out, &response).is_err() {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, value: &Value) -> io::Result<()> {
    let serialized = serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    writeln!(out, "{}", serialized)?;
    out.flush()
}

fn handle_initialize(id: &Value, protocol: &str) -> Value {
    make_result(
        id,
        json!({
            "protocolVersion": protocol,
            "capabilities": {
                "tools": {"listChanged": true},
                "resources": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": "mcp-test-server",
                "version": "0.1.0"
            },
            "instructions": "Integration test server"
        }),
    )
}

fn all_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "echo",
            "description": "Echoes input",
            "inputSchema": {
                "type": "object",
                "properties": {"message": {"type": "string"}}
            }
        }),
        json!({"name": "fail", "description": "Always reports a tool error"}),
        json!({
            "name": "slow",
            "description": "Answers after a delay",
            "inputSchema": {
                "type": "object",
                "properties": {"ms": {"type": "integer"}}
            }
        }),
        json!({"name": "notify", "description": "Sends a log notification first"}),
    ]
}

fn handle_tools_list(id: &Value, params: &Value) -> Value {
    let tools = all_tools();
    let start = params
        .get("cursor")
        .and_then(|c| c.as_str())
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0)
        .min(tools.len());
    let end = (start + PAGE_SIZE).min(tools.len());

    let mut result = json!({"tools": tools[start..end].to_vec()});
    if end < tools.len() {
        result["nextCursor"] = json!(end.to_string());
    }
    make_result(id, result)
}

fn handle_tools_call(id: &Value, params: &Value, out: &mut impl Write) -> Value {
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match tool_name {
        "echo" => {
            let message = arguments
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("");
            text_result(id, message, false)
        }
        "fail" => text_result(id, "something went wrong", true),
        "slow" => {
            let ms = arguments.get("ms").and_then(|m| m.as_u64()).unwrap_or(500);
            std::thread::sleep(Duration::from_millis(ms));
            text_result(id, "done", false)
        }
        "notify" => {
            let notification = json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": {"level": "info", "data": "tool is running"}
            });
            let _ = write_line(out, &notification);
            text_result(id, "notified", false)
        }
        other => make_error(id, -32601, &format!("Unknown tool: {}", other)),
    }
}

fn handle_resources_list(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "resources": [{
                "uri": "test://greeting",
                "name": "greeting",
                "description": "A friendly greeting",
                "mimeType": "text/plain"
            }]
        }),
    )
}

fn handle_resources_read(id: &Value, params: &Value) -> Value {
    let uri = params.get("uri").and_then(|u| u.as_str()).unwrap_or("");
    if uri != "test://greeting" {
        return make_error(id, -32002, &format!("Resource not found: {}", uri));
    }
    make_result(
        id,
        json!({
            "contents": [{
                "uri": uri,
                "mimeType": "text/plain",
                "text": "hello from the test server"
            }]
        }),
    )
}

fn handle_prompts_list(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "prompts": [{
                "name": "greet",
                "description": "Greets someone by name",
                "arguments": [{"name": "name", "required": true}]
            }]
        }),
    )
}

fn handle_prompts_get(id: &Value, params: &Value) -> Value {
    let prompt = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    if prompt != "greet" {
        return make_error(id, -32602, &format!("Unknown prompt: {}", prompt));
    }
    let name = params
        .pointer("/arguments/name")
        .and_then(|n| n.as_str())
        .unwrap_or("stranger");
    make_result(
        id,
        json!({
            "description": "Greets someone by name",
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": format!("Hello, {}!", name)}
            }]
        }),
    )
}

fn text_result(id: &Value, text: &str, is_error: bool) -> Value {
    make_result(
        id,
        json!({
            "content": [{"type": "text", "text": text}],
            "isError": is_error
        }),
    )
}

fn make_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

/// Build a JSON-RPC error response.
fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
