//! Newline-delimited JSON-RPC 2.0 tool server over stdio.
//!
//! Exposes a single tool, `get_query_result`, whose description is the query
//! help text built from the cache contents at listing time.

use crate::help::{query_help, TagDescriptions};
use crate::session::QuerySession;
use crate::{run_query, tool_error_text};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};

pub const SERVER_NAME: &str = "everything2prompt";
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const QUERY_TOOL_NAME: &str = "get_query_result";
pub const QUERY_ARGUMENT_EXAMPLE: &str = "source:task tag:work from:-7d";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default, rename = "jsonrpc")]
    _jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
}

pub fn json_rpc_response(id: Option<Value>, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn tool_text_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}

pub struct ToolServer {
    session: QuerySession,
    descriptions: TagDescriptions,
    initialized: bool,
}

impl ToolServer {
    pub fn new(session: QuerySession, descriptions: TagDescriptions) -> Self {
        Self {
            session,
            descriptions,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Handles one raw line. Returns `None` for notifications and blank lines.
    pub fn handle_line(&mut self, line: &str) -> Option<Value> {
        if line.trim().is_empty() {
            return None;
        }
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(error = %error, "unparseable JSON-RPC message");
                return Some(json_rpc_error(None, PARSE_ERROR, "Parse error"));
            }
        };
        let id = raw.get("id").cloned();
        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle(request),
            Err(_) => Some(json_rpc_error(id, INVALID_REQUEST, "Invalid Request")),
        }
    }

    pub fn handle(&mut self, request: JsonRpcRequest) -> Option<Value> {
        let expects_response = !matches!(request.id, None | Some(Value::Null));
        tracing::debug!(method = %request.method, "handling JSON-RPC request");

        match request.method.as_str() {
            "initialize" => {
                let protocol_version = request
                    .params
                    .as_ref()
                    .and_then(|params| params.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION)
                    .to_string();
                Some(json_rpc_response(
                    request.id,
                    json!({
                        "protocolVersion": protocol_version,
                        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
                        "capabilities": { "tools": {} }
                    }),
                ))
            }
            "notifications/initialized" | "initialized" => {
                self.initialized = true;
                None
            }
            "ping" => Some(json_rpc_response(request.id, json!({}))),
            "tools/list" => {
                let records = self.session.records();
                let description = query_help(&records, &self.descriptions);
                Some(json_rpc_response(
                    request.id,
                    json!({ "tools": [query_tool_definition(&description)] }),
                ))
            }
            "tools/call" => Some(self.call_tool(request.id, request.params.as_ref())),
            _ if !expects_response => None,
            other => Some(json_rpc_error(
                request.id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", other),
            )),
        }
    }

    fn call_tool(&mut self, id: Option<Value>, params: Option<&Value>) -> Value {
        let name = params.and_then(|params| params.get("name")).and_then(Value::as_str);
        if name != Some(QUERY_TOOL_NAME) {
            return json_rpc_error(
                id,
                INVALID_PARAMS,
                &format!("Unknown tool: {}", name.unwrap_or("<missing>")),
            );
        }
        let Some(query) = params
            .and_then(|params| params.get("arguments"))
            .and_then(|arguments| arguments.get("query_string"))
            .and_then(Value::as_str)
        else {
            return json_rpc_error(id, INVALID_PARAMS, "missing required argument: query_string");
        };

        match run_query(&mut self.session, query, Local::now().naive_local()) {
            Ok(text) => json_rpc_response(id, tool_text_result(text, false)),
            Err(error) => {
                tracing::warn!(query, error = %error, "query tool call failed");
                json_rpc_response(id, tool_text_result(tool_error_text(&error), true))
            }
        }
    }

    /// Serves until EOF on `input`. Each response is written as one JSON line.
    pub fn serve<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> std::io::Result<()> {
        tracing::info!("tool server listening on stdio");
        for line in input.lines() {
            let line = line?;
            if let Some(response) = self.handle_line(&line) {
                writeln!(output, "{}", response)?;
                output.flush()?;
            }
        }
        tracing::info!("stdin closed; tool server exiting");
        Ok(())
    }
}

fn query_tool_definition(description: &str) -> Value {
    json!({
        "name": QUERY_TOOL_NAME,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "query_string": {
                    "type": "string",
                    "description": format!("Query such as '{}'", QUERY_ARGUMENT_EXAMPLE)
                }
            },
            "required": ["query_string"]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::models::{Cache, EventRecord, SourceBatch};
    use chrono::NaiveDate;

    fn server_with_event(root: &std::path::Path) -> ToolServer {
        let store = CacheStore::new(root.join("cache.json"), root.join("cache.lock"));
        let start = NaiveDate::from_ymd_opt(2025, 6, 1)
            .and_then(|date| date.and_hms_opt(14, 0, 0))
            .expect("valid start");
        let mut cache = Cache::default();
        cache.replace(SourceBatch::Events(vec![EventRecord::new("e1", "Picnic", start)]));
        store.save(&cache).expect("seed cache");
        ToolServer::new(QuerySession::new(store), TagDescriptions::default())
    }

    fn call(query: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": { "name": QUERY_TOOL_NAME, "arguments": { "query_string": query } }
        })
        .to_string()
    }

    #[test]
    fn initialize_echoes_protocol_and_notification_is_silent() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#)
            .expect("initialize response");
        assert_eq!(response["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(response["result"]["serverInfo"]["name"], SERVER_NAME);

        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .is_none());
        assert!(server.is_initialized());
    }

    #[test]
    fn tools_list_describes_the_query_tool_with_help_text() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .expect("tools/list response");
        let tool = &response["result"]["tools"][0];
        assert_eq!(tool["name"], QUERY_TOOL_NAME);
        assert!(tool["description"].as_str().unwrap_or_default().contains("event"));
        assert_eq!(tool["inputSchema"]["required"][0], "query_string");
    }

    #[test]
    fn tool_call_returns_rendered_prompt() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());
        let response = server.handle_line(&call("source:event")).expect("call response");
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"]["isError"], false);
        let text = response["result"]["content"][0]["text"].as_str().unwrap_or_default();
        assert!(text.starts_with("QUERY: \"source:event\""));
        assert!(text.contains("Event: Picnic"));
    }

    #[test]
    fn invalid_query_is_reported_as_tool_error_text() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());
        let response = server.handle_line(&call("source:nope")).expect("call response");
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap_or_default();
        assert!(text.starts_with("Error executing query:"));
    }

    #[test]
    fn tool_call_without_query_string_is_rejected() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());
        for arguments in [json!({}), json!({ "query_string": 5 })] {
            let line = json!({
                "jsonrpc": "2.0",
                "id": 9,
                "method": "tools/call",
                "params": { "name": QUERY_TOOL_NAME, "arguments": arguments }
            })
            .to_string();
            let response = server.handle_line(&line).expect("call response");
            assert_eq!(response["error"]["code"], INVALID_PARAMS);
            assert!(response.get("result").is_none());
        }

        let line = r#"{"jsonrpc":"2.0","id":10,"method":"tools/call","params":{"name":"get_query_result"}}"#;
        let response = server.handle_line(line).expect("call response");
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn advertised_example_looks_back_in_time() {
        let now = NaiveDate::from_ymd_opt(2025, 7, 5)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid now");
        let spec = crate::query::QuerySpec::parse(QUERY_ARGUMENT_EXAMPLE, now).expect("example parses");
        assert!(spec.from.is_some_and(|from| from <= now));

        let definition = query_tool_definition("help");
        let described = definition["inputSchema"]["properties"]["query_string"]["description"]
            .as_str()
            .unwrap_or_default();
        assert!(described.contains(QUERY_ARGUMENT_EXAMPLE));
    }

    #[test]
    fn protocol_errors_use_json_rpc_codes() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());

        let parse = server.handle_line("{not json").expect("parse error");
        assert_eq!(parse["error"]["code"], PARSE_ERROR);

        let unknown = server
            .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)
            .expect("method not found");
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);

        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/cancelled"}"#)
            .is_none());
        assert!(server.handle_line("   ").is_none());
    }

    #[test]
    fn serve_writes_one_line_per_response() {
        let root = tempfile::tempdir().expect("temp root");
        let mut server = server_with_event(root.path());
        let input = format!(
            "{}\n{}\n{}\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            call("")
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).expect("serve");
        let text = String::from_utf8(output).expect("utf8 output");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let ping: Value = serde_json::from_str(lines[0]).expect("ping json");
        assert_eq!(ping["result"], json!({}));
    }
}
