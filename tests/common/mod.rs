#![allow(dead_code)]

use std::path::Path;

use httpmock::MockServer;
use serde_json::{json, Value};

use chainsight::config::Config;

/// Config pointing every upstream at `server`, with no LLM keys.
pub fn config_for(server: &MockServer, dir: &Path) -> Config {
    let mut config = Config::default().with_explorer_key("explorer-test-key");
    config.explorer.base_url = server.url("/api");
    config.deepseek.base_url = server.url("/deepseek/v1");
    config.anthropic.base_url = server.url("/anthropic/v1");
    config.database_path = dir.join("transactions.db");
    config.result_path = dir.join("analysis_demo/result.json");
    config.parse_timeout_secs = 5;
    config.analysis_timeout_secs = 5;
    config
}

pub fn explorer_tx(hash: &str, value: &str, timestamp: u64) -> Value {
    json!({
        "blockNumber": "14000000",
        "timeStamp": timestamp.to_string(),
        "hash": hash,
        "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "value": value,
        "gas": "21000",
        "gasPrice": "20000000000",
        "gasUsed": "21000",
        "isError": "0",
        "methodId": "0x",
        "functionName": "",
        "contractAddress": "",
        "input": "0x"
    })
}

pub fn explorer_ok(txs: Vec<Value>) -> Value {
    json!({"status": "1", "message": "OK", "result": txs})
}

/// A chat-completions response whose assistant message is `content`.
pub fn chat_reply(content: &Value) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content.to_string()},
            "finish_reason": "stop"
        }]
    })
}

pub fn messages_reply(content: &Value) -> Value {
    json!({
        "id": "msg-test",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": content.to_string()}]
    })
}
