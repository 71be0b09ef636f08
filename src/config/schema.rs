use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "store": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "log_dir": { "type": "string" }
                }
            },
            "tools": {
                "type": "object",
                "properties": {
                    "resolver": { "$ref": "#/$defs/tool" },
                    "classifier": { "$ref": "#/$defs/tool" },
                    "scanner": { "$ref": "#/$defs/tool" },
                    "prober": { "$ref": "#/$defs/tool" }
                }
            },
            "pipeline": {
                "type": "object",
                "properties": {
                    "scan_batch_threshold": { "type": "integer", "minimum": 1 },
                    "poll_interval_secs": { "type": "integer", "minimum": 0 },
                    "max_cycles": { "type": "integer", "minimum": 1 },
                    "stall_cycles": { "type": "integer", "minimum": 1 },
                    "max_attempts": { "type": "integer", "minimum": 1 },
                    "max_runtime_secs": { "type": ["integer", "null"], "minimum": 1 }
                }
            },
            "expand": {
                "type": "object",
                "properties": {
                    "ipv4_prefix": { "type": "integer", "minimum": 0, "maximum": 32 },
                    "ipv6_prefix": { "type": "integer", "minimum": 0, "maximum": 128 },
                    "max_block_size": { "type": "integer", "minimum": 1 },
                    "skip_private": { "type": "boolean" }
                }
            },
            "classify": {
                "type": "object",
                "properties": {
                    "cloud_keywords": { "type": "array", "items": { "type": "string" } }
                }
            },
            "scan": {
                "type": "object",
                "properties": {
                    "ports": { "type": "string" },
                    "rate": { "type": "integer", "minimum": 1 },
                    "max_open_ports_per_host": { "type": "integer", "minimum": 1 }
                }
            }
        },
        "$defs": {
            "tool": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "args": { "type": "array", "items": { "type": "string" } }
                }
            }
        }
    })
});
