// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the hot paths around tool servers and chat framing.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use toolbridge::chat::{ChatFrame, FrameDecoder};
use toolbridge::mcp::tools::sanitize_schema;
use toolbridge::mcp::{classify, McpConfig, McpToolInfo, ServerConfig};

fn bench_config_parsing(c: &mut Criterion) {
    let json = r#"
    {
        "servers": [
            {
                "id": "fs",
                "name": "Filesystem",
                "transport": "stdio",
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
                "enabled": true
            },
            {
                "id": "remote",
                "name": "Remote",
                "transport": "sse",
                "url": "https://tools.example.com/",
                "token": "${REMOTE_TOKEN}",
                "enabled": false
            },
            {"id": "legacy", "name": "Legacy", "command": "uvx", "args": null}
        ]
    }
    "#;

    c.bench_function("server_config_parse", |b| {
        b.iter(|| McpConfig::from_json(black_box(json)).unwrap());
    });
}

fn bench_classify(c: &mut Criterion) {
    let stdio = ServerConfig::stdio("t1", "Missing", "nonexistent-bin");
    let sse = ServerConfig::sse("t2", "Remote", "https://host/");
    let spawn = "Failed to spawn 'nonexistent-bin': No such file or directory (os error 2)";
    let http = "HTTP 404 Not Found from https://host/sse";

    c.bench_function("classify_stdio", |b| {
        b.iter(|| classify(black_box(spawn), &stdio, None, 3));
    });
    c.bench_function("classify_sse", |b| {
        b.iter(|| classify(black_box(http), &sse, Some("<html>".to_string()), 1));
    });
}

fn bench_tool_schema(c: &mut Criterion) {
    let tool = McpToolInfo {
        name: "read file".to_string(),
        description: Some("Read the contents of a file".to_string()),
        input_schema: serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "Path to the file"},
                "range": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"start": {"type": "integer"}, "end": {"type": "integer"}}
                }
            },
            "required": ["path"]
        }),
        server: "filesystem.local".to_string(),
        read_only: true,
        destructive: false,
    };

    c.bench_function("tool_qualified_name", |b| {
        b.iter(|| black_box(&tool).qualified_name());
    });
    c.bench_function("tool_sanitize_schema", |b| {
        b.iter(|| sanitize_schema(black_box(&tool.input_schema)));
    });
}

fn bench_frames(c: &mut Criterion) {
    let wire: String = (0..200)
        .map(|i| ChatFrame::text(format!("token {} ", i)).encode())
        .chain(std::iter::once(ChatFrame::done().encode()))
        .collect();

    c.bench_function("frame_encode", |b| {
        b.iter(|| ChatFrame::function_call("mcp__fs_read", serde_json::json!({"path": "/tmp/a"})).encode());
    });
    c.bench_function("frame_decode_200", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            for chunk in black_box(wire.as_bytes()).chunks(64) {
                frames.extend(decoder.push(chunk));
            }
            frames
        });
    });
}

criterion_group!(benches, bench_config_parsing, bench_classify, bench_tool_schema, bench_frames);
criterion_main!(benches);
