//! OpenAPI description of the HTTP interface.

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

pub(super) fn router() -> Router {
    Router::new().route("/", get(document))
}

async fn document() -> Json<Value> {
    Json(openapi())
}

fn protected(summary: &str) -> Value {
    json!({
        "summary": summary,
        "security": [{ "bearerAuth": [] }, { "apiKeyHeader": [] }, { "apiKeyQuery": [] }],
        "responses": {
            "200": { "description": "OK" },
            "401": { "$ref": "#/components/responses/Unauthorized" },
            "403": { "$ref": "#/components/responses/Forbidden" },
            "404": { "$ref": "#/components/responses/NoKeys" }
        }
    })
}

fn public(summary: &str) -> Value {
    json!({
        "summary": summary,
        "responses": { "200": { "description": "OK" } }
    })
}

/// The OpenAPI 3 document.
fn openapi() -> Value {
    let message = json!({
        "type": "object",
        "properties": { "message": { "type": "string" } }
    });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Jellystat API",
            "version": crate::VERSION
        },
        "paths": {
            "/auth/isConfigured": { "get": public("Whether the instance has been set up") },
            "/api/keys": {
                "get": protected("List API keys"),
                "post": protected("Create an API key"),
                "delete": protected("Delete an API key")
            },
            "/api/whoami": { "get": protected("Identity attached to the request") },
            "/sync/beginSync": { "post": protected("Run a sync pass now") },
            "/backup/beginBackup": { "post": protected("Write a backup now") },
            "/stats/jobs": { "get": protected("Last run of every job") },
            "/logs/getLogs": { "get": protected("Job run history, newest first (`limit`, optional `job` filter)") },
            "/utils/version": { "get": protected("Server version") }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" },
                "apiKeyHeader": { "type": "apiKey", "in": "header", "name": "x-api-token" },
                "apiKeyQuery": { "type": "apiKey", "in": "query", "name": "apiKey" }
            },
            "responses": {
                "Unauthorized": {
                    "description": "No credential, or the bearer token is invalid",
                    "content": { "application/json": { "schema": message.clone() } }
                },
                "Forbidden": {
                    "description": "Malformed authorization header or unknown API key",
                    "content": { "application/json": { "schema": message.clone() } }
                },
                "NoKeys": {
                    "description": "No API keys configured",
                    "content": { "application/json": { "schema": message } }
                }
            }
        }
    })
}
