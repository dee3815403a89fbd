//! HTTP API Client
//!
//! CRUD calls against the todo API, reached through the gateway at
//! relative `/api` URLs. Failures are reported as strings; callers log
//! them to the console and move on.

use gloo_net::http::Request;

use crate::state::Todo;

/// Fetch the full todo list
pub async fn fetch_todos() -> Result<Vec<Todo>, String> {
    let response = Request::get("/api/todos")
        .send()
        .await
        .map_err(|e| format!("Network error: {}", e))?;

    if !response.ok() {
        return Err(format!("Server error: HTTP {}", response.status()));
    }

    response
        .json()
        .await
        .map_err(|e| format!("Parse error: {}", e))
}

/// Create a todo with the given text
pub async fn create_todo(text: &str) -> Result<(), String> {
    #[derive(serde::Serialize)]
    struct CreateTodoRequest<'a> {
        text: &'a str,
    }

    let response = Request::post("/api/todos")
        .json(&CreateTodoRequest { text })
        .map_err(|e| format!("Request build error: {}", e))?
        .send()
        .await
        .map_err(|e| format!("Network error: {}", e))?;

    if !response.ok() {
        return Err(format!("Server error: HTTP {}", response.status()));
    }

    Ok(())
}

/// Set the completion flag on a todo
pub async fn set_completed(id: &str, completed: bool) -> Result<(), String> {
    #[derive(serde::Serialize)]
    struct UpdateTodoRequest {
        completed: bool,
    }

    let response = Request::patch(&format!("/api/todos/{}", id))
        .json(&UpdateTodoRequest { completed })
        .map_err(|e| format!("Request build error: {}", e))?
        .send()
        .await
        .map_err(|e| format!("Network error: {}", e))?;

    if !response.ok() {
        return Err(format!("Server error: HTTP {}", response.status()));
    }

    Ok(())
}

/// Delete a todo
pub async fn delete_todo(id: &str) -> Result<(), String> {
    let response = Request::delete(&format!("/api/todos/{}", id))
        .send()
        .await
        .map_err(|e| format!("Network error: {}", e))?;

    if !response.ok() {
        return Err(format!("Server error: HTTP {}", response.status()));
    }

    Ok(())
}
