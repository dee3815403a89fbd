//! App Root Component
//!
//! The list mirrors server state: every successful mutation triggers a
//! full re-fetch, and the rendered list is a pure function of the todos
//! signal.

use leptos::*;

use crate::api;
use crate::state::{prepare_text, AppState, Todo};

/// Re-fetch the list and replace the rendered state, unless a newer
/// refresh was issued while this one was in flight.
fn reload_todos(state: &AppState) {
    let state = state.clone();
    let ticket = state.refresh.begin();
    spawn_local(async move {
        match api::fetch_todos().await {
            Ok(todos) => {
                if state.refresh.is_current(ticket) {
                    state.todos.set(todos);
                }
            }
            Err(e) => logging::error!("Failed to load todos: {}", e),
        }
    });
}

/// Root application component
#[component]
pub fn App() -> impl IntoView {
    let state = AppState::new();
    provide_context(state.clone());

    // Load todos on mount
    reload_todos(&state);

    view! {
        <main class="todo-app">
            <h1>"Todos"</h1>
            <AddTodo />
            <TodoList />
        </main>
    }
}

/// Input field and add button
#[component]
fn AddTodo() -> impl IntoView {
    let state = use_context::<AppState>().expect("AppState not found");
    let (input, set_input) = create_signal(String::new());

    let submit = move || {
        // Blank input sends nothing
        let Some(text) = prepare_text(&input.get_untracked()) else {
            return;
        };
        let state = state.clone();
        spawn_local(async move {
            match api::create_todo(&text).await {
                Ok(()) => {
                    set_input.set(String::new());
                    reload_todos(&state);
                }
                Err(e) => logging::error!("Failed to add todo: {}", e),
            }
        });
    };

    let submit_on_enter = submit.clone();

    view! {
        <div class="todo-entry">
            <input
                type="text"
                placeholder="What needs doing?"
                prop:value=input
                on:input=move |ev| set_input.set(event_target_value(&ev))
                on:keydown=move |ev: web_sys::KeyboardEvent| {
                    if ev.key() == "Enter" {
                        submit_on_enter();
                    }
                }
            />
            <button class="todo-add" on:click=move |_| submit()>"Add"</button>
        </div>
    }
}

/// The full todo list, rebuilt from the signal on every refresh
#[component]
fn TodoList() -> impl IntoView {
    let state = use_context::<AppState>().expect("AppState not found");
    let todos = state.todos;

    view! {
        <ul class="todo-list">
            {move || {
                let todos = todos.get();
                if todos.is_empty() {
                    view! { <li class="todo-empty">"Nothing to do yet."</li> }.into_view()
                } else {
                    todos
                        .into_iter()
                        .map(|todo| view! { <TodoItem todo /> })
                        .collect_view()
                }
            }}
        </ul>
    }
}

/// A single todo row: completion checkbox, text, delete button
#[component]
fn TodoItem(todo: Todo) -> impl IntoView {
    let state = use_context::<AppState>().expect("AppState not found");
    let id = todo.id.clone();
    let text = todo.text.clone();
    let completed = todo.completed;

    let toggle = {
        let state = state.clone();
        let id = id.clone();
        move |ev: web_sys::Event| {
            let completed = event_target_checked(&ev);
            let state = state.clone();
            let id = id.clone();
            spawn_local(async move {
                match api::set_completed(&id, completed).await {
                    Ok(()) => reload_todos(&state),
                    Err(e) => logging::error!("Failed to update todo: {}", e),
                }
            });
        }
    };

    let remove = move |_| {
        let state = state.clone();
        let id = id.clone();
        spawn_local(async move {
            match api::delete_todo(&id).await {
                Ok(()) => reload_todos(&state),
                Err(e) => logging::error!("Failed to delete todo: {}", e),
            }
        });
    };

    view! {
        <li class="todo-item" class:completed=completed>
            <input
                type="checkbox"
                class="todo-checkbox"
                prop:checked=completed
                on:change=toggle
            />
            <span class="todo-text">{text}</span>
            <button class="todo-delete" on:click=remove>"Delete"</button>
        </li>
    }
}
