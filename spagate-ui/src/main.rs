//! Todo Dashboard
//!
//! Client-side rendered Leptos application compiled to WebAssembly and
//! served as the gateway's static bundle. All API calls go back through
//! the gateway at relative `/api` URLs.

use leptos::*;

mod api;
mod app;
mod state;

fn main() {
    // Set up panic hook for better error messages in WASM
    console_error_panic_hook::set_once();

    // Mount the app to the document body
    mount_to_body(|| view! { <app::App /> });
}
