//! Writes the gateway's OpenAPI document. Defaults to
//! `specs/chat-gateway.json` at the workspace root; pass a path to override.

use std::path::PathBuf;

use utoipa::OpenApi;

fn main() -> std::io::Result<()> {
    let doc = chat_gateway::routes::ApiDoc::openapi()
        .to_pretty_json()
        .map_err(std::io::Error::other)?;

    let out = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../specs/chat-gateway.json"),
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&out, doc)?;
    println!("Wrote {}", out.display());
    Ok(())
}
