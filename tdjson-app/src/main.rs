//! tdjson-app: interactive login + update printer.
//!
//! Fill in the constants below and run:
//!   cargo run -p tdjson-app --features tdjson
//!
//! Needs `libtdjson` on the linker path. Without the `tdjson` feature the app
//! only explains how to enable it.

use std::sync::Arc;
use std::time::Duration;

use tdjson_client::{Client, Config, TdBridge};

// ── Fill in your credentials ──────────────────────────────────────────────────
const API_ID:         i32  = 0;                  // https://my.telegram.org
const API_HASH:       &str = "";
const PHONE:          &str = "";
const ENCRYPTION_KEY: &str = "changeme1234";
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    // RUST_LOG overrides, e.g. RUST_LOG=tdjson_client=debug
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("tdjson_client=info,tdjson_app=info"),
    ).init();

    if let Err(e) = run() {
        eprintln!("\n✗ {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "tdjson")]
fn bridge() -> Result<Arc<dyn TdBridge>, Box<dyn std::error::Error>> {
    Ok(Arc::new(tdjson_client::native::TdJson::new(1)))
}

#[cfg(not(feature = "tdjson"))]
fn bridge() -> Result<Arc<dyn TdBridge>, Box<dyn std::error::Error>> {
    Err("built without TDLib; rebuild with `--features tdjson`".into())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    if API_ID == 0 || API_HASH.is_empty() || PHONE.is_empty() {
        eprintln!("Edit API_ID, API_HASH and PHONE at the top of tdjson-app/src/main.rs");
        std::process::exit(1);
    }

    let client = Client::new(Config {
        api_id:                  API_ID,
        api_hash:                API_HASH.to_string(),
        phone:                   PHONE.to_string(),
        database_encryption_key: ENCRYPTION_KEY.to_string(),
        ..Default::default()
    }, bridge()?)?;

    println!("📱 Logging in as {PHONE} …");
    client.login()?;
    println!("✅ Authorized");

    let me = client.get_me()?.wait(Duration::from_secs(30))?;
    println!("👤 {} (id {})", me["first_name"].as_str().unwrap_or("?"), me["id"]);

    client.add_message_handler(|_, update| {
        let message = &update["message"];
        let text = message["content"]["text"]["text"].as_str().unwrap_or("<non-text>");
        println!("📨 [chat {}] {text}", message["chat_id"]);
        Ok(())
    });
    client.on("updateAuthorizationState", |_, update| {
        println!("🔐 {}", update["authorization_state"]["@type"]);
        Ok(())
    });

    let chats = client.get_chats(i64::MAX, 0, 10)?.wait(Duration::from_secs(30))?;
    println!("💬 First chats: {}", chats["chat_ids"]);

    println!("\n👂 Listening for messages (Ctrl+C to quit) …\n");
    loop {
        std::thread::park();
    }
}
