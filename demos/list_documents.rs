/// Example: List the signed-in user's documents, page by page
///
/// Signs in with the password grant on first run and keeps the tokens in a
/// file store, so later runs reuse (and refresh) them.
///
/// Setup:
/// export SHELFMARK_CLIENT_ID="your_client_id"
/// export SHELFMARK_CLIENT_SECRET="your_client_secret"
/// export SHELFMARK_USERNAME="you@example.com"
/// export SHELFMARK_PASSWORD="..."
///
/// Run:
/// RUST_LOG=shelfmark=debug cargo run --example list_documents
use serde::Deserialize;
use shelfmark::prelude::*;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Document {
    id: String,
    title: String,
    #[serde(default)]
    year: Option<u32>,
}

const PAGE_LIMIT: usize = 5;
const MAX_PAGES: usize = 3;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client_id = env::var("SHELFMARK_CLIENT_ID").expect("SHELFMARK_CLIENT_ID not set");
    let client_secret =
        env::var("SHELFMARK_CLIENT_SECRET").expect("SHELFMARK_CLIENT_SECRET not set");

    let config = ClientConfig::public_api(ClientCredential::new(
        client_id,
        client_secret,
        "http://localhost:5000/callback",
    ))
    .expect("Invalid configuration")
    .with_max_retries(2);

    let store = Arc::new(FileTokenStore::new("shelfmark-demo").expect("Failed to create file store"));
    let locks = RefreshLockManager::for_app("shelfmark-demo").expect("Failed to create lock dir");
    let transport = Arc::new(ReqwestTransport::new(&config).expect("Failed to build HTTP client"));
    let client = ApiClient::from_executor(
        Executor::new(config, transport, store.clone()).with_refresh_lock(locks),
    );

    if !client.is_signed_in().expect("Failed to read token store") {
        let username = env::var("SHELFMARK_USERNAME").expect("SHELFMARK_USERNAME not set");
        let password = env::var("SHELFMARK_PASSWORD").expect("SHELFMARK_PASSWORD not set");
        match client.sign_in_with_password(&username, &password) {
            Ok(_) => println!("Signed in, tokens stored at {}", store.path().display()),
            Err(e) => {
                eprintln!("Sign-in failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut target = format!("documents?limit={}", PAGE_LIMIT);
    for page in 1..=MAX_PAGES {
        let response = client
            .get(&target, JsonDecoder::<Vec<Document>>::new())
            .and_then(|request| {
                request
                    .header("Accept", "application/vnd.mendeley-document.1+json")
                    .execute()
            });

        let envelope = match response {
            Ok(envelope) => envelope,
            Err(ApiError::Http {
                code,
                message,
                trace_id,
                ..
            }) => {
                eprintln!("Server answered {}: {} (trace {:?})", code, message, trace_id);
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Request failed: {}", e);
                std::process::exit(1);
            }
        };

        println!("--- page {} (server time {:?}) ---", page, envelope.server_date());
        for doc in envelope.resource() {
            match doc.year {
                Some(year) => println!("{}  {} ({})", doc.id, doc.title, year),
                None => println!("{}  {}", doc.id, doc.title),
            }
        }

        match envelope.next_page() {
            Some(next) => target = next.to_string(),
            None => break,
        }
    }
}
