use std::error::Error;
use std::sync::Arc;

use betfair_sdk::{Session, TracingInvocationLogger};
use secrecy::SecretString;
use serde_json::json;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let application_key = "REPLACE_WITH_APP_KEY".to_string();
    let username = "REPLACE_WITH_USERNAME".to_string();
    let password = SecretString::new("REPLACE_WITH_PASSWORD".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session = Session::new(application_key)?;
        session.start_invocation_log(Arc::new(TracingInvocationLogger));

        session.login(&username, &password).await?;
        println!("authenticated={}", session.is_authenticated());

        let event_types = session
            .list_event_types(&json!({ "filter": {} }))?
            .await?;
        println!("event_types={event_types}");

        let funds = session.get_account_funds(&json!({}))?.await?;
        println!("available={}", funds["availableToBetBalance"]);

        session.keep_alive().await?;
        session.logout().await?;
        println!("authenticated={}", session.is_authenticated());

        Ok::<(), Box<dyn Error>>(())
    })
}
