use std::error::Error;

use betfair_sdk::{EmulatorLogLevel, Session, SessionError, SessionOptions, TransportError};
use secrecy::SecretString;
use serde_json::json;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let application_key = "REPLACE_WITH_APP_KEY".to_string();
    let market_id = "REPLACE_WITH_MARKET_ID".to_string();
    let options = SessionOptions {
        emulator: true,
        emulator_log_level: EmulatorLogLevel::Debug,
        ..SessionOptions::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session = Session::with_options(application_key, options)?;
        session
            .login(
                "REPLACE_WITH_USERNAME",
                &SecretString::new("REPLACE_WITH_PASSWORD".to_string()),
            )
            .await?;

        session.enable_emulation_for_market(&market_id)?;
        println!(
            "market={market_id} emulated={}",
            session.is_emulated_market(&market_id)?
        );

        let order = json!({
            "marketId": market_id,
            "instructions": [{
                "selectionId": 47972,
                "side": "BACK",
                "orderType": "LIMIT",
                "limitOrder": { "size": 2.0, "price": 3.5, "persistenceType": "LAPSE" }
            }]
        });
        match session.place_orders(&order)?.await {
            Ok(report) => println!("report={report}"),
            Err(SessionError::Remote {
                source: TransportError::Emulation(reason),
                ..
            }) => println!("emulator declined: {reason}"),
            Err(err) => return Err(err.into()),
        }

        session.disable_emulation_for_market(&market_id)?;
        let book = session
            .list_market_book(&json!({ "marketIds": [market_id] }))?
            .await?;
        println!("book={book}");

        Ok::<(), Box<dyn Error>>(())
    })
}
