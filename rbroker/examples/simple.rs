use std::sync::Arc;

use async_trait::async_trait;
use simple_logger::SimpleLogger;

use rbroker::{ClientId, Message, Principal, ServerContext, Settings, Subscribe, Transport};

const CONF: &str = r#"
[throttle]
window = "1s"

[security.constraints.traders]
roles = ["trader"]

[destination.quotes]
allow_subtopics = true
message_ttl = "5s"
send_security_constraint = "traders"

[destination.quotes.throttle]
inbound_policy = "IGNORE"
incoming_client_frequency = 5
"#;

struct Console;

#[async_trait]
impl Transport for Console {
    async fn deliver(&self, client_id: &ClientId, msg: &Message) -> anyhow::Result<()> {
        log::info!("{} <= {:?} {:?}", client_id, msg.subtopics, msg.body);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    SimpleLogger::new().with_level(log::LevelFilter::Info).init()?;

    let settings = Settings::from_toml_str(CONF)?;
    settings.logs();
    let scx = ServerContext::new(settings).transport(Arc::new(Console)).build()?;
    scx.start().await?;

    let trader: ClientId = "trader-1".into();
    scx.sessions().login(&trader, Principal::new("alice", vec!["trader".into()])).await?;
    scx.subscriptions().subscribe(Subscribe::new("quotes", "watcher-1").subtopic("nasdaq.*")).await?;
    scx.subscriptions().subscribe(Subscribe::new("quotes", "watcher-2").subtopic("**")).await?;

    for (i, symbol) in ["nasdaq.aapl", "nyse.ibm", "nasdaq.msft", "nasdaq.goog", "nyse.ge", "nasdaq.amzn"]
        .into_iter()
        .enumerate()
    {
        let msg = Message::new("quotes", trader.clone(), format!("{i}")).subtopic(symbol);
        let r = scx.router().route_message(msg).await?;
        log::info!("{} -> {:?}, delivered: {}", symbol, r.outcome, r.delivered);
    }

    log::info!("{}", serde_json::to_string_pretty(&scx.stats_json())?);
    scx.stop().await;
    Ok(())
}
