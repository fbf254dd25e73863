use anyhow::{anyhow, bail, Context};
use cafe_core::storage::credential::now_millis;
use cafe_core::{
    kinds, ClientConfig, ConnectionManager, Credential, Envelope, FileCredentialStore, Permission,
    SessionStore,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// How long a request waits for the server's reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "cafe-client", version = "0.1.0", subcommand_required = true)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug)]
pub struct ConnectionArgs {
    /// WebSocket endpoint of the cafe backend
    #[arg(long, env = "CAFE_ENDPOINT", default_value = cafe_core::config::DEFAULT_ENDPOINT)]
    pub endpoint: String,
    /// Delay between a close and the next connect attempt
    #[arg(long, env = "CAFE_RECONNECT_DELAY_MS", default_value_t = 3000)]
    pub reconnect_delay_ms: u64,
    /// Name of the persisted session record
    #[arg(long, env = "CAFE_STORAGE_RECORD", default_value = cafe_core::config::DEFAULT_STORAGE_RECORD)]
    pub storage_record: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and persist the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "CAFE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the persisted session
    Logout,
    /// Show the logged-in user and their permissions
    Whoami,
    /// List orders, then follow new orders and status changes until Ctrl+C
    Orders,
    /// Change the kitchen or payment status of an order
    OrderStatus {
        #[arg(long)]
        order_id: String,
        /// New kitchen status (needs the kitchen permission)
        #[arg(long, conflicts_with = "payment", required_unless_present = "payment")]
        kitchen: Option<String>,
        /// New payment status (needs the payment permission)
        #[arg(long)]
        payment: Option<String>,
    },
    /// Send a raw message and print the reply
    Send {
        /// Message type, e.g. getProducts
        #[arg(long = "type")]
        msg_type: String,
        /// JSON object or array to send
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

impl ConnectionArgs {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            storage_record: self.storage_record.clone(),
            ..ClientConfig::default()
        }
    }
}

pub async fn run_cli(args: Args) -> anyhow::Result<()> {
    let config = args.connection.config();
    let storage = FileCredentialStore::new(&config.storage_record)
        .context("Failed to open the session store")?;
    info!("Session record at {}", storage.path().display());

    let session = SessionStore::new(Arc::new(storage));
    session.initialize();

    // Commands that never touch the network.
    match &args.command {
        Command::Logout => {
            session.deactivate();
            println!("Logged out");
            return Ok(());
        }
        Command::Whoami => {
            print_whoami(&session);
            session.dispose();
            return Ok(());
        }
        _ => {}
    }

    let manager = ConnectionManager::websocket(config, session.clone());
    manager.connect();
    let result = tokio::select! {
        result = run_command(args.command, &manager) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    manager.shutdown().await;
    session.dispose();
    result
}

async fn run_command(command: Command, manager: &ConnectionManager) -> anyhow::Result<()> {
    wait_connected(manager).await?;

    match command {
        Command::Login { username, password } => login(manager, username, password).await,
        Command::Orders => follow_orders(manager).await,
        Command::OrderStatus {
            order_id,
            kitchen,
            payment,
        } => update_order_status(manager, order_id, kitchen, payment).await,
        Command::Send { msg_type, payload } => {
            let payload: Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let reply = request(manager, payload, &msg_type).await?;
            println!("{}", serde_json::to_string_pretty(&reply.message)?);
            Ok(())
        }
        Command::Logout | Command::Whoami => Ok(()),
    }
}

async fn wait_connected(manager: &ConnectionManager) -> anyhow::Result<()> {
    let endpoint = &manager.config().endpoint;
    match timeout(REPLY_TIMEOUT, manager.wait_until_connected()).await {
        Ok(true) => Ok(()),
        Ok(false) => bail!("Connection to '{}' was shut down", endpoint),
        Err(_) => bail!("Could not connect to '{}'", endpoint),
    }
}

/// Send one message and wait for the reply of the same type.
async fn request(
    manager: &ConnectionManager,
    payload: Value,
    msg_type: &str,
) -> anyhow::Result<Envelope> {
    // Subscribe first so the reply can't slip past.
    let mut replies = manager.subscribe_to(msg_type);
    manager.send(payload, msg_type)?;

    match timeout(REPLY_TIMEOUT, replies.recv()).await {
        Ok(Some(reply)) => Ok(reply),
        Ok(None) => bail!("Connection closed while waiting for '{}'", msg_type),
        Err(_) => bail!("No reply to '{}' within {:?}", msg_type, REPLY_TIMEOUT),
    }
}

async fn login(manager: &ConnectionManager, username: String, password: String) -> anyhow::Result<()> {
    let reply = request(
        manager,
        json!({ "username": username, "password": password }),
        kinds::LOGIN,
    )
    .await?;
    if !reply.is_success() {
        bail!("Login failed: {}", reply.text().unwrap_or("no reason given"));
    }

    let credential = credential_from_reply(reply.message)?;
    let name = credential.username.clone();
    manager.session().activate(credential)?;
    println!("Logged in as {}", name);
    Ok(())
}

/// The account either comes nested under `account` or inline next to the
/// reply's `status` and `message`.
fn credential_from_reply(message: Value) -> anyhow::Result<Credential> {
    let mut fields = match message {
        Value::Object(mut fields) => match fields.remove("account") {
            Some(Value::Object(account)) => account,
            _ => fields,
        },
        _ => bail!("Login reply is not an object"),
    };
    fields.remove("status");
    fields.remove("message");
    Credential::from_wire(Value::Object(fields), now_millis())
        .context("Login reply does not carry a usable credential")
}

async fn follow_orders(manager: &ConnectionManager) -> anyhow::Result<()> {
    let mut updates = manager.subscribe_to_any(&[
        kinds::NEW_ORDER,
        kinds::UPDATE_ORDER_KITCHEN_STATUS,
        kinds::UPDATE_ORDER_PAYMENT_STATUS,
        kinds::SESSION_INVALIDATED,
    ]);

    let reply = request(manager, json!({}), kinds::GET_ORDERS).await?;
    if !reply.is_success() {
        bail!("Could not list orders: {}", reply.text().unwrap_or("no reason given"));
    }
    if let Some(Value::Object(orders)) = reply.message.get("orders") {
        for order in orders.values() {
            print_order(order);
        }
    }

    println!("Following orders, press Ctrl+C to stop");
    while let Some(update) = updates.recv().await {
        print_update(manager, &update);
    }
    Ok(())
}

async fn update_order_status(
    manager: &ConnectionManager,
    order_id: String,
    kitchen: Option<String>,
    payment: Option<String>,
) -> anyhow::Result<()> {
    let session = manager.session();
    let (msg_type, payload) = match (kitchen, payment) {
        (Some(status), _) => {
            session.authorize(&Permission::KitchenEditor.code().to_string(), false)?;
            (
                kinds::UPDATE_ORDER_KITCHEN_STATUS,
                json!({ "orderId": order_id, "kitchenStatus": status }),
            )
        }
        (None, Some(status)) => {
            session.authorize(&Permission::PaymentEditor.code().to_string(), false)?;
            (
                kinds::UPDATE_ORDER_PAYMENT_STATUS,
                json!({ "orderId": order_id, "paymentStatus": status }),
            )
        }
        (None, None) => return Err(anyhow!("Either --kitchen or --payment is required")),
    };

    let reply = request(manager, payload, msg_type).await?;
    match reply.text() {
        Some(text) => println!(
            "{}: {}",
            reply.message["status"].as_str().unwrap_or("unknown"),
            text
        ),
        None => println!("{}", serde_json::to_string_pretty(&reply.message)?),
    }
    if !reply.is_success() {
        bail!("Status update was not applied");
    }
    Ok(())
}

fn print_whoami(session: &SessionStore) {
    let Some(credential) = session.credential() else {
        println!("Not logged in");
        return;
    };
    let who = if credential.name.is_empty() {
        credential.username.clone()
    } else {
        format!("{} ({})", credential.name, credential.username)
    };
    println!("{}", who);
    if let Some(left) = credential.remaining(now_millis()) {
        println!("Session expires in {} s", left.as_secs());
    }
    if credential.permissions.is_empty() {
        println!("No permissions");
    }
    for permission in credential.permissions.iter() {
        println!("  [{}] {}", permission.code(), permission.description());
    }
}

fn print_order(order: &Value) {
    println!(
        "{}  kitchen: {}  payment: {}",
        order["_id"].as_str().unwrap_or("?"),
        order["kitchenStatus"].as_str().unwrap_or("-"),
        order["paymentStatus"].as_str().unwrap_or("-"),
    );
}

fn print_update(manager: &ConnectionManager, update: &Envelope) {
    if update.is(kinds::SESSION_INVALIDATED) {
        println!(
            "Logged out: {}",
            update.text().unwrap_or("the session was opened elsewhere")
        );
        return;
    }
    if !update.is_success() {
        warn!(
            "'{}' failed: {}",
            update.msg_type,
            update.text().unwrap_or("no reason given")
        );
        return;
    }
    match update.msg_type.as_str() {
        kinds::NEW_ORDER => {
            print!("new order ");
            print_order(&update.message["order"]);
        }
        kinds::UPDATE_ORDER_KITCHEN_STATUS => {
            let info = &update.message["orderInfo"];
            println!(
                "{}  kitchen -> {}",
                info["id"].as_str().unwrap_or("?"),
                info["newKitchenStatus"].as_str().unwrap_or("?")
            );
        }
        kinds::UPDATE_ORDER_PAYMENT_STATUS => {
            let order = &update.message["updatedOrder"];
            println!(
                "{}  payment -> {}",
                order["_id"].as_str().unwrap_or("?"),
                order["paymentStatus"].as_str().unwrap_or("?")
            );
        }
        _ => {}
    }
    if let Some(by) = update.added_by_token() {
        if manager.session().is_own_token(by) {
            info!("'{}' was caused by this client", update.msg_type);
        }
    }
}
