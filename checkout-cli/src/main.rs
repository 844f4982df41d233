//! Checkout CLI
//!
//! Command-line interface for the checkout API.

use anyhow::Result;
use clap::{Parser, Subcommand};

use checkout_client::CheckoutClient;
use checkout_repo::security::{SIGNATURE_HEADER, verify_payload_signature};
use checkout_types::{CreateDepositRequest, CreateOrderRequest, Currency, QuoteRequest};

#[derive(Parser)]
#[command(name = "checkout")]
#[command(author, version, about = "Checkout API CLI client", long_about = None)]
struct Cli {
    /// Base URL of the checkout API
    #[arg(long, env = "CHECKOUT_URL", default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price an order without creating it
    Quote {
        #[command(flatten)]
        item: ItemArgs,
    },
    /// Order operations
    Order {
        #[command(subcommand)]
        action: OrderCommands,
    },
    /// Top up a user's balance through a payment channel
    Deposit {
        #[arg(long)]
        user: String,
        /// Amount in minor units
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        channel: String,
        #[arg(long, default_value = "IDR")]
        currency: String,
        /// Gateway override
        #[arg(long)]
        gateway: Option<String>,
    },
    /// Show a user's balance
    Balance {
        user: String,
    },
    /// Show a user's ledger entries
    Ledger {
        user: String,
    },
    /// Gateway operations
    Gateways {
        #[command(subcommand)]
        action: GatewayCommands,
    },
    /// Channel routing
    Routes {
        #[command(subcommand)]
        action: RouteCommands,
    },
    /// Receive fulfillment events locally
    Listen {
        /// Port to listen on
        #[arg(long, default_value = "4000")]
        port: u16,
        /// Shared secret used to verify the event signature
        #[arg(long, env = "FULFILLMENT_SECRET")]
        secret: Option<String>,
    },
    /// Check API health
    Health,
}

#[derive(clap::Args)]
struct ItemArgs {
    /// SKU code
    #[arg(long)]
    sku: String,
    #[arg(long, default_value_t = 1)]
    quantity: i64,
    /// Payment channel code, e.g. QRIS or VA_BRI
    #[arg(long)]
    channel: String,
    #[arg(long)]
    promo: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    region: Option<String>,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Create an order
    Create {
        #[command(flatten)]
        item: ItemArgs,
        /// Gateway override
        #[arg(long)]
        gateway: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Get an order by invoice
    Get { invoice: String },
    /// Check the payment status with the gateway now
    Poll { invoice: String },
    /// Cancel an order
    Cancel { invoice: String },
    /// Record the fulfillment result of a paid order
    Fulfill {
        invoice: String,
        /// Mark the order failed instead of successful
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        message: Option<String>,
    },
}

#[derive(Subcommand)]
enum GatewayCommands {
    /// Show gateway health
    Health {
        /// Check every gateway instead of showing the last result
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Subcommand)]
enum RouteCommands {
    /// List the routing table
    List,
    /// Route a channel to a gateway
    Set {
        channel: String,
        primary: String,
        #[arg(long)]
        fallback: Option<String>,
    },
}

impl ItemArgs {
    fn quote_request(&self) -> QuoteRequest {
        QuoteRequest {
            sku_code: self.sku.clone(),
            quantity: self.quantity,
            channel: self.channel.to_uppercase(),
            promo_code: self.promo.clone(),
            user_id: self.user.clone(),
            device_id: self.device.clone(),
            region: self.region.clone(),
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = CheckoutClient::new(&cli.url);

    match cli.command {
        Commands::Health => {
            let healthy = client.health().await?;
            if healthy {
                println!("✓ API is healthy");
            } else {
                println!("✗ API is not healthy");
                std::process::exit(1);
            }
        }

        Commands::Quote { item } => {
            print_json(&client.quote(&item.quote_request()).await?)?;
        }

        Commands::Order { action } => match action {
            OrderCommands::Create {
                item,
                gateway,
                name,
                email,
                phone,
            } => {
                let req = CreateOrderRequest {
                    sku_code: item.sku,
                    quantity: item.quantity,
                    channel: item.channel.to_uppercase(),
                    gateway,
                    promo_code: item.promo,
                    user_id: item.user,
                    device_id: item.device,
                    ip_address: None,
                    region: item.region,
                    customer_name: name,
                    customer_email: email,
                    customer_phone: phone,
                };
                print_json(&client.create_order(&req).await?)?;
            }
            OrderCommands::Get { invoice } => {
                print_json(&client.get_order(&invoice).await?)?;
            }
            OrderCommands::Poll { invoice } => {
                print_json(&client.poll_order(&invoice).await?)?;
            }
            OrderCommands::Cancel { invoice } => {
                print_json(&client.cancel_order(&invoice).await?)?;
            }
            OrderCommands::Fulfill {
                invoice,
                failed,
                message,
            } => {
                print_json(&client.fulfill_order(&invoice, !failed, message).await?)?;
            }
        },

        Commands::Deposit {
            user,
            amount,
            channel,
            currency,
            gateway,
        } => {
            let currency: Currency = currency
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid currency {}: {}", currency, e))?;
            let req = CreateDepositRequest {
                user_id: user,
                amount,
                currency,
                channel: channel.to_uppercase(),
                gateway,
                customer_name: None,
                customer_email: None,
                customer_phone: None,
            };
            print_json(&client.create_deposit(&req).await?)?;
        }

        Commands::Balance { user } => {
            print_json(&client.balance(&user).await?)?;
        }

        Commands::Ledger { user } => {
            print_json(&client.ledger(&user).await?)?;
        }

        Commands::Gateways { action } => match action {
            GatewayCommands::Health { refresh } => {
                print_json(&client.gateway_health(refresh).await?)?;
            }
        },

        Commands::Routes { action } => match action {
            RouteCommands::List => {
                print_json(&client.routes().await?)?;
            }
            RouteCommands::Set {
                channel,
                primary,
                fallback,
            } => {
                print_json(&client.set_route(&channel, &primary, fallback.as_deref()).await?)?;
            }
        },

        Commands::Listen { port, secret } => {
            let app = axum::Router::new().route(
                "/",
                axum::routing::post(move |headers: axum::http::HeaderMap, body: String| {
                    handle_event(headers, body, secret.clone())
                }),
            );
            let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
            println!("Listening for fulfillment events on {}", addr);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

async fn handle_event(
    headers: axum::http::HeaderMap,
    body: String,
    secret: Option<String>,
) -> axum::http::StatusCode {
    println!("POST / HTTP/1.1");
    for (name, value) in &headers {
        println!("{}: {:?}", name, value);
    }
    println!();
    println!("{}", body);

    let status = match secret {
        Some(secret) => {
            let signature = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if verify_payload_signature(body.as_bytes(), signature, &secret) {
                println!("✓ signature verified");
                axum::http::StatusCode::OK
            } else {
                println!("✗ signature mismatch");
                axum::http::StatusCode::UNAUTHORIZED
            }
        }
        None => axum::http::StatusCode::OK,
    };
    println!("----------------------------------------");
    status
}
