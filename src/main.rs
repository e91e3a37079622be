#![allow(clippy::result_large_err)]

use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use referral_ledger::{
    config::{
        database::{create_connection, create_tables, get_database_url},
        settings::load_config,
    },
    core::{auth, deposit, ledger, package, report, task, user, withdrawal},
    entities::transaction::TransactionStatus,
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Operator command line for the referral ledger.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Catalogue and ledger constants
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Database URL; falls back to `DATABASE_URL`, then the bundled default
    #[arg(long)]
    database_url: Option<String>,
    /// Operator bearer token for admin commands
    #[arg(long, env = "LEDGER_OPERATOR_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create tables and seed packages and tasks from the config file
    Init,
    /// Manage operator credentials
    #[command(subcommand)]
    Operator(OperatorCommand),
    /// Inspect accounts
    #[command(subcommand)]
    Users(UsersCommand),
    /// Browse the ledger
    #[command(subcommand)]
    Transactions(TransactionsCommand),
    /// Review deposit requests
    #[command(subcommand)]
    Deposits(DepositCommand),
    /// Settle withdrawals
    #[command(subcommand)]
    Withdrawals(WithdrawalCommand),
    /// Recreate purchases missing for wallet-debited purchase entries
    ReconcilePurchases {
        /// Only this user
        #[arg(long)]
        user: Option<String>,
    },
    /// Compare stored wallets with their transaction history
    Audit {
        /// Only this user
        user: Option<String>,
    },
}

#[derive(Subcommand)]
enum OperatorCommand {
    /// Issue a credential and print its token once
    Issue { label: String },
    /// Revoke a credential
    Revoke { id: String },
}

#[derive(Subcommand)]
enum UsersCommand {
    /// List accounts, newest first
    List,
    /// Account, plan, team, purchases, deposits and recent activity
    Show { id: String },
}

#[derive(Subcommand)]
enum TransactionsCommand {
    /// List ledger rows, newest first
    List {
        /// Full history of this user instead of the latest rows overall
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

#[derive(Subcommand)]
enum DepositCommand {
    /// List pending deposits, oldest first
    Pending,
    /// Approve a deposit and credit the wallet
    Approve { id: String },
    /// Reject a deposit
    Reject { id: String },
}

#[derive(Subcommand)]
enum WithdrawalCommand {
    /// List withdrawals, newest first
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// pending -> approved
    Approve { id: String },
    /// approved -> sent
    Sent { id: String },
    /// sent -> completed
    Complete { id: String },
    /// Reject and refund
    Reject { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Approved,
    Sent,
    Completed,
    Rejected,
}

impl From<StatusArg> for TransactionStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => Self::Pending,
            StatusArg::Approved => Self::Approved,
            StatusArg::Sent => Self::Sent,
            StatusArg::Completed => Self::Completed,
            StatusArg::Rejected => Self::Rejected,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| Error::Validation {
        message: format!("Failed to render output: {e}"),
    })?;
    println!("{rendered}");
    Ok(())
}

async fn operator_context(
    db: &DatabaseConnection,
    token: Option<&str>,
) -> Result<auth::AdminContext> {
    let token = token.ok_or_else(|| Error::Unauthorized {
        reason: "set --token or LEDGER_OPERATOR_TOKEN".to_string(),
    })?;
    auth::authorize_operator(db, token).await
}

async fn run(args: Args, db: &DatabaseConnection) -> Result<()> {
    let token = args.token.as_deref();
    match args.command {
        Command::Init => {
            let config = load_config(&args.config)?;
            config.ledger.settings()?;
            create_tables(db).await?;
            let packages = package::seed_packages(db, &config.packages).await?;
            let tasks = task::seed_tasks(db, &config.tasks).await?;
            info!(packages, tasks, "Ledger initialized");
        }
        Command::Operator(OperatorCommand::Issue { label }) => {
            let issued = auth::issue_operator_credential(db, &label).await?;
            println!("operator: {}", issued.operator.id);
            println!("token:    {}", issued.token);
        }
        Command::Operator(OperatorCommand::Revoke { id }) => {
            print_json(&auth::revoke_operator_credential(db, &id).await?)?;
        }
        Command::Users(command) => {
            operator_context(db, token).await?;
            match command {
                UsersCommand::List => print_json(&user::list_users(db).await?)?,
                UsersCommand::Show { id } => print_json(&report::user_detail(db, &id).await?)?,
            }
        }
        Command::Transactions(TransactionsCommand::List { user, limit }) => {
            operator_context(db, token).await?;
            let rows = match user {
                Some(user_id) => {
                    ledger::find_user(db, &user_id).await?;
                    ledger::get_transactions_for_user(db, &user_id).await?
                }
                None => ledger::list_transactions(db, limit).await?,
            };
            print_json(&rows)?;
        }
        Command::Deposits(command) => {
            let ctx = operator_context(db, token).await?;
            match command {
                DepositCommand::Pending => print_json(&deposit::list_pending_deposits(db).await?)?,
                DepositCommand::Approve { id } => {
                    print_json(&deposit::approve_deposit(db, &ctx, &id).await?)?;
                }
                DepositCommand::Reject { id } => {
                    print_json(&deposit::reject_deposit(db, &ctx, &id).await?)?;
                }
            }
        }
        Command::Withdrawals(command) => {
            let ctx = operator_context(db, token).await?;
            let moved = match command {
                WithdrawalCommand::List { status } => {
                    let listed = withdrawal::list_withdrawals(db, status.map(Into::into)).await?;
                    return print_json(&listed);
                }
                WithdrawalCommand::Approve { id } => {
                    withdrawal::approve_withdrawal(db, &ctx, &id).await?
                }
                WithdrawalCommand::Sent { id } => {
                    withdrawal::mark_withdrawal_sent(db, &ctx, &id).await?
                }
                WithdrawalCommand::Complete { id } => {
                    withdrawal::complete_withdrawal(db, &ctx, &id).await?
                }
                WithdrawalCommand::Reject { id } => {
                    withdrawal::reject_withdrawal(db, &ctx, &id).await?
                }
            };
            print_json(&moved)?;
        }
        Command::ReconcilePurchases { user } => {
            let ctx = operator_context(db, token).await?;
            print_json(&package::reconcile_purchases(db, &ctx, user.as_deref()).await?)?;
        }
        Command::Audit { user } => {
            operator_context(db, token).await?;
            let audits = match user {
                Some(user_id) => vec![report::audit_wallet(db, &user_id).await?],
                None => report::audit_all_wallets(db).await?,
            };
            let inconsistent = audits.iter().filter(|a| !a.is_consistent()).count();
            print_json(&audits)?;
            info!(audited = audits.len(), inconsistent, "Audit finished");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // 2. Load .env file; variables may also be set externally
    dotenv().ok();

    let args = Args::parse();
    let database_url = args.database_url.clone().unwrap_or_else(get_database_url);
    let db = create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;

    run(args, &db)
        .await
        .inspect_err(|e| error!(code = e.code(), "{}", e))
}
