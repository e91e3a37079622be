//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the ledger tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod deposit;
pub mod operator;
pub mod package;
pub mod task;
pub mod transaction;
pub mod user;
pub mod user_package;

// Re-export specific types to avoid conflicts
pub use deposit::{Column as DepositColumn, Entity as Deposit, Model as DepositModel};
pub use operator::{Column as OperatorColumn, Entity as Operator, Model as OperatorModel};
pub use package::{Column as PackageColumn, Entity as Package, Model as PackageModel};
pub use task::{Column as TaskColumn, Entity as Task, Model as TaskModel};
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
pub use user_package::{
    Column as UserPackageColumn, Entity as UserPackage, Model as UserPackageModel,
};
