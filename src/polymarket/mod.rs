pub mod auth;
pub mod balance;
pub mod clob_client;
pub mod data_client;
pub mod rpc;
pub mod settlement;
pub mod types;
pub mod wallet;

pub use auth::ClobAuth;
pub use balance::BalanceReader;
pub use clob_client::ClobClient;
pub use data_client::DataClient;
pub use rpc::RpcClient;
pub use settlement::SettlementAdapter;
pub use wallet::LiveWallet;
