pub mod cli;
pub mod config;
pub mod distributor;
pub mod error;
pub mod events;
pub mod hub;
pub mod logging;
pub mod server;
pub mod source;
pub mod supervisor;

pub use config::Config;
pub use distributor::{Distributor, DistributorHandle, Waiter};
pub use events::EventBus;
pub use hub::Hub;
