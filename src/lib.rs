//! cipclient - client for the CIP control-processor protocol
//!
//! Registers with a control processor over TCP, keeps the session alive with
//! heartbeats, sends digital/analog join changes and delivers the device's
//! join changes to callbacks.
//!
//! ```no_run
//! use cipclient::network::Connection;
//!
//! # async fn demo() -> cipclient::network::ConnectionResult<()> {
//! let mut conn = Connection::open("192.168.1.50", 41794, 0x03).await?;
//! conn.add_digital_callback(|join, state| println!("d{} = {}", join, state));
//! conn.send_digital(5, true).await;
//! loop {
//!     conn.poll().await?;
//! }
//! # }
//! ```

pub mod config;
pub mod network;
pub mod protocol;
