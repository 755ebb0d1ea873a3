//! Gateway Bridge (spec.md §4.6): on-chain `ServiceRequest` ingestion with
//! dedup, and signed `Fulfill`/`Fail` delivery with nonce replay
//! protection and a bounded reconciliation loop.

pub mod bridge;
pub mod nonce;
pub mod rpc;

pub use bridge::{GatewayBridge, ReconciliationConfig};
pub use nonce::NonceCounter;
pub use rpc::{account_id_from_caller, GatewayEventSource, GatewayRpcClient, HttpGatewayEventSource, HttpGatewayRpc};
