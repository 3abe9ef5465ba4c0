//! JSON-RPC dispatch shared by every transport.
//!
//! A message is one JSON object. Parameters sit at the top level next to
//! `method` and `id`, or inside a `params` object:
//!
//! ```json
//! {"jsonrpc":"2.0","id":1,"method":"usd/create_prim","stage_id":1,"prim_path":"/World"}
//! ```
//!
//! Messages without an `id` are notifications: they are handled but never
//! answered. Successful results carry the operator's notes under
//! `_meta.notes` whenever there are any.

mod context;
mod errors;
mod handlers;
mod request;
mod response;
mod router;

pub use self::context::ServerContext;
pub use self::errors::DispatchError;
pub use self::router::Dispatcher;

pub(crate) use self::response::notification_line;
