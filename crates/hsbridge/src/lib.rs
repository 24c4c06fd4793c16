//! Host-side bridge to a Lua runtime that is only reachable through a one-shot
//! command-line front end (Hammerspoon's `hs -c` by default).
//!
//! Every interaction spawns the front end with a code snippet and captures its
//! output. On top of that transport the crate keeps a table of live remote
//! values addressed by integer handles, marshals values to and from Lua literal
//! syntax, and serves host callbacks through a resident dispatch listener.
//!
//! ```no_run
//! use hsbridge::{Arg, Bridge, Value};
//!
//! # fn main() -> hsbridge::Result<()> {
//! let bridge = Bridge::new()?;
//! let hs = bridge.hs()?;
//! hs.attr("alert")?.call([Arg::from("Hello from Rust!")])?;
//!
//! let sum = bridge.eval("1 + 1")?.value()?;
//! assert_eq!(sum, Value::Int(2));
//! bridge.close();
//! # Ok(())
//! # }
//! ```

mod bridge;
pub mod callback;
pub mod channel;
pub mod config;
pub mod convert;
pub mod error;
mod listener;
mod prelude;
pub mod proxy;
mod runtime;
pub mod table;
pub mod value;

pub const TRACE_TARGET: &str = "hsbridge::remote";

pub use bridge::{Bridge, BridgeBuilder};
pub use callback::CallbackRegistry;
pub use channel::{Channel, CommandChannel};
pub use config::{BridgeConfig, CallbackConfig, ChannelConfig};
pub use error::{BoxError, Error, Result};
pub use proxy::{Arg, Proxy};
pub use table::{Handle, ObjectTable};
pub use value::{Callable, LuaType, Value};
