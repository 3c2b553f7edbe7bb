//! MySQL/MariaDB query canonicalization and the log digest tooling built on it.
//!
//! The library surface is [`canonical`] for grouping keys and [`escape`] for
//! building statements whose literals canonicalize away cleanly:
//!
//! ```
//! use dbcanon::escape::{quote_identifier, quote_string, Backend};
//!
//! let sql = format!(
//!     "SELECT * FROM {} WHERE name = {}",
//!     quote_identifier(Backend::MySql, "shop.orders"),
//!     quote_string(Backend::MySql, "O'Brien"),
//! );
//! assert_eq!(sql, r"SELECT * FROM `shop`.`orders` WHERE name = 'O\'Brien'");
//! assert_eq!(dbcanon::canonicalize(&sql), "SELECT * FROM `shop`.`orders` WHERE name = '?'");
//! ```
//!
//! The remaining modules back the `dbcanon` binary: log [`source`] parsers,
//! the async [`reader`], digest [`stats`] and [`output`] sinks.

pub mod canonical;
pub mod escape;
pub mod output;
pub mod reader;
pub mod source;
pub mod stats;

pub use canonical::{canonicalize, MySqlCanonicalQuery};
