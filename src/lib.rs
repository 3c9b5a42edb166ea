//! Echo Mock Server
//!
//! A configurable HTTP mock server. Incoming requests are matched against an
//! ordered list of regex rules and answered with a canned, templated or
//! echoed response.
//!
//! # Features
//!
//! - **Ordered Matching**: First rule whose pattern and method list fit wins
//! - **Echo**: Rules without a body answer with the captured request
//! - **Dynamic Templates**: Handlebars templates with Go-style `{{.Path}}` fields
//! - **Latency Simulation**: Per-response delay
//! - **Failure Injection**: Alternate error response on every Nth hit to a path
//! - **Upstream Proxy**: Feed an upstream response body into the template
//! - **Live Administration**: Rule CRUD under `/config`, counters under `/counter`
//!
//! # Example Rule
//!
//! ```json
//! {
//!   "name": "orders",
//!   "pattern": "^/orders/.*",
//!   "methods": ["GET"],
//!   "response": {
//!     "statusCode": 200,
//!     "headers": {"X-Mock": "true"},
//!     "body": "template:{\"path\":\"{{.Path}}\"}",
//!     "delay": "100ms"
//!   },
//!   "errorResponse": {"statusCode": 503},
//!   "errorEvery": 5
//! }
//! ```

pub mod admin;
pub mod config;
pub mod counter;
pub mod duration;
pub mod error;
pub mod matcher;
pub mod proxy;
pub mod server;
pub mod snapshot;
pub mod synthesizer;
pub mod template;
pub mod ui;

pub use config::{load_inline_rules, load_rule_dir, ProxyConfig, ResponseTemplate, RuleDefinition, ServerConfig};
pub use counter::RequestCounter;
pub use error::{ResponseError, RuleError};
pub use matcher::RuleStore;
pub use proxy::{HttpUpstream, Upstream, UpstreamReply};
pub use server::{handle, serve, AppState};
pub use snapshot::RequestSnapshot;
pub use synthesizer::{BodyPayload, ResponseSynthesizer};
