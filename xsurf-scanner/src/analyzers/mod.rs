//! Static and passive analyzers. Each one turns a single kind of evidence
//! (a URL, the DOM, traffic, responses, sink calls) into [`Surface`]s.
//!
//! [`Surface`]: crate::model::Surface

pub mod dom;
pub mod hooks;
pub mod response;
pub mod traffic;
pub mod url;

pub use dom::DomAnalyzer;
pub use hooks::SinkHookInstrumentor;
pub use response::ResponseAnalyzer;
pub use traffic::{Attribution, TrafficInterceptor};
pub use url::UrlAnalyzer;
