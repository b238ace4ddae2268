pub mod analyzers;
pub mod browser;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod error;
pub mod interaction;
pub mod model;
pub mod result;
pub mod url_utils;
pub mod writer;

pub use browser::{ChromiumRenderer, PageContext, Renderer, ScriptedRenderer};
pub use config::ScanConfig;
pub use crawler::{ProgressCallback, SurfaceCrawler};
pub use dedup::{DedupStats, GlobalDedup};
pub use error::ScanError;
pub use model::{ParamType, Source, Surface};
pub use result::{CrawlResult, PageOutcome};
pub use writer::{ResultWriter, SurfaceRecord};
