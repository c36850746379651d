//! catcierge-output: Template/event engine for the cat door controller
//!
//! User supplied text templates are rendered on named lifecycle events,
//! written to files, published on a pub/sub socket and expanded into
//! spawned commands. The grammar supports `%var%` references with a
//! translator chain, `%for%` loops, `%if%` conditions and `$var$` inner
//! expansion, bounded by a hard recursion cap.

pub mod command;
pub mod engine;
pub mod error;
pub mod pathops;
pub mod publisher;
pub mod settings;
pub mod translate;
pub mod view;

pub use engine::{OutputEngine, OutputTemplate};
pub use error::RenderError;
pub use publisher::{CollectingPublisher, NullPublisher, Publisher};
pub use settings::TemplateSettings;
pub use view::{BuildInfo, ControlVars, OutputPaths, PathKind, RenderView};

/// Hard cap on nested template expansion.
pub const OUTPUT_MAX_RECURSION: usize = 20;
