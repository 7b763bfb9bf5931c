//! Backend connectivity: one non-blocking link per pool slot (`link`),
//! one instance owning a fixed pool of links (`instance`), and the
//! directory that exclusively owns every instance (`directory`).

pub mod directory;
pub mod instance;
pub mod link;

pub use self::directory::InstanceDirectory;
pub use self::instance::Instance;
pub use self::link::{BackendLink, LinkState};
