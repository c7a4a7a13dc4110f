mod build;
mod build_run;
mod meta;

pub use build::*;
pub use build_run::*;
pub use meta::*;
