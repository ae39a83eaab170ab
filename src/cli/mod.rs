mod extract;
mod generate;
mod record;

pub use extract::*;
pub use generate::*;
pub use record::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
