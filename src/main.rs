use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use imstream::cli::SubCommandExtend;
use imstream::config::{Opts, SubCommand};

fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Generate(cmd) => cmd.run(&opts),
        SubCommand::Extract(cmd) => cmd.run(&opts),
        SubCommand::Record(cmd) => cmd.run(&opts),
    }
}
