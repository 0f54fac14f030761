//! # Command Line Interface
//! 
//! Subcommands are in the `commands` module, this only parses and dispatches.

use clap::{arg,crate_version,value_parser,Command};
use env_logger;
use log::error;
use gcr1541::commands;
use gcr1541::commands::CommandError;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let long_help =
"gcr1541 is always invoked with exactly one of several subcommands.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
describe an image:     `gcr1541 info -d mydisk.g64`
sector to bit image:   `gcr1541 convert -d mydisk.d64 -o mydisk.g64`
look at a track:       `gcr1541 dump -d mydisk.d64 -t 18`";

    let mut main_cmd = Command::new("gcr1541")
        .about("Emulates Commodore 1541 disk media and converts disk images.")
        .after_long_help(long_help)
        .version(crate_version!());
    main_cmd = main_cmd.subcommand(Command::new("info")
        .arg(arg!(-d --dimg <PATH> "path to disk image").required(true))
        .arg(arg!(--indent <SPACES> "JSON indentation, omit to minify").required(false)
            .value_parser(value_parser!(u16).range(0..16)))
        .about("write image description as JSON to stdout"));
    main_cmd = main_cmd.subcommand(Command::new("convert")
        .arg(arg!(-d --dimg <PATH> "path to D64 image").required(true))
        .arg(arg!(-o --output <PATH> "path to G64 image to create").required(true))
        .about("lay out a D64 on tracks and save as G64"));
    main_cmd = main_cmd.subcommand(Command::new("dump")
        .arg(arg!(-d --dimg <PATH> "path to disk image").required(true))
        .arg(arg!(-t --track <TRACK> "track number, starting at 1").required(true)
            .value_parser(value_parser!(usize)))
        .about("hex dump of the GCR bytes of a track"));

    let matches = main_cmd.get_matches();

    if let Some(cmd) = matches.subcommand_matches("info") {
        return commands::stat::info(cmd);
    }

    if let Some(cmd) = matches.subcommand_matches("convert") {
        return commands::convert::convert(cmd);
    }

    if let Some(cmd) = matches.subcommand_matches("dump") {
        return commands::dump::dump(cmd);
    }

    error!("No subcommand was found, try `gcr1541 --help`");
    return Err(Box::new(CommandError::InvalidCommand));
}
